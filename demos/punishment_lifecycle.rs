use chrono::{Duration, Utc};
use punishment_engine::message::{event_notice, format_active_bans};
use punishment_engine::punishment::{FileStore, IndefiniteBanRegistry};
use punishment_engine::{ConnectionGate, Error, GateDecision, IdentityCache, PunishmentManager};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Error> {
    println!("Punishment Lifecycle Demo");
    println!("-------------------------");

    let data_dir = std::env::temp_dir().join(format!("punishment-demo-{}", Uuid::new_v4()));
    let manager = PunishmentManager::new(
        Arc::new(FileStore::new(&data_dir)),
        IdentityCache::new(),
        IndefiniteBanRegistry::default(),
        data_dir.join("indefbans.yaml"),
    );
    let gate = ConnectionGate::new(manager.clone());
    let mut events = manager.subscribe();

    let player = Uuid::new_v4();
    let address = "127.0.0.1".parse()?;

    // 1. A clean player is admitted and muted for two seconds
    println!("\n--- Connect and mute ---");
    let decision = gate.admit(player, "Robin", address).await?;
    println!("Admission: {decision:?}");
    manager
        .mute(player, "spamming chat", "console", Duration::seconds(2))
        .await?;
    println!("Muted: {}", manager.is_muted(player));

    // 2. Wait for the expiry timer
    println!("\n--- Waiting for mute to expire ---");
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    println!("Muted: {}", manager.is_muted(player));

    // 3. Ban, then try to reconnect
    println!("\n--- Ban and reconnect ---");
    manager.on_disconnect(player);
    manager
        .ban(player, "ban evasion", "console", Some(Duration::hours(12)))
        .await?;
    match gate.check(player, "Robin", address).await? {
        GateDecision::Allow => println!("Admitted"),
        GateDecision::Deny(reason) => println!("Denied:\n{reason}"),
    }
    println!("\n{}", format_active_bans(&manager.list_active_bans().await?, Utc::now()));

    // 4. Unban and reconnect
    println!("--- Unban ---");
    manager.unban(player).await?;
    println!("Admission: {:?}", gate.admit(player, "Robin", address).await?);

    println!("\n--- Notices ---");
    while let Ok(event) = events.try_recv() {
        println!("{}", event_notice(&event));
    }

    println!("\n--- History ---");
    for punishment in manager.history(player).await? {
        println!(
            "{} {} - {} ({})",
            punishment.id,
            punishment.kind,
            punishment.reason,
            punishment.state_at(Utc::now())
        );
    }

    manager.shutdown().await;
    tokio::fs::remove_dir_all(&data_dir).await?;
    Ok(())
}
