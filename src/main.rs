use std::env;

use punishment_engine::config::DEFAULT_CONFIG_FILE;
use punishment_engine::message::event_notice;
use punishment_engine::{Config, ENGINE_NAME, Error, PunishmentManager, logging};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Main function to run the engine
async fn async_main() -> Result<(), Error> {
    let config_path = env::var("PUNISHMENT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let config = Config::load(&config_path).await?;

    logging::init(&config.log_dir)?;
    info!(config = %config_path, "Starting {ENGINE_NAME}...");

    let manager = PunishmentManager::from_config(&config).await?;
    let counts = manager.indefinite_bans().counts();
    let active_bans = manager.list_active_bans().await?;
    info!(
        active_bans = active_bans.len(),
        indefinite_identities = counts.identities,
        indefinite_addresses = counts.addresses,
        indefinite_names = counts.names,
        "Punishment engine ready"
    );

    // Relay punishment notices to the console
    let mut events = manager.subscribe();
    let relay = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => logging::log_console(event_notice(&event)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Punishment notices dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    manager.shutdown().await;
    relay.abort();

    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(async_main()));

    // Handle any errors that occurred during execution
    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
