//! Connection gate
//!
//! Decides whether a connection attempt is admitted, before the identity is
//! loaded into the identity cache.

use crate::logging;
use crate::message::{ban_message, indefinite_ban_message};
use crate::punishment::{PunishmentManager, PunishmentResult, PunishmentType};
use chrono::Utc;
use std::net::IpAddr;
use tracing::debug;
use uuid::Uuid;

/// Outcome of a connection check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// Refused, with the message to show the client
    Deny(String),
}

impl GateDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Admission check run once per connection attempt
#[derive(Clone)]
pub struct ConnectionGate {
    manager: PunishmentManager,
}

impl ConnectionGate {
    #[must_use]
    pub fn new(manager: PunishmentManager) -> Self {
        Self { manager }
    }

    /// Check a connection attempt
    ///
    /// The indefinite-ban lists are consulted first (identity, address, then
    /// name), then the identity's own ban history.
    ///
    /// # Errors
    /// Returns an error if the identity's stored history cannot be read; the
    /// caller decides whether to refuse the connection
    pub async fn check(
        &self,
        identity: Uuid,
        name: &str,
        address: IpAddr,
    ) -> PunishmentResult<GateDecision> {
        if let Some(kind) = self
            .manager
            .indefinite_bans()
            .check(identity, name, address)
            .await
        {
            let reason = indefinite_ban_message(kind);
            logging::log_connection_denied(identity, name, address, &reason);
            return Ok(GateDecision::Deny(reason));
        }

        match self
            .manager
            .active_punishment(identity, PunishmentType::Ban)
            .await?
        {
            Some(ban) => {
                let reason = ban_message(&ban, Utc::now());
                logging::log_connection_denied(identity, name, address, &ban.reason);
                Ok(GateDecision::Deny(reason))
            }
            None => {
                debug!(identity = %identity, name = %name, "Connection allowed");
                Ok(GateDecision::Allow)
            }
        }
    }

    /// Check a connection attempt and, when allowed, open the session
    ///
    /// # Errors
    /// Returns an error if the identity's stored history cannot be read
    pub async fn admit(
        &self,
        identity: Uuid,
        name: &str,
        address: IpAddr,
    ) -> PunishmentResult<GateDecision> {
        let decision = self.check(identity, name, address).await?;
        if decision.is_allowed() {
            self.manager.on_connect(identity, name, address).await?;
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punishment::{
        ADDRESSES_KEY, FileStore, IndefiniteBanRegistry, MemoryCache, NAMES_KEY, SharedCache,
    };
    use crate::session::IdentityCache;
    use chrono::Duration;
    use std::sync::Arc;

    fn gate(dir: &std::path::Path) -> ConnectionGate {
        ConnectionGate::new(PunishmentManager::new(
            Arc::new(FileStore::new(dir)),
            IdentityCache::new(),
            IndefiniteBanRegistry::default(),
            dir.join("indefbans.yaml"),
        ))
    }

    fn address() -> IpAddr {
        "198.51.100.20".parse().unwrap()
    }

    #[tokio::test]
    async fn test_never_punished_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());

        let decision = gate.check(Uuid::new_v4(), "Alex", address()).await.unwrap();
        assert_eq!(decision, GateDecision::Allow);
    }

    #[tokio::test]
    async fn test_active_ban_is_denied_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());
        let identity = Uuid::new_v4();
        gate.manager
            .ban(identity, "duping items", "admin", Some(Duration::days(2)))
            .await
            .unwrap();

        match gate.check(identity, "Alex", address()).await.unwrap() {
            GateDecision::Deny(reason) => {
                assert!(reason.contains("Reason: duping items"));
                assert!(reason.contains("Expires in: 1d"));
            }
            GateDecision::Allow => panic!("Expected ban to deny connection"),
        }
    }

    #[tokio::test]
    async fn test_mute_does_not_deny() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());
        let identity = Uuid::new_v4();
        gate.manager
            .mute(identity, "spam", "mod", Duration::minutes(5))
            .await
            .unwrap();

        assert!(gate.check(identity, "Alex", address()).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_indefinite_lists_deny() {
        let dir = tempfile::tempdir().unwrap();
        let banned = Uuid::new_v4();
        std::fs::write(
            dir.path().join("indefbans.yaml"),
            format!("uuids: [\"{banned}\"]\nips: [\"203.0.113.5\"]\nusernames: [\"Griefer\"]\n"),
        )
        .unwrap();
        let gate = gate(dir.path());
        gate.manager.reload_indefinite_bans().await.unwrap();

        let by_identity = gate.check(banned, "Alex", address()).await.unwrap();
        assert!(matches!(by_identity, GateDecision::Deny(reason) if reason.starts_with("Your UUID ")));

        let by_address = gate
            .check(Uuid::new_v4(), "Alex", "203.0.113.5".parse().unwrap())
            .await
            .unwrap();
        assert!(matches!(by_address, GateDecision::Deny(reason) if reason.starts_with("Your IP ")));

        let by_name = gate.check(Uuid::new_v4(), "griefer", address()).await.unwrap();
        assert!(matches!(by_name, GateDecision::Deny(reason) if reason.starts_with("Your username ")));

        // Indefinite bans leave no history
        assert!(gate.manager.history(banned).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admit_opens_session_only_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());
        let allowed = Uuid::new_v4();
        let banned = Uuid::new_v4();
        gate.manager.ban(banned, "cheating", "admin", None).await.unwrap();

        assert!(gate.admit(allowed, "Alex", address()).await.unwrap().is_allowed());
        assert!(!gate.admit(banned, "Sam", address()).await.unwrap().is_allowed());

        assert!(gate.manager.sessions().contains(allowed));
        assert!(!gate.manager.sessions().contains(banned));
    }

    #[tokio::test]
    async fn test_lists_published_by_another_node_deny() {
        let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
        let publisher_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            publisher_dir.path().join("indefbans.yaml"),
            "ips: [\"203.0.113.5\"]\nusernames: [\"Griefer\"]\n",
        )
        .unwrap();
        let publisher = IndefiniteBanRegistry::new(Some(Arc::clone(&cache)));
        publisher
            .reload(publisher_dir.path().join("indefbans.yaml"))
            .await
            .unwrap();

        // This node never loaded the file itself
        let dir = tempfile::tempdir().unwrap();
        let gate = ConnectionGate::new(PunishmentManager::new(
            Arc::new(FileStore::new(dir.path())),
            IdentityCache::new(),
            IndefiniteBanRegistry::new(Some(Arc::clone(&cache))),
            dir.path().join("indefbans.yaml"),
        ));
        assert_eq!(gate.manager.indefinite_bans().counts().addresses, 0);

        let by_address = gate
            .check(Uuid::new_v4(), "Alex", "203.0.113.5".parse().unwrap())
            .await
            .unwrap();
        assert!(matches!(by_address, GateDecision::Deny(reason) if reason.starts_with("Your IP ")));

        let by_name = gate.check(Uuid::new_v4(), "GRIEFER", address()).await.unwrap();
        assert!(matches!(by_name, GateDecision::Deny(reason) if reason.starts_with("Your username ")));

        assert!(gate.check(Uuid::new_v4(), "Alex", address()).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_shared_entries_are_normalized() {
        let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
        cache
            .set(ADDRESSES_KEY, r#"[" 0:0:0:0:0:0:0:1 "]"#.to_string())
            .await
            .unwrap();
        cache
            .set(NAMES_KEY, r#"["  Notch_Imposter "]"#.to_string())
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let gate = ConnectionGate::new(PunishmentManager::new(
            Arc::new(FileStore::new(dir.path())),
            IdentityCache::new(),
            IndefiniteBanRegistry::new(Some(cache)),
            dir.path().join("indefbans.yaml"),
        ));

        let loopback: IpAddr = "::1".parse().unwrap();
        assert!(!gate.check(Uuid::new_v4(), "Alex", loopback).await.unwrap().is_allowed());
        assert!(
            !gate
                .check(Uuid::new_v4(), "notch_imposter", address())
                .await
                .unwrap()
                .is_allowed()
        );
    }
}
