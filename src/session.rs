//! Identity cache
//!
//! Keeps the punishment aggregate and profile of every connected identity in
//! memory for the lifetime of its session, so in-game checks such as the chat
//! mute check never touch the store.

use crate::punishment::{PunishedIdentity, PunishmentType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Profile details captured when an identity connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProfile {
    pub identity: Uuid,
    /// Display name used for this session
    pub name: String,
    /// Addresses seen for this identity, most recent last
    pub addresses: Vec<IpAddr>,
    pub connected_at: DateTime<Utc>,
}

impl PlayerProfile {
    pub fn new(identity: Uuid, name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            identity,
            name: name.into(),
            addresses: vec![address],
            connected_at: Utc::now(),
        }
    }
}

/// State held for one connected identity
#[derive(Debug, Clone)]
pub struct Session {
    pub profile: PlayerProfile,
    pub punished: PunishedIdentity,
}

/// Process-local cache of connected identities
#[derive(Debug, Clone, Default)]
pub struct IdentityCache {
    sessions: Arc<DashMap<Uuid, Session>>,
}

impl IdentityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session, returning any session it replaced
    pub fn insert(&self, session: Session) -> Option<Session> {
        self.sessions.insert(session.profile.identity, session)
    }

    /// Remove a session
    pub fn remove(&self, identity: Uuid) -> Option<Session> {
        self.sessions.remove(&identity).map(|(_, session)| session)
    }

    /// Check if an identity is connected
    #[must_use]
    pub fn contains(&self, identity: Uuid) -> bool {
        self.sessions.contains_key(&identity)
    }

    /// Snapshot of a connected identity's punishments
    #[must_use]
    pub fn punished(&self, identity: Uuid) -> Option<PunishedIdentity> {
        self.sessions
            .get(&identity)
            .map(|session| session.punished.clone())
    }

    /// Snapshot of a connected identity's profile
    #[must_use]
    pub fn profile(&self, identity: Uuid) -> Option<PlayerProfile> {
        self.sessions
            .get(&identity)
            .map(|session| session.profile.clone())
    }

    /// Replace the cached punishments if the identity is connected
    ///
    /// Returns whether a session was updated. Offline identities are left
    /// alone; their punishments live only in the store.
    pub fn replace_punished(&self, punished: &PunishedIdentity) -> bool {
        match self.sessions.get_mut(&punished.identity) {
            Some(mut session) => {
                session.punished = punished.clone();
                true
            }
            None => false,
        }
    }

    /// Check if a connected identity has a punishment of `kind` in force
    #[must_use]
    pub fn has_in_force(&self, identity: Uuid, kind: PunishmentType) -> bool {
        self.sessions
            .get(&identity)
            .is_some_and(|session| session.punished.has_in_force(kind))
    }

    /// Identities currently connected
    #[must_use]
    pub fn identities(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session, returning how many were dropped
    pub fn clear(&self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        count
    }
}
