//! Indefinite-ban registry
//!
//! Three flat sets (identities, addresses, names) loaded from a static file.
//! Membership in any of them denies a connection before the per-identity
//! punishment history is consulted. With a shared cache configured the sets
//! are also published under fixed keys so every server process sharing the
//! cache enforces the same list.

use crate::ERROR_TARGET;
use crate::punishment::{PunishmentError, PunishmentResult, SharedCache};
use dashmap::DashSet;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared cache key holding the banned identities as a JSON array
pub const IDENTITIES_KEY: &str = "indefbanned-uuids";
/// Shared cache key holding the banned addresses as a JSON array
pub const ADDRESSES_KEY: &str = "indefbanned-ips";
/// Shared cache key holding the banned names as a JSON array
pub const NAMES_KEY: &str = "indefbanned-users";

/// Which list matched a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum IndefiniteBanKind {
    #[display("UUID")]
    Identity,
    #[display("IP")]
    Address,
    #[display("username")]
    Name,
}

/// On-disk layout of the indefinite-ban file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndefiniteBanList {
    #[serde(default)]
    pub uuids: Vec<String>,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub usernames: Vec<String>,
}

impl IndefiniteBanList {
    /// Load the list from a YAML file; a missing file is an empty list
    ///
    /// # Errors
    /// Returns a configuration error if the file exists but cannot be read or parsed
    pub async fn load(path: impl AsRef<Path>) -> PunishmentResult<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(text) if text.trim().is_empty() => Ok(Self::default()),
            Ok(text) => serde_yaml::from_str(&text)
                .map_err(|e| PunishmentError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No indefinite-ban file, starting with empty lists");
                Ok(Self::default())
            }
            Err(e) => Err(PunishmentError::Config(format!("{}: {e}", path.display()))),
        }
    }
}

/// Number of entries loaded into each list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndefiniteBanCounts {
    pub identities: usize,
    pub addresses: usize,
    pub names: usize,
}

/// Registry of indefinite bans
pub struct IndefiniteBanRegistry {
    identities: DashSet<Uuid>,
    addresses: DashSet<String>,
    names: DashSet<String>,
    cache: Option<Arc<dyn SharedCache>>,
}

impl Default for IndefiniteBanRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Addresses are compared in their canonical textual form
fn normalize_address(address: &str) -> String {
    let address = address.trim();
    address
        .parse::<IpAddr>()
        .map_or_else(|_| address.to_string(), |ip| ip.to_string())
}

/// Names are compared case-insensitively
fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Make `set` hold exactly `entries`
fn swap_in<T>(set: &DashSet<T>, entries: HashSet<T>)
where
    T: Eq + Hash + Clone,
{
    for entry in &entries {
        set.insert(entry.clone());
    }
    set.retain(|entry| entries.contains(entry));
}

impl IndefiniteBanRegistry {
    /// Create an empty registry, publishing to `cache` when given
    pub fn new(cache: Option<Arc<dyn SharedCache>>) -> Self {
        Self {
            identities: DashSet::new(),
            addresses: DashSet::new(),
            names: DashSet::new(),
            cache,
        }
    }

    /// Current number of entries in the local lists
    #[must_use]
    pub fn counts(&self) -> IndefiniteBanCounts {
        IndefiniteBanCounts {
            identities: self.identities.len(),
            addresses: self.addresses.len(),
            names: self.names.len(),
        }
    }

    /// Replace the local lists with `list`
    ///
    /// Identity entries that are not valid UUIDs are skipped. Entries present
    /// in both the old and new lists stay visible to concurrent readers.
    pub fn replace(&self, list: &IndefiniteBanList) -> IndefiniteBanCounts {
        let identities: HashSet<Uuid> = list
            .uuids
            .iter()
            .filter_map(|entry| match Uuid::parse_str(entry.trim()) {
                Ok(identity) => Some(identity),
                Err(_) => {
                    warn!(entry = %entry, "Skipping invalid UUID in indefinite-ban list");
                    None
                }
            })
            .collect();
        let addresses: HashSet<String> = list.ips.iter().map(|a| normalize_address(a)).collect();
        let names: HashSet<String> = list.usernames.iter().map(|n| normalize_name(n)).collect();

        swap_in(&self.identities, identities);
        swap_in(&self.addresses, addresses);
        swap_in(&self.names, names);

        self.counts()
    }

    /// Reload the lists from `path` and republish them to the shared cache
    ///
    /// The file is authoritative: the shared cache copies are overwritten and
    /// the local lists are kept as the fallback when the cache is unreachable.
    ///
    /// # Errors
    /// Returns a configuration error if the file cannot be parsed; the current
    /// lists are left in place in that case
    pub async fn reload(&self, path: impl AsRef<Path>) -> PunishmentResult<IndefiniteBanCounts> {
        let list = IndefiniteBanList::load(path).await?;
        let counts = self.replace(&list);

        info!(
            identities = counts.identities,
            addresses = counts.addresses,
            names = counts.names,
            "Loaded indefinite-ban lists"
        );

        if let Some(cache) = &self.cache {
            self.publish(cache.as_ref()).await;
        }

        Ok(counts)
    }

    async fn publish(&self, cache: &dyn SharedCache) {
        let mut identities: Vec<String> = self.identities.iter().map(|id| id.key().to_string()).collect();
        let mut addresses: Vec<String> = self.addresses.iter().map(|a| a.key().clone()).collect();
        let mut names: Vec<String> = self.names.iter().map(|n| n.key().clone()).collect();
        identities.sort();
        addresses.sort();
        names.sort();

        for (key, values) in [
            (IDENTITIES_KEY, identities),
            (ADDRESSES_KEY, addresses),
            (NAMES_KEY, names),
        ] {
            let result = match serde_json::to_string(&values) {
                Ok(json) => cache.set(key, json).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                warn!(
                    target: ERROR_TARGET,
                    key = key,
                    error = %e,
                    "Failed to publish indefinite-ban list"
                );
            }
        }
    }

    /// Fetch a published list, `None` when it has to be answered locally
    async fn shared_list(&self, key: &str) -> Option<Vec<String>> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(list) => Some(list),
                Err(e) => {
                    warn!(target: ERROR_TARGET, key = key, error = %e, "Unreadable indefinite-ban list");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(target: ERROR_TARGET, key = key, error = %e, "Indefinite-ban list unavailable");
                None
            }
        }
    }

    /// Check if an identity is indefinitely banned
    pub async fn is_identity_banned(&self, identity: Uuid) -> bool {
        match self.shared_list(IDENTITIES_KEY).await {
            Some(list) => list
                .iter()
                .any(|entry| Uuid::parse_str(entry).is_ok_and(|id| id == identity)),
            None => self.identities.contains(&identity),
        }
    }

    /// Check if an address is indefinitely banned
    pub async fn is_address_banned(&self, address: IpAddr) -> bool {
        let address = address.to_string();
        match self.shared_list(ADDRESSES_KEY).await {
            Some(list) => list.iter().any(|entry| normalize_address(entry) == address),
            None => self.addresses.contains(&address),
        }
    }

    /// Check if a display name is indefinitely banned
    pub async fn is_name_banned(&self, name: &str) -> bool {
        let name = normalize_name(name);
        match self.shared_list(NAMES_KEY).await {
            Some(list) => list.iter().any(|entry| normalize_name(entry) == name),
            None => self.names.contains(&name),
        }
    }

    /// Check a connection against all three lists, identity first
    pub async fn check(
        &self,
        identity: Uuid,
        name: &str,
        address: IpAddr,
    ) -> Option<IndefiniteBanKind> {
        if self.is_identity_banned(identity).await {
            Some(IndefiniteBanKind::Identity)
        } else if self.is_address_banned(address).await {
            Some(IndefiniteBanKind::Address)
        } else if self.is_name_banned(name).await {
            Some(IndefiniteBanKind::Name)
        } else {
            None
        }
    }
}
