//! Shared cache mirror
//!
//! When the shared cache is enabled every document written to the durable
//! store is mirrored under the identity key so that other server processes
//! sharing the cache observe it. Reads prefer the mirror and fall back to the
//! durable store. Mirror failures are logged and never surface to callers.

use crate::ERROR_TARGET;
use crate::punishment::{CacheError, PunishedIdentity, PunishmentResult, PunishmentStore};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use fred::clients::RedisClient;
use fred::interfaces::{ClientLike, KeysInterface, SetsInterface};
use fred::types::RedisConfig;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Set indexing every identity with a mirrored document
pub const IDENTITY_INDEX_KEY: &str = "punished-identities";

/// Minimal key-value capability the mirror needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;

    /// Add `member` to the set stored at `set`
    async fn add_member(&self, set: &str, member: String) -> Result<(), CacheError>;

    async fn members(&self, set: &str) -> Result<Vec<String>, CacheError>;
}

/// Redis-backed shared cache
#[derive(Clone)]
pub struct RedisCache {
    client: RedisClient,
}

impl RedisCache {
    /// Connect to the server at `url`
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails
    #[tracing::instrument(skip(url), name = "RedisCache::connect", err)]
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = RedisClient::new(RedisConfig::from_url(url)?, None, None, None);
        client.init().await?;
        info!("Connected to shared cache");
        Ok(Self { client })
    }

    /// Close the connection
    ///
    /// # Errors
    /// Returns an error if the server could not be told to close the connection
    pub async fn quit(&self) -> Result<(), CacheError> {
        self.client.quit().await?;
        Ok(())
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.client.get::<Option<String>, _>(key).await?)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.client
            .set::<(), _, _>(key, value, None, None, false)
            .await?;
        Ok(())
    }

    async fn add_member(&self, set: &str, member: String) -> Result<(), CacheError> {
        self.client.sadd::<(), _, _>(set, member).await?;
        Ok(())
    }

    async fn members(&self, set: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.client.smembers::<Vec<String>, _>(set).await?)
    }
}

/// In-process shared cache for single-node deployments and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    values: Arc<DashMap<String, String>>,
    sets: Arc<DashMap<String, BTreeSet<String>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn add_member(&self, set: &str, member: String) -> Result<(), CacheError> {
        self.sets.entry(set.to_string()).or_default().insert(member);
        Ok(())
    }

    async fn members(&self, set: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .sets
            .get(set)
            .map(|entry| entry.value().iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// Store writing through to a durable store and mirroring into a shared cache
pub struct MirroredStore {
    durable: Arc<dyn PunishmentStore>,
    cache: Arc<dyn SharedCache>,
    /// Identities whose last mirror write failed; read from the durable store
    stale: DashSet<Uuid>,
}

impl MirroredStore {
    pub fn new(durable: Arc<dyn PunishmentStore>, cache: Arc<dyn SharedCache>) -> Self {
        Self {
            durable,
            cache,
            stale: DashSet::new(),
        }
    }

    /// Check if the mirror is known to lag the durable store for an identity
    #[must_use]
    pub fn is_stale(&self, identity: Uuid) -> bool {
        self.stale.contains(&identity)
    }

    async fn mirror(&self, punished: &PunishedIdentity) -> PunishmentResult<()> {
        let key = punished.identity.to_string();
        self.cache.set(&key, punished.to_document()?).await?;
        self.cache.add_member(IDENTITY_INDEX_KEY, key).await?;
        Ok(())
    }

    async fn read_mirror(&self, identity: Uuid) -> Option<PunishedIdentity> {
        if self.is_stale(identity) {
            return None;
        }

        match self.cache.get(&identity.to_string()).await {
            Ok(Some(text)) => match PunishedIdentity::from_document(identity, &text) {
                Ok(punished) => Some(punished),
                Err(e) => {
                    warn!(
                        target: ERROR_TARGET,
                        identity = %identity,
                        error = %e,
                        "Unreadable mirrored document, using durable store"
                    );
                    None
                }
            },
            Ok(None) => {
                debug!(identity = %identity, "Mirror miss");
                None
            }
            Err(e) => {
                warn!(
                    target: ERROR_TARGET,
                    identity = %identity,
                    error = %e,
                    "Mirror read failed, using durable store"
                );
                None
            }
        }
    }
}

#[async_trait]
impl PunishmentStore for MirroredStore {
    async fn read(&self, identity: Uuid) -> PunishmentResult<Option<PunishedIdentity>> {
        if let Some(punished) = self.read_mirror(identity).await {
            return Ok(Some(punished));
        }
        self.durable.read(identity).await
    }

    async fn write(&self, punished: &PunishedIdentity) -> PunishmentResult<()> {
        self.durable.write(punished).await?;

        match self.mirror(punished).await {
            Ok(()) => {
                self.stale.remove(&punished.identity);
            }
            Err(e) => {
                self.stale.insert(punished.identity);
                warn!(
                    target: ERROR_TARGET,
                    identity = %punished.identity,
                    error = %e,
                    "Mirror write failed, durable store remains authoritative"
                );
            }
        }
        Ok(())
    }

    async fn identities(&self) -> PunishmentResult<Vec<Uuid>> {
        let mut identities: BTreeSet<Uuid> = match self.cache.members(IDENTITY_INDEX_KEY).await {
            Ok(members) => members
                .iter()
                .filter_map(|member| Uuid::parse_str(member).ok())
                .collect(),
            Err(e) => {
                warn!(target: ERROR_TARGET, error = %e, "Mirror index unavailable");
                BTreeSet::new()
            }
        };

        // Local documents not yet mirrored are still known identities
        identities.extend(self.durable.identities().await?);
        Ok(identities.into_iter().collect())
    }
}
