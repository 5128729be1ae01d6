//! Punishment manager
//!
//! This module ties the store, the identity cache, the indefinite-ban registry
//! and the expiry scheduler together behind the operations administrators and
//! the session framework call.

use crate::config::Config;
use crate::punishment::record::checked_end;
use crate::{ERROR_TARGET, logging};
use crate::punishment::{
    ExpiryScheduler, FileStore, IndefiniteBanCounts, IndefiniteBanRegistry, MirroredStore,
    PunishedIdentity, Punishment, PunishmentError, PunishmentResult, PunishmentStore,
    PunishmentType, RedisCache, SharedCache,
};
use crate::session::{IdentityCache, PlayerProfile, Session};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the notification channel
const EVENT_CAPACITY: usize = 256;

/// Notification emitted whenever a punishment changes state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunishmentEvent {
    Issued(Punishment),
    Revoked(Punishment),
    Expired(Punishment),
}

impl PunishmentEvent {
    /// The punishment the event is about
    #[must_use]
    pub fn punishment(&self) -> &Punishment {
        match self {
            Self::Issued(p) | Self::Revoked(p) | Self::Expired(p) => p,
        }
    }
}

/// One mutual-exclusion scope per identity
#[derive(Debug, Clone, Default)]
struct IdentityLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    async fn lock(&self, identity: Uuid) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(identity).or_default().value());
        lock.lock_owned().await
    }

    /// Forget the lock for an identity nobody is holding or waiting on
    fn prune(&self, identity: Uuid) {
        self.locks
            .remove_if(&identity, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Run `critical` while holding the identity's lock, then drop the lock
    /// entry if no other task wants it
    async fn scoped<T>(&self, identity: Uuid, critical: impl Future<Output = T>) -> T {
        let guard = self.lock(identity).await;
        let output = critical.await;
        drop(guard);
        self.prune(identity);
        output
    }
}

/// Service for punishment operations
#[derive(Clone)]
pub struct PunishmentManager {
    store: Arc<dyn PunishmentStore>,
    sessions: IdentityCache,
    indefinite: Arc<IndefiniteBanRegistry>,
    scheduler: ExpiryScheduler,
    locks: IdentityLocks,
    events: broadcast::Sender<PunishmentEvent>,
    indefinite_bans_file: Arc<PathBuf>,
    /// Connection closed on shutdown, when the shared cache is enabled
    redis: Option<Arc<RedisCache>>,
}

impl PunishmentManager {
    /// Create a manager over an already selected store
    pub fn new(
        store: Arc<dyn PunishmentStore>,
        sessions: IdentityCache,
        indefinite: IndefiniteBanRegistry,
        indefinite_bans_file: impl Into<PathBuf>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            sessions,
            indefinite: Arc::new(indefinite),
            scheduler: ExpiryScheduler::new(),
            locks: IdentityLocks::default(),
            events,
            indefinite_bans_file: Arc::new(indefinite_bans_file.into()),
            redis: None,
        }
    }

    /// Build a manager from configuration and load the indefinite-ban lists
    ///
    /// The store is chosen once here: the file store alone, or the file store
    /// mirrored into the shared cache when it is enabled.
    ///
    /// # Errors
    /// Returns an error if the shared cache cannot be reached or the
    /// indefinite-ban file cannot be parsed
    pub async fn from_config(config: &Config) -> PunishmentResult<Self> {
        let durable: Arc<dyn PunishmentStore> = Arc::new(FileStore::new(&config.data_dir));

        let redis = if config.shared_cache.enabled {
            Some(Arc::new(RedisCache::connect(&config.shared_cache.url).await?))
        } else {
            None
        };
        let cache = redis
            .clone()
            .map(|redis| -> Arc<dyn SharedCache> { redis });
        let store: Arc<dyn PunishmentStore> = match &cache {
            Some(cache) => Arc::new(MirroredStore::new(durable, Arc::clone(cache))),
            None => durable,
        };

        info!(
            data_dir = %config.data_dir.display(),
            shared_cache = config.shared_cache.enabled,
            "Punishment store selected"
        );

        let mut manager = Self::new(
            store,
            IdentityCache::new(),
            IndefiniteBanRegistry::new(cache),
            config.indefinite_bans_file.clone(),
        );
        manager.redis = redis;
        manager.reload_indefinite_bans().await?;
        Ok(manager)
    }

    /// Subscribe to punishment notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PunishmentEvent> {
        self.events.subscribe()
    }

    /// The identity cache shared with the session framework
    #[must_use]
    pub fn sessions(&self) -> &IdentityCache {
        &self.sessions
    }

    /// The indefinite-ban registry
    #[must_use]
    pub fn indefinite_bans(&self) -> &IndefiniteBanRegistry {
        &self.indefinite
    }

    /// The expiry timer registry
    #[must_use]
    pub fn scheduler(&self) -> &ExpiryScheduler {
        &self.scheduler
    }

    fn notify(&self, event: PunishmentEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Current aggregate for read-only checks, from the session if connected,
    /// else from the store
    async fn lookup(&self, identity: Uuid) -> PunishmentResult<Option<PunishedIdentity>> {
        match self.sessions.punished(identity) {
            Some(punished) => Ok(Some(punished)),
            None => self.store.read(identity).await,
        }
    }

    /// Aggregate to mutate, always from the store
    ///
    /// Another node may have written since this node's session snapshot was
    /// taken. The session is refreshed with what was read. Call with the
    /// identity's lock held.
    async fn load(&self, identity: Uuid) -> PunishmentResult<Option<PunishedIdentity>> {
        let punished = self.store.read(identity).await?;
        if let Some(punished) = &punished {
            self.sessions.replace_punished(punished);
        }
        Ok(punished)
    }

    /// Persist a mutated aggregate, updating the session first if connected
    async fn commit(&self, punished: &PunishedIdentity) -> PunishmentResult<()> {
        self.sessions.replace_punished(punished);
        self.store.write(punished).await
    }

    /// Issue a punishment
    ///
    /// MUTE and FREEZE require a duration and are lifted automatically when it
    /// elapses. A BAN without a duration is indefinite.
    ///
    /// # Errors
    /// Returns `InvalidArgument` before any mutation if the arguments are
    /// rejected, `CorruptDocument` if the stored history cannot be read, and
    /// `StorageFailure` if the write fails (the session copy is still updated
    /// and the operation should be treated as unconfirmed)
    pub async fn issue(
        &self,
        identity: Uuid,
        kind: PunishmentType,
        reason: &str,
        punisher: &str,
        duration: Option<Duration>,
    ) -> PunishmentResult<Punishment> {
        validate(identity, kind, reason, punisher, duration)?;
        let punishment = Punishment::new(identity, kind, reason.trim(), punisher.trim(), duration);

        self.locks
            .scoped(identity, async {
                let mut punished = self
                    .load(identity)
                    .await?
                    .unwrap_or_else(|| PunishedIdentity::new(identity));
                punished.push(punishment.clone());
                self.commit(&punished).await
            })
            .await?;

        if kind.is_time_bounded() {
            self.schedule_expiry(&punishment);
        }

        logging::log_punishment_issued(&punishment);
        self.notify(PunishmentEvent::Issued(punishment.clone()));
        Ok(punishment)
    }

    /// Lift every active punishment of `kind`, returning the lifted records
    ///
    /// Revoking when nothing is active, or for an unknown identity, is a no-op.
    ///
    /// # Errors
    /// Returns `CorruptDocument` if the stored history cannot be read and
    /// `StorageFailure` if the write fails
    pub async fn revoke(&self, identity: Uuid, kind: PunishmentType) -> PunishmentResult<Vec<Punishment>> {
        let lifted = self
            .locks
            .scoped(identity, async {
                let Some(mut punished) = self.load(identity).await? else {
                    debug!(identity = %identity, kind = %kind, "Nothing to revoke");
                    return Ok(Vec::new());
                };
                if !punished.has_flagged(kind) {
                    return Ok(Vec::new());
                }

                // Timers of lapsed records are cancelled along with live ones
                punished
                    .punishments
                    .iter()
                    .filter(|p| p.kind == kind && p.active)
                    .for_each(|p| {
                        self.scheduler.cancel(p.id);
                    });
                let lifted = punished.deactivate_all(kind, Utc::now());
                self.commit(&punished).await?;
                Ok::<_, PunishmentError>(lifted)
            })
            .await?;

        for punishment in &lifted {
            logging::log_punishment_revoked(punishment);
            self.notify(PunishmentEvent::Revoked(punishment.clone()));
        }
        Ok(lifted)
    }

    /// Lift one punishment whose duration elapsed
    ///
    /// Does nothing if it was already lifted, so a timer racing a manual
    /// revoke never notifies twice.
    async fn expire(&self, identity: Uuid, id: Uuid) -> PunishmentResult<Option<Punishment>> {
        let expired = self
            .locks
            .scoped(identity, async {
                let Some(mut punished) = self.load(identity).await? else {
                    return Ok(None);
                };
                let Some(expired) = punished.deactivate(id) else {
                    debug!(identity = %identity, punishment_id = %id, "Already lifted, skipping expiry");
                    return Ok(None);
                };
                self.commit(&punished).await?;
                Ok::<_, PunishmentError>(Some(expired))
            })
            .await?;
        let Some(expired) = expired else {
            return Ok(None);
        };

        logging::log_punishment_expired(&expired);
        self.notify(PunishmentEvent::Expired(expired.clone()));
        Ok(Some(expired))
    }

    fn schedule_expiry(&self, punishment: &Punishment) {
        let Some(ends) = punishment.ends else {
            return;
        };
        let delay = (ends - Utc::now()).to_std().unwrap_or_default();

        let manager = self.clone();
        let identity = punishment.punished;
        let id = punishment.id;
        self.scheduler.schedule(id, delay, async move {
            if let Err(e) = manager.expire(identity, id).await {
                logging::log_operation_error("expire", identity, &e);
            }
        });
    }

    /// Ban an identity, indefinitely when `duration` is `None`
    ///
    /// # Errors
    /// See [`Self::issue`]
    pub async fn ban(
        &self,
        identity: Uuid,
        reason: &str,
        punisher: &str,
        duration: Option<Duration>,
    ) -> PunishmentResult<Punishment> {
        self.issue(identity, PunishmentType::Ban, reason, punisher, duration)
            .await
    }

    /// Mute an identity for `duration`
    ///
    /// # Errors
    /// See [`Self::issue`]
    pub async fn mute(
        &self,
        identity: Uuid,
        reason: &str,
        punisher: &str,
        duration: Duration,
    ) -> PunishmentResult<Punishment> {
        self.issue(identity, PunishmentType::Mute, reason, punisher, Some(duration))
            .await
    }

    /// Freeze an identity for `duration`
    ///
    /// # Errors
    /// See [`Self::issue`]
    pub async fn freeze(
        &self,
        identity: Uuid,
        reason: &str,
        punisher: &str,
        duration: Duration,
    ) -> PunishmentResult<Punishment> {
        self.issue(identity, PunishmentType::Freeze, reason, punisher, Some(duration))
            .await
    }

    /// # Errors
    /// See [`Self::revoke`]
    pub async fn unban(&self, identity: Uuid) -> PunishmentResult<Vec<Punishment>> {
        self.revoke(identity, PunishmentType::Ban).await
    }

    /// # Errors
    /// See [`Self::revoke`]
    pub async fn unmute(&self, identity: Uuid) -> PunishmentResult<Vec<Punishment>> {
        self.revoke(identity, PunishmentType::Mute).await
    }

    /// # Errors
    /// See [`Self::revoke`]
    pub async fn unfreeze(&self, identity: Uuid) -> PunishmentResult<Vec<Punishment>> {
        self.revoke(identity, PunishmentType::Freeze).await
    }

    /// Most recent punishment of `kind` in force for an identity
    ///
    /// # Errors
    /// Returns an error if the stored history cannot be read
    pub async fn active_punishment(
        &self,
        identity: Uuid,
        kind: PunishmentType,
    ) -> PunishmentResult<Option<Punishment>> {
        let now = Utc::now();
        Ok(self
            .lookup(identity)
            .await?
            .and_then(|punished| punished.latest_in_force_at(kind, now).cloned()))
    }

    /// Check if an identity is banned, indefinitely or by an active ban
    ///
    /// # Errors
    /// Returns an error if the stored history cannot be read
    pub async fn is_banned(&self, identity: Uuid) -> PunishmentResult<bool> {
        if self.indefinite.is_identity_banned(identity).await {
            return Ok(true);
        }
        Ok(self
            .active_punishment(identity, PunishmentType::Ban)
            .await?
            .is_some())
    }

    /// Chat check for a connected identity
    #[must_use]
    pub fn is_muted(&self, identity: Uuid) -> bool {
        self.sessions.has_in_force(identity, PunishmentType::Mute)
    }

    /// Movement check for a connected identity
    #[must_use]
    pub fn is_frozen(&self, identity: Uuid) -> bool {
        self.sessions.has_in_force(identity, PunishmentType::Freeze)
    }

    /// Every punishment ever issued to an identity, oldest first
    ///
    /// # Errors
    /// Returns an error if the stored history cannot be read
    pub async fn history(&self, identity: Uuid) -> PunishmentResult<Vec<Punishment>> {
        Ok(self
            .lookup(identity)
            .await?
            .map(|punished| punished.punishments)
            .unwrap_or_default())
    }

    /// Every ban currently in force across all known identities
    ///
    /// Scans the whole store. Identities whose document is corrupt are logged
    /// and skipped so one bad file does not hide every other ban.
    ///
    /// # Errors
    /// Returns an error if the store cannot be listed or read
    pub async fn list_active_bans(&self) -> PunishmentResult<Vec<Punishment>> {
        let now = Utc::now();
        let mut bans = Vec::new();

        for identity in self.store.identities().await? {
            match self.store.read(identity).await {
                Ok(Some(punished)) => {
                    bans.extend(punished.in_force_at(PunishmentType::Ban, now).cloned());
                }
                Ok(None) => {}
                Err(e @ PunishmentError::CorruptDocument { .. }) => {
                    logging::log_operation_error("list_active_bans", identity, &e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(bans)
    }

    /// Reload the indefinite-ban lists from the configured file
    ///
    /// # Errors
    /// Returns a configuration error if the file cannot be parsed
    pub async fn reload_indefinite_bans(&self) -> PunishmentResult<IndefiniteBanCounts> {
        self.indefinite.reload(self.indefinite_bans_file.as_path()).await
    }

    /// Load an admitted identity into the identity cache
    ///
    /// Expiry timers for time-bounded punishments still in force are re-armed,
    /// and ones whose end time passed while no timer was running are lifted.
    ///
    /// # Errors
    /// Returns an error if the stored history cannot be read
    pub async fn on_connect(&self, identity: Uuid, name: &str, address: IpAddr) -> PunishmentResult<()> {
        let punished = self
            .locks
            .scoped(identity, async {
                let punished = self
                    .store
                    .read(identity)
                    .await?
                    .unwrap_or_else(|| PunishedIdentity::new(identity));
                self.sessions.insert(Session {
                    profile: PlayerProfile::new(identity, name, address),
                    punished: punished.clone(),
                });
                Ok::<_, PunishmentError>(punished)
            })
            .await?;

        let timed = punished
            .punishments
            .iter()
            .filter(|p| p.active && p.kind.is_time_bounded());
        for punishment in timed {
            if !self.scheduler.is_scheduled(punishment.id) {
                self.schedule_expiry(punishment);
            }
        }

        debug!(identity = %identity, name = %name, "Session opened");
        Ok(())
    }

    /// Evict an identity from the identity cache
    ///
    /// Pending expiry timers keep running; they work against the store once
    /// the identity is offline. The evicted session is returned so the caller
    /// can flush the profile.
    pub fn on_disconnect(&self, identity: Uuid) -> Option<Session> {
        let session = self.sessions.remove(identity);
        self.locks.prune(identity);
        debug!(identity = %identity, "Session closed");
        session
    }

    /// Cancel pending timers, drop every session and close the shared cache
    pub async fn shutdown(&self) {
        let timers = self.scheduler.cancel_all();
        let sessions = self.sessions.clear();
        if let Some(redis) = &self.redis {
            if let Err(e) = redis.quit().await {
                warn!(target: ERROR_TARGET, error = %e, "Failed to close shared cache connection");
            }
        }
        info!(timers, sessions, "Punishment manager shut down");
    }
}

fn validate(
    identity: Uuid,
    kind: PunishmentType,
    reason: &str,
    punisher: &str,
    duration: Option<Duration>,
) -> PunishmentResult<()> {
    if identity.is_nil() {
        return Err(PunishmentError::invalid("identity must not be nil"));
    }
    if reason.trim().is_empty() {
        return Err(PunishmentError::invalid("reason must not be empty"));
    }
    if punisher.trim().is_empty() {
        return Err(PunishmentError::invalid("issuer must not be empty"));
    }
    match duration {
        Some(duration) if duration <= Duration::zero() => Err(PunishmentError::invalid(format!(
            "duration must be positive, got {}s",
            duration.num_seconds()
        ))),
        Some(duration) if checked_end(Utc::now(), duration).is_none() => Err(
            PunishmentError::invalid(format!("duration of {}s is too long", duration.num_seconds())),
        ),
        None if !kind.allows_indefinite() => Err(PunishmentError::invalid(format!(
            "{kind} requires a duration"
        ))),
        _ => Ok(()),
    }
}
