//! Expiry scheduler
//!
//! A registry of pending expiry timers keyed by punishment ID. Timers live
//! only in memory; after a restart, read paths compare end times with the
//! current time and timers are re-armed when the identity next connects.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

/// Registry of pending expiry timers
#[derive(Debug, Clone, Default)]
pub struct ExpiryScheduler {
    timers: Arc<DashMap<Uuid, AbortHandle>>,
}

impl ExpiryScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any timer already registered for `id`
    ///
    /// The timer leaves the registry before `task` starts, so cancelling after
    /// that point does not interrupt `task`.
    pub fn schedule<F>(&self, id: Uuid, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The entry guard is held until the handle is stored, so a timer that
        // fires immediately cannot remove itself before it is registered
        match self.timers.entry(id) {
            Entry::Occupied(mut occupied) => {
                let handle = self.spawn_timer(id, delay, task);
                occupied.insert(handle).abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.spawn_timer(id, delay, task));
            }
        }
        debug!(punishment_id = %id, delay_secs = delay.as_secs(), "Expiry scheduled");
    }

    fn spawn_timer<F>(&self, id: Uuid, delay: Duration, task: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timers = Arc::clone(&self.timers);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers.remove(&id);
            task.await;
        })
        .abort_handle()
    }

    /// Cancel the timer for `id`, returning whether one was pending
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.timers.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                debug!(punishment_id = %id, "Expiry cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<Uuid> = self.timers.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Check if a timer is pending for `id`
    #[must_use]
    pub fn is_scheduled(&self, id: Uuid) -> bool {
        self.timers.contains_key(&id)
    }

    /// Number of pending timers
    #[must_use]
    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}
