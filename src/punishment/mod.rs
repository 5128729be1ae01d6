//! Punishment engine
//!
//! Bans, mutes and freezes issued against player identities, persisted per
//! identity and optionally mirrored into a shared cache so every server node
//! sees the same state.

mod error;
mod indefinite;
mod kind;
mod mirror;
mod record;
mod scheduler;
mod service;
mod store;

pub use error::{CacheError, PunishmentError, PunishmentResult};
pub use indefinite::{
    ADDRESSES_KEY, IDENTITIES_KEY, IndefiniteBanCounts, IndefiniteBanKind, IndefiniteBanList,
    IndefiniteBanRegistry, NAMES_KEY,
};
pub use kind::PunishmentType;
pub use mirror::{IDENTITY_INDEX_KEY, MemoryCache, MirroredStore, RedisCache, SharedCache};
pub use record::{PunishedIdentity, Punishment, PunishmentState};
pub use scheduler::ExpiryScheduler;
pub use service::{PunishmentEvent, PunishmentManager};
pub use store::{FileStore, PUNISHMENTS_DIR, PunishmentStore};

#[cfg(test)]
pub use mirror::MockSharedCache;
#[cfg(test)]
pub use store::MockPunishmentStore;
