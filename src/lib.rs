pub mod config;
pub mod gate;
pub mod logging;
pub mod message;
pub mod punishment;
pub mod session;

pub const ENGINE_NAME: &str = "punishment_engine";
pub const PUNISHMENT_TARGET: &str = "punishment_engine::punishment";
pub const ERROR_TARGET: &str = "punishment_engine::error";
pub const CONSOLE_TARGET: &str = "punishment_engine";

pub use config::{Config, SharedCacheConfig};
pub use gate::{ConnectionGate, GateDecision};
pub use punishment::{
    Punishment, PunishedIdentity, PunishmentError, PunishmentEvent, PunishmentManager,
    PunishmentResult, PunishmentType,
};
pub use session::{IdentityCache, PlayerProfile, Session};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
