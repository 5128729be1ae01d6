//! Error types for the punishment engine
//!
//! This module defines the errors that can occur while issuing, revoking or
//! looking up punishments. An absent record is not an error: lookups return
//! `Option` instead.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during punishment operations
#[derive(Debug, Error)]
pub enum PunishmentError {
    /// The stored document for an identity could not be parsed
    #[error("Corrupt punishment document for {identity}: {reason}")]
    CorruptDocument { identity: Uuid, reason: String },

    /// Reading or writing the durable store failed
    #[error("Storage failure for {identity}: {source}")]
    StorageFailure {
        identity: Uuid,
        #[source]
        source: std::io::Error,
    },

    /// Listing the durable store failed
    #[error("Storage scan failed: {0}")]
    ScanFailure(String),

    /// The shared cache rejected or could not serve a request
    #[error("Shared cache failure: {0}")]
    MirrorFailure(String),

    /// Arguments rejected before any mutation took place
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration or indefinite-ban file could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PunishmentError {
    /// Create an invalid argument error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a corrupt document error
    pub fn corrupt(identity: Uuid, reason: impl ToString) -> Self {
        Self::CorruptDocument {
            identity,
            reason: reason.to_string(),
        }
    }

    /// Whether the caller may retry the operation unchanged
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageFailure { .. } | Self::ScanFailure(_))
    }
}

/// Errors raised by a shared cache backend
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] fred::error::RedisError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<CacheError> for PunishmentError {
    fn from(error: CacheError) -> Self {
        Self::MirrorFailure(error.to_string())
    }
}

/// Result type for punishment operations
pub type PunishmentResult<T> = Result<T, PunishmentError>;
