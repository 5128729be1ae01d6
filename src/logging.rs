//! Logging setup and punishment audit events

use crate::punishment::Punishment;
use crate::{CONSOLE_TARGET, ERROR_TARGET, Error, PUNISHMENT_TARGET};
use std::net::IpAddr;
use std::path::Path;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use uuid::Uuid;

/// Punishment audit log file name
pub const PUNISHMENT_LOG_FILE: &str = "punishments";

/// Initialize the logging system with console and file outputs
///
/// # Errors
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed
pub fn init(log_dir: impl AsRef<Path>) -> Result<(), Error> {
    let log_dir = log_dir.as_ref();
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    // Audit trail, rotated daily
    let punishment_file = RollingFileAppender::new(Rotation::DAILY, log_dir, PUNISHMENT_LOG_FILE);

    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    let punishment_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(punishment_file);

    // RUST_LOG overrides; default to INFO with the redis client kept quiet
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info").add_directive("fred=warn".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(punishment_layer)
        .try_init()?;

    info!("Logging system initialized");
    Ok(())
}

/// Record a newly issued punishment
pub fn log_punishment_issued(punishment: &Punishment) {
    info!(
        target: PUNISHMENT_TARGET,
        punishment_id = %punishment.id,
        punished = %punishment.punished,
        kind = %punishment.kind,
        punisher = %punishment.punisher,
        reason = %punishment.reason,
        ends = ?punishment.ends,
        event = "issued",
        "Punishment issued"
    );
}

/// Record a punishment lifted by an operator
pub fn log_punishment_revoked(punishment: &Punishment) {
    info!(
        target: PUNISHMENT_TARGET,
        punishment_id = %punishment.id,
        punished = %punishment.punished,
        kind = %punishment.kind,
        event = "revoked",
        "Punishment revoked"
    );
}

/// Record a punishment lifted by its expiry timer
pub fn log_punishment_expired(punishment: &Punishment) {
    info!(
        target: PUNISHMENT_TARGET,
        punishment_id = %punishment.id,
        punished = %punishment.punished,
        kind = %punishment.kind,
        event = "expired",
        "Punishment expired"
    );
}

/// Record a refused connection
pub fn log_connection_denied(identity: Uuid, name: &str, address: IpAddr, reason: &str) {
    warn!(
        target: PUNISHMENT_TARGET,
        identity = %identity,
        name = %name,
        address = %address,
        reason = %reason,
        event = "denied",
        "Connection denied"
    );
}

/// Record an operation that failed and needs operator attention
pub fn log_operation_error(operation: &str, identity: Uuid, error: &dyn std::error::Error) {
    tracing::error!(
        target: ERROR_TARGET,
        operation = %operation,
        identity = %identity,
        error = %error,
        "Punishment operation failed"
    );
}

pub fn log_console(message: String) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}
