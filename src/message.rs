//! Human-readable punishment messages
//!
//! Text shown to denied connections and operators.

use crate::punishment::{IndefiniteBanKind, Punishment, PunishmentEvent};
use chrono::{DateTime, Duration, Utc};
use std::fmt::Write;

/// Format a duration the way operators type them, largest units first
///
/// Only the two most significant units are kept, e.g. `2d 3h` or `5m 10s`.
#[must_use]
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    if total == 0 {
        return "moments".to_string();
    }

    let units = [
        (total / 86_400, "d"),
        (total % 86_400 / 3_600, "h"),
        (total % 3_600 / 60, "m"),
        (total % 60, "s"),
    ];

    units
        .iter()
        .skip_while(|(value, _)| *value == 0)
        .take(2)
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// How long a punishment has left at `now`, or "permanent"
#[must_use]
pub fn format_expiry(punishment: &Punishment, now: DateTime<Utc>) -> String {
    punishment
        .remaining_at(now)
        .map_or_else(|| "permanent".to_string(), format_remaining)
}

/// Reason shown to a connection refused by an active ban
#[must_use]
pub fn ban_message(punishment: &Punishment, now: DateTime<Utc>) -> String {
    let mut message = String::from("You are banned from this server.\n");
    let _ = writeln!(message, "Reason: {}", punishment.reason);
    let _ = writeln!(message, "Banned by: {}", punishment.punisher);
    match punishment.ends {
        Some(ends) => {
            let _ = write!(
                message,
                "Expires in: {} ({})",
                format_expiry(punishment, now),
                ends.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            );
        }
        None => message.push_str("Expires: permanent"),
    }
    message
}

/// Reason shown to a connection matching an indefinite-ban list
#[must_use]
pub fn indefinite_ban_message(kind: IndefiniteBanKind) -> String {
    format!("Your {kind} is indefinitely banned from this server.\nExpires: permanent")
}

/// One-line notice announcing a punishment event
#[must_use]
pub fn event_notice(event: &PunishmentEvent) -> String {
    match event {
        PunishmentEvent::Issued(p) => {
            let term = match p.remaining_at(p.issued) {
                Some(duration) => format!(" for {}", format_remaining(duration)),
                None => " permanently".to_string(),
            };
            format!(
                "{} was {}{term} by {}: {}",
                p.punished,
                p.kind.verb(),
                p.punisher,
                p.reason
            )
        }
        PunishmentEvent::Revoked(p) => format!("{} was {}", p.punished, p.kind.lifted_verb()),
        PunishmentEvent::Expired(p) => format!(
            "{} was {} after their {} expired",
            p.punished,
            p.kind.lifted_verb(),
            p.kind.to_string().to_lowercase()
        ),
    }
}

/// Operator listing of active bans
#[must_use]
pub fn format_active_bans(bans: &[Punishment], now: DateTime<Utc>) -> String {
    if bans.is_empty() {
        return "No active bans".to_string();
    }

    let mut result = String::new();
    let _ = writeln!(result, "Active bans ({}):", bans.len());
    for ban in bans {
        let _ = writeln!(
            result,
            "- {}: {} (by {}, {})",
            ban.punished,
            ban.reason,
            ban.punisher,
            format_expiry(ban, now)
        );
    }
    result
}
