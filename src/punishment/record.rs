//! Punishment records and the per-identity aggregate
//!
//! This module defines a single punishment, the ordered history of punishments
//! held against one identity, and the JSON document format both are stored in.

use crate::punishment::{PunishmentError, PunishmentResult, PunishmentType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a punishment at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PunishmentState {
    /// In force
    Active,
    /// Still flagged active but its end time has passed
    Expired,
    /// Lifted by an operator or by its expiry timer
    Inactive,
}

impl fmt::Display for PunishmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Expired => write!(f, "Expired"),
            Self::Inactive => write!(f, "Inactive"),
        }
    }
}

/// A single punishment placed on an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punishment {
    /// Unique ID of this punishment
    pub id: Uuid,
    /// Identity being punished
    pub punished: Uuid,
    /// Kind of punishment
    #[serde(rename = "type")]
    pub kind: PunishmentType,
    /// Reason given by the issuer
    pub reason: String,
    /// Identity or system name of whoever issued it
    pub punisher: String,
    /// When the punishment was issued
    pub issued: DateTime<Utc>,
    /// When the punishment ends, `None` if indefinite
    pub ends: Option<DateTime<Utc>>,
    /// Cleared when the punishment is lifted; records are never deleted
    pub active: bool,
}

impl Punishment {
    /// Create a new active punishment starting now
    pub fn new(
        punished: Uuid,
        kind: PunishmentType,
        reason: impl Into<String>,
        punisher: impl Into<String>,
        duration: Option<Duration>,
    ) -> Self {
        let issued = Utc::now();
        Self {
            id: Uuid::new_v4(),
            punished,
            kind,
            reason: reason.into(),
            punisher: punisher.into(),
            issued,
            ends: duration.map(|duration| end_of(issued, duration)),
            active: true,
        }
    }

    /// Check if the punishment has no end time
    #[must_use]
    pub fn is_indefinite(&self) -> bool {
        self.ends.is_none()
    }

    /// Check if the end time has been reached at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ends.is_some_and(|ends| ends <= now)
    }

    /// Check if the punishment is in force at `now`
    ///
    /// Both the flag and the end time are consulted, so a punishment whose
    /// expiry timer never fired is still treated as lifted.
    #[must_use]
    pub fn is_in_force_at(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now)
    }

    /// State of the punishment at `now`
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> PunishmentState {
        if !self.active {
            PunishmentState::Inactive
        } else if self.is_expired_at(now) {
            PunishmentState::Expired
        } else {
            PunishmentState::Active
        }
    }

    /// Time left before the punishment ends, `None` if indefinite
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.ends.map(|ends| (ends - now).max(Duration::zero()))
    }

    /// Lift the punishment, returning whether anything changed
    pub fn deactivate(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }
}

/// End time of a punishment lasting `duration` from `issued`
///
/// Returns `None` when the end time is not representable.
#[must_use]
pub fn checked_end(issued: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    issued.checked_add_signed(duration)
}

/// Saturates at the latest representable time
fn end_of(issued: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    checked_end(issued, duration).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// All punishments held against one identity, oldest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunishedIdentity {
    pub identity: Uuid,
    pub punishments: Vec<Punishment>,
}

/// Inner object of the stored document
#[derive(Debug, Default, Serialize, Deserialize)]
struct PunishmentList {
    punishments: Vec<Punishment>,
}

impl PunishedIdentity {
    /// Create an empty aggregate
    #[must_use]
    pub fn new(identity: Uuid) -> Self {
        Self {
            identity,
            punishments: Vec::new(),
        }
    }

    /// Append a punishment
    pub fn push(&mut self, punishment: Punishment) {
        self.punishments.push(punishment);
    }

    /// Punishments of `kind` in force at `now`, oldest first
    pub fn in_force_at(
        &self,
        kind: PunishmentType,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &Punishment> {
        self.punishments
            .iter()
            .filter(move |p| p.kind == kind && p.is_in_force_at(now))
    }

    /// Most recent punishment of `kind` in force at `now`
    #[must_use]
    pub fn latest_in_force_at(&self, kind: PunishmentType, now: DateTime<Utc>) -> Option<&Punishment> {
        self.in_force_at(kind, now).last()
    }

    /// Check if any punishment of `kind` is in force right now
    #[must_use]
    pub fn has_in_force(&self, kind: PunishmentType) -> bool {
        self.in_force_at(kind, Utc::now()).next().is_some()
    }

    /// Lift every still-flagged punishment of `kind`, returning the ones that
    /// were in force at `now`
    ///
    /// Records whose end time already passed are lifted too, so the stored
    /// flags catch up with what readers already treat as expired, but they are
    /// not returned.
    pub fn deactivate_all(&mut self, kind: PunishmentType, now: DateTime<Utc>) -> Vec<Punishment> {
        self.punishments
            .iter_mut()
            .filter(|p| p.kind == kind)
            .filter_map(|p| {
                let was_in_force = p.is_in_force_at(now);
                (p.deactivate() && was_in_force).then(|| p.clone())
            })
            .collect()
    }

    /// Check if any punishment of `kind` is still flagged active, expired or not
    #[must_use]
    pub fn has_flagged(&self, kind: PunishmentType) -> bool {
        self.punishments.iter().any(|p| p.kind == kind && p.active)
    }

    /// Lift a single punishment by ID, returning it if it was still flagged active
    pub fn deactivate(&mut self, id: Uuid) -> Option<Punishment> {
        self.punishments
            .iter_mut()
            .find(|p| p.id == id)
            .and_then(|p| p.deactivate().then(|| p.clone()))
    }

    /// Serialize into the stored document format
    ///
    /// The document is keyed by identity even though each file holds a single
    /// identity: `{ "<uuid>": { "punishments": [...] } }`.
    ///
    /// # Errors
    /// Returns an error if serialization fails
    pub fn to_document(&self) -> PunishmentResult<String> {
        let mut document = BTreeMap::new();
        document.insert(
            self.identity.to_string(),
            PunishmentList {
                punishments: self.punishments.clone(),
            },
        );
        serde_json::to_string_pretty(&document)
            .map_err(|e| PunishmentError::corrupt(self.identity, e))
    }

    /// Parse a stored document for `identity`
    ///
    /// # Errors
    /// Returns `CorruptDocument` if the text is not valid JSON, lacks an entry
    /// for `identity`, or holds records for another identity
    pub fn from_document(identity: Uuid, text: &str) -> PunishmentResult<Self> {
        let mut document: BTreeMap<String, PunishmentList> =
            serde_json::from_str(text).map_err(|e| PunishmentError::corrupt(identity, e))?;

        let list = document
            .remove(&identity.to_string())
            .ok_or_else(|| PunishmentError::corrupt(identity, "no entry for identity"))?;

        if let Some(stray) = list.punishments.iter().find(|p| p.punished != identity) {
            return Err(PunishmentError::corrupt(
                identity,
                format!("punishment {} belongs to {}", stray.id, stray.punished),
            ));
        }

        Ok(Self {
            identity,
            punishments: list.punishments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Uuid {
        Uuid::parse_str("0b5a1c2e-3f4d-4e6a-9b8c-7d6e5f4a3b2c").unwrap()
    }

    #[test]
    fn test_in_force_respects_end_time() {
        let now = Utc::now();
        let mut mute = Punishment::new(identity(), PunishmentType::Mute, "spam", "console", Some(Duration::seconds(60)));

        assert!(mute.is_in_force_at(now));
        assert_eq!(mute.state_at(now), PunishmentState::Active);

        // Flag still set but end time passed, as after a restart
        let later = now + Duration::seconds(120);
        assert!(!mute.is_in_force_at(later));
        assert_eq!(mute.state_at(later), PunishmentState::Expired);
        assert_eq!(mute.remaining_at(later), Some(Duration::zero()));

        assert!(mute.deactivate());
        assert!(!mute.deactivate());
        assert_eq!(mute.state_at(now), PunishmentState::Inactive);
    }

    #[test]
    fn test_indefinite_ban_never_expires() {
        let ban = Punishment::new(identity(), PunishmentType::Ban, "griefing", "admin", None);
        assert!(ban.is_indefinite());
        assert!(ban.is_in_force_at(Utc::now() + Duration::days(3650)));
        assert_eq!(ban.remaining_at(Utc::now()), None);
    }

    #[test]
    fn test_deactivate_all_lifts_every_active_record() {
        let mut punished = PunishedIdentity::new(identity());
        punished.push(Punishment::new(identity(), PunishmentType::Ban, "first", "admin", None));
        punished.push(Punishment::new(identity(), PunishmentType::Ban, "second", "admin", None));
        punished.push(Punishment::new(identity(), PunishmentType::Mute, "spam", "admin", Some(Duration::minutes(5))));

        let lifted = punished.deactivate_all(PunishmentType::Ban, Utc::now());
        assert_eq!(lifted.len(), 2);
        assert!(!punished.has_in_force(PunishmentType::Ban));
        assert!(punished.has_in_force(PunishmentType::Mute));

        // Second call finds nothing left to lift
        assert!(punished.deactivate_all(PunishmentType::Ban, Utc::now()).is_empty());
        assert_eq!(punished.punishments.len(), 3);
    }

    #[test]
    fn test_deactivate_all_clears_lapsed_records_without_returning_them() {
        let now = Utc::now();
        let mut punished = PunishedIdentity::new(identity());
        let mut lapsed = Punishment::new(identity(), PunishmentType::Ban, "old", "admin", Some(Duration::days(1)));
        lapsed.ends = Some(now - Duration::hours(1));
        punished.push(lapsed);
        punished.push(Punishment::new(identity(), PunishmentType::Ban, "current", "admin", None));

        assert!(punished.has_flagged(PunishmentType::Ban));
        let lifted = punished.deactivate_all(PunishmentType::Ban, now);
        assert_eq!(lifted.len(), 1);
        assert_eq!(lifted[0].reason, "current");
        assert!(!punished.has_flagged(PunishmentType::Ban));
    }

    #[test]
    fn test_unrepresentable_end_time() {
        let now = Utc::now();
        assert!(checked_end(now, Duration::days(365 * 1_000_000)).is_none());
        assert_eq!(checked_end(now, Duration::days(1)), Some(now + Duration::days(1)));

        let ban = Punishment::new(identity(), PunishmentType::Ban, "r", "admin", Some(Duration::days(365 * 1_000_000)));
        assert_eq!(ban.ends, Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_latest_in_force_prefers_newest() {
        let mut punished = PunishedIdentity::new(identity());
        punished.push(Punishment::new(identity(), PunishmentType::Ban, "old", "admin", None));
        punished.push(Punishment::new(identity(), PunishmentType::Ban, "new", "admin", None));

        let latest = punished.latest_in_force_at(PunishmentType::Ban, Utc::now()).unwrap();
        assert_eq!(latest.reason, "new");
    }

    #[test]
    fn test_document_round_trip() {
        let mut punished = PunishedIdentity::new(identity());
        punished.push(Punishment::new(identity(), PunishmentType::Ban, "x-ray", "admin", Some(Duration::days(7))));
        let mut mute = Punishment::new(identity(), PunishmentType::Mute, "caps", "mod", Some(Duration::minutes(5)));
        mute.deactivate();
        punished.push(mute);

        let text = punished.to_document().unwrap();
        assert!(text.contains(&format!("\"{}\"", identity())));
        assert!(text.contains("\"type\": \"BAN\""));
        assert!(text.contains("\"punishments\""));

        let parsed = PunishedIdentity::from_document(identity(), &text).unwrap();
        assert_eq!(parsed, punished);
    }

    #[test]
    fn test_document_with_indefinite_end_uses_null() {
        let mut punished = PunishedIdentity::new(identity());
        punished.push(Punishment::new(identity(), PunishmentType::Ban, "cheating", "admin", None));

        let text = punished.to_document().unwrap();
        assert!(text.contains("\"ends\": null"));
    }

    #[test]
    fn test_corrupt_documents() {
        assert!(matches!(
            PunishedIdentity::from_document(identity(), "{ not json"),
            Err(PunishmentError::CorruptDocument { .. })
        ));

        let other = PunishedIdentity::new(Uuid::new_v4()).to_document().unwrap();
        assert!(matches!(
            PunishedIdentity::from_document(identity(), &other),
            Err(PunishmentError::CorruptDocument { .. })
        ));
    }
}
