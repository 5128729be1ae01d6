//! Punishment types
//!
//! This module defines the closed set of punishments that can be placed on an
//! identity and the enforcement behavior attached to each.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Type of punishment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PunishmentType {
    /// Denies connection
    #[display("Ban")]
    Ban,
    /// Blocks chat
    #[display("Mute")]
    Mute,
    /// Blocks movement and interaction
    #[display("Freeze")]
    Freeze,
}

impl PunishmentType {
    /// Check if this punishment is lifted automatically by a scheduled expiry
    #[must_use]
    pub fn is_time_bounded(self) -> bool {
        match self {
            Self::Mute | Self::Freeze => true,
            Self::Ban => false,
        }
    }

    /// Check if this punishment may be issued without an end time
    #[must_use]
    pub fn allows_indefinite(self) -> bool {
        !self.is_time_bounded()
    }

    /// Past-tense verb used in notifications ("banned", "muted", ...)
    #[must_use]
    pub fn verb(self) -> &'static str {
        match self {
            Self::Ban => "banned",
            Self::Mute => "muted",
            Self::Freeze => "frozen",
        }
    }

    /// Verb describing the punishment being lifted ("unbanned", "unmuted", ...)
    #[must_use]
    pub fn lifted_verb(self) -> &'static str {
        match self {
            Self::Ban => "unbanned",
            Self::Mute => "unmuted",
            Self::Freeze => "unfrozen",
        }
    }
}
