//! Structured classification of tournament errors reported by the server.
//!
//! The server reports tournament failures as free-form strings inside a
//! `TOURNAMENT_ERROR` message. [`ErrorCode::classify`] maps the known phrasings
//! onto a stable enum so the UI can branch on them without string matching.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes derived from `TOURNAMENT_ERROR` payloads.
///
/// Serialized as `"SCREAMING_SNAKE_CASE"` strings (e.g. `"TOURNAMENT_FULL"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No waiting room matches the submitted code.
    TournamentNotFound,
    /// The waiting room already holds four players.
    TournamentFull,
    /// A creator-only action was attempted by another participant.
    NotTournamentCreator,
    /// Any message the client does not recognise.
    Unknown,
}

impl ErrorCode {
    /// Classify a raw server error string.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("does not exist") || lower.contains("not found") {
            Self::TournamentNotFound
        } else if lower.contains("already full") || lower.contains("is full") {
            Self::TournamentFull
        } else if lower.contains("only the creator") {
            Self::NotTournamentCreator
        } else {
            Self::Unknown
        }
    }

    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::TournamentNotFound => {
                "No tournament waiting room matches this code. Check the code and try again."
            }
            Self::TournamentFull => {
                "This tournament already has four players. Ask the creator for a new code."
            }
            Self::NotTournamentCreator => "Only the tournament creator can start the bracket.",
            Self::Unknown => "The tournament server reported an unexpected error.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
