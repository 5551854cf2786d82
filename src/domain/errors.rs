//! Draft error taxonomy.
//!
//! Every rejected action maps onto one `ErrorKind` so that the wire
//! protocol and logs can classify failures without matching on variants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::matchup::{ParticipantId, TokenSymbol};

/// Coarse failure category surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Bad signature, unknown/expired/consumed nonce. No retry.
    AuthFailure,
    /// Out-of-turn or stale pick. Client must resync from the latest turn update.
    TurnViolation,
    /// Illegal token choice. Draft state unchanged.
    PickInvalid,
    /// Price data could not be obtained.
    PriceUnavailable,
    /// Both participants were absent past the abandonment ceiling.
    MatchAbandoned,
    /// The match is past the phase that accepts this action.
    PhaseClosed,
    /// Unknown match or caller is not seated in it.
    NotFound,
    /// Inbound message could not be parsed.
    Malformed,
    /// Too many inbound messages on one connection.
    RateLimited,
}

/// Rejections produced by the draft state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("draft is not active")]
    DraftNotActive,

    #[error("draft has already started")]
    AlreadyStarted,

    #[error("it is not {participant}'s turn")]
    NotYourTurn { participant: ParticipantId },

    #[error("stale pick index {submitted}, current pick is {current}")]
    StaleTurn { submitted: u32, current: u32 },

    #[error("token {0} has already been picked in this match")]
    TokenAlreadyPicked(TokenSymbol),

    #[error("token {0} is not draftable")]
    TokenNotDraftable(TokenSymbol),

    #[error("{0} is not seated in this match")]
    UnknownParticipant(ParticipantId),

    #[error("draft needs {needed} draftable tokens, only {available} available")]
    InsufficientDraftable { needed: usize, available: usize },
}

impl DraftError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::DraftNotActive
            | Self::AlreadyStarted
            | Self::NotYourTurn { .. }
            | Self::StaleTurn { .. } => ErrorKind::TurnViolation,
            Self::TokenAlreadyPicked(_) | Self::TokenNotDraftable(_) => ErrorKind::PickInvalid,
            Self::UnknownParticipant(_) => ErrorKind::NotFound,
            Self::InsufficientDraftable { .. } => ErrorKind::PriceUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DraftError::StaleTurn { submitted: 1, current: 2 }.kind(),
            ErrorKind::TurnViolation
        );
        assert_eq!(
            DraftError::TokenAlreadyPicked("ETH".into()).kind(),
            ErrorKind::PickInvalid
        );
    }

    #[test]
    fn test_error_kind_serializes_camel_case() {
        let json = serde_json::to_string(&ErrorKind::TurnViolation).unwrap();
        assert_eq!(json, "\"turnViolation\"");
    }
}
