//! Domain layer - Core match and draft logic.
//!
//! Pure domain logic for the draft session engine.
//! No I/O allowed here (hexagonal architecture inner ring).
//! All types are serializable and testable in isolation.

pub mod draft;
pub mod errors;
pub mod matchup;
pub mod scoring;

// Re-export core types for convenience
pub use draft::{DraftEffect, DraftEvent, DraftRules, DraftState, DraftStatus, FirstPicker, transition};
pub use errors::{DraftError, ErrorKind};
pub use matchup::{
  DraftableToken, Identity, MarketSnapshot, Match, MatchId, MatchResult, MatchType, Outcome,
  ParticipantId, Phase, PickSlot, Resolution, TokenSymbol, TurnState,
};
pub use scoring::RoundMultipliers;
