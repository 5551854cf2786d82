//! Core match domain types.
//!
//! Defines the entities every other layer talks about: participants,
//! matches, roster slots, turn state, price snapshots and results.
//! These types are plain data: serializable, cloneable and free of I/O.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ────────────────────────────────────────────
// Identifiers
// ────────────────────────────────────────────

/// Match identifier (UUID v4, hyphenated).
pub type MatchId = String;

/// Stable participant identity: lower-case `0x` wallet address.
pub type ParticipantId = String;

/// Token ticker as drafted (always upper-case inside the engine).
pub type TokenSymbol = String;

/// Picks made per round: one per participant.
pub const PICKS_PER_ROUND: u32 = 2;

/// Normalize a user-supplied ticker to the engine's canonical form.
pub fn normalize_symbol(raw: &str) -> TokenSymbol {
    raw.trim().to_ascii_uppercase()
}

// ────────────────────────────────────────────
// Match configuration enums
// ────────────────────────────────────────────

/// Match format.
///
/// `Fast` is a single round with one starter slot per side.
/// `Full` is an 8-round snake draft: 6 starters + 2 bench slots per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Fast,
    Full,
}

impl MatchType {
    /// Number of rounds in the draft.
    pub const fn rounds(self) -> u32 {
        match self {
            Self::Fast => 1,
            Self::Full => 8,
        }
    }

    /// Slots per side that count toward PnL.
    pub const fn starter_slots(self) -> u32 {
        match self {
            Self::Fast => 1,
            Self::Full => 6,
        }
    }

    /// Roster size per side (one slot per round).
    pub const fn slots_per_side(self) -> u32 {
        self.rounds()
    }

    /// Total picks across both rosters.
    pub const fn total_picks(self) -> u32 {
        self.rounds() * PICKS_PER_ROUND
    }

    /// Whether a slot index is roster depth only.
    pub const fn is_bench(self, slot_index: u32) -> bool {
        slot_index >= self.starter_slots()
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Match lifecycle phase, owned by the session coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Drafting,
    Live,
    Settled,
    Void,
}

impl Phase {
    /// Terminal phases never transition again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Void)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drafting => write!(f, "drafting"),
            Self::Live => write!(f, "live"),
            Self::Settled => write!(f, "settled"),
            Self::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

// ────────────────────────────────────────────
// Participants and matches
// ────────────────────────────────────────────

/// A verified wallet identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Lower-case `0x` address, used as the participant key everywhere.
    pub participant_id: ParticipantId,
    /// EIP-55 checksummed address for display.
    pub wallet_address: String,
}

/// One side of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub identity: ParticipantId,
    pub wallet_address: String,
    pub connection_status: ConnectionStatus,
}

impl Participant {
    fn from_identity(identity: Identity) -> Self {
        Self {
            identity: identity.participant_id,
            wallet_address: identity.wallet_address,
            connection_status: ConnectionStatus::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }
}

/// A head-to-head match. Identity and type never change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub match_id: MatchId,
    pub match_type: MatchType,
    /// Seat 0 is the creator, seat 1 the opponent.
    pub participants: [Participant; 2],
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
}

impl Match {
    /// Create a new match in the drafting phase with both seats disconnected.
    pub fn new(match_type: MatchType, creator: Identity, opponent: Identity) -> Self {
        Self {
            match_id: Uuid::new_v4().to_string(),
            match_type,
            participants: [
                Participant::from_identity(creator),
                Participant::from_identity(opponent),
            ],
            phase: Phase::Drafting,
            created_at: Utc::now(),
        }
    }

    /// Seat index of a participant, if they belong to this match.
    pub fn seat_of(&self, participant: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.identity == participant)
    }

    pub fn participant_ids(&self) -> [ParticipantId; 2] {
        [
            self.participants[0].identity.clone(),
            self.participants[1].identity.clone(),
        ]
    }

    pub fn both_connected(&self) -> bool {
        self.participants.iter().all(Participant::is_connected)
    }

    pub fn both_disconnected(&self) -> bool {
        !self.participants.iter().any(Participant::is_connected)
    }
}

// ────────────────────────────────────────────
// Draft data
// ────────────────────────────────────────────

/// A filled roster slot. Slots exist only once a pick lands in them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickSlot {
    /// 0-based position in the owner's roster; `>= starter_slots` is bench.
    pub slot_index: u32,
    pub token_symbol: TokenSymbol,
    /// 1-based round the pick was made in.
    pub pick_round: u32,
    pub filled_at: DateTime<Utc>,
    /// Set when the server picked on the participant's behalf.
    pub auto_picked: bool,
}

/// Whose turn it is and until when. Read-only to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnState {
    pub current_pick_index: u32,
    pub current_round: u32,
    pub active_participant: ParticipantId,
    pub deadline: DateTime<Utc>,
}

/// A token eligible for drafting, with its latest known price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftableToken {
    pub symbol: TokenSymbol,
    pub price: f64,
}

// ────────────────────────────────────────────
// Settlement data
// ────────────────────────────────────────────

/// Entry/exit prices for one drafted token.
///
/// `None` means the oracle could not price the token at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub token_symbol: TokenSymbol,
    pub price_at_entry: Option<f64>,
    pub price_at_exit: Option<f64>,
}

/// Who won.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Outcome {
    Winner { identity: ParticipantId },
    Tie,
}

/// How the result was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Scored from entry/exit prices after the competition window.
    Settled,
    /// Opponent forfeited during the draft; no price scoring.
    Forfeit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPnl {
    pub identity: ParticipantId,
    pub pnl: f64,
}

/// Final, append-only record of a match. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub match_id: MatchId,
    pub outcome: Outcome,
    pub resolution: Resolution,
    /// Seat order (creator first).
    pub per_participant_pnl: Vec<ParticipantPnl>,
    /// Sorted by symbol.
    pub snapshots: Vec<MarketSnapshot>,
    pub settled_at: DateTime<Utc>,
}

impl MatchResult {
    /// Result for a match decided by forfeiture.
    pub fn forfeit(
        match_id: MatchId,
        participants: &[ParticipantId; 2],
        winner: ParticipantId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id,
            outcome: Outcome::Winner { identity: winner },
            resolution: Resolution::Forfeit,
            per_participant_pnl: participants
                .iter()
                .map(|p| ParticipantPnl {
                    identity: p.clone(),
                    pnl: 0.0,
                })
                .collect(),
            snapshots: Vec::new(),
            settled_at: at,
        }
    }

    /// Winner identity, if not a tie.
    pub fn winner(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Winner { identity } => Some(identity),
            Outcome::Tie => None,
        }
    }

    pub fn pnl_of(&self, participant: &str) -> Option<f64> {
        self.per_participant_pnl
            .iter()
            .find(|p| p.identity == participant)
            .map(|p| p.pnl)
    }
}
