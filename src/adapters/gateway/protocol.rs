//! Session socket wire messages.
//!
//! JSON objects tagged by `type`, camelCase fields. Session events
//! (`turnUpdate`, `pickApplied`, `matchPhase`, `matchResult`) are sent
//! as `Envelope`s straight from the match session; the messages here
//! cover the connection itself.

use serde::{Deserialize, Serialize};

use crate::domain::errors::ErrorKind;
use crate::domain::matchup::{Identity, MatchId, MatchResult};
use crate::usecases::draft_session::SessionView;

/// Messages a client sends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Authenticate {
        session_token: String,
    },
    /// Attach this connection to a match; also used after a reconnect.
    #[serde(alias = "join")]
    Reconnect {
        match_id: MatchId,
    },
    SubmitPick {
        match_id: MatchId,
        token_symbol: String,
        pick_index: u32,
    },
}

/// Connection-level replies.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Authenticated {
        identity: Identity,
    },
    /// Current state of a match after attaching to it.
    Joined {
        view: SessionView,
    },
    /// Final result of a match whose session has already ended.
    MatchResult {
        match_id: MatchId,
        result: MatchResult,
    },
    Rejected {
        kind: ErrorKind,
        reason: String,
    },
}

impl ServerMessage {
    pub fn rejected(kind: ErrorKind, reason: impl ToString) -> Self {
        Self::Rejected {
            kind,
            reason: reason.to_string(),
        }
    }
}
