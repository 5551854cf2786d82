//! Draft state machine.
//!
//! Server-authoritative turn engine for one match. The machine is a pure
//! transition function: `transition(&state, event) -> (state, effects)`.
//! It never reads the clock or touches I/O; callers pass `now` in events
//! and interpret the returned effects (broadcast, schedule, cancel).
//!
//! Turn order is a snake: odd rounds run in seat order starting from the
//! configured first picker, even rounds run reversed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DraftError;
use super::matchup::{
    DraftableToken, MatchType, PICKS_PER_ROUND, ParticipantId, PickSlot, TokenSymbol, TurnState,
    normalize_symbol,
};

/// Which seat opens round 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirstPicker {
    #[default]
    Creator,
    Opponent,
}

impl FirstPicker {
    const fn seat(self) -> usize {
        match self {
            Self::Creator => 0,
            Self::Opponent => 1,
        }
    }
}

/// Timing and forfeiture rules for one draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRules {
    pub match_type: MatchType,
    pub per_pick_timeout: Duration,
    /// How long a participant may stay disconnected before missed turns count.
    pub grace_period: Duration,
    /// Consecutive missed turns (while past grace) that forfeit the match.
    pub forfeit_after_missed_turns: u32,
    pub first_picker: FirstPicker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftStatus {
    Idle,
    Active,
    Completed,
    Forfeited { winner: ParticipantId },
}

impl DraftStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Forfeited { .. })
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone)]
pub enum DraftEvent {
    /// Both participants are present; open the first turn.
    Start {
        draftable: Vec<DraftableToken>,
        now: DateTime<Utc>,
    },
    SubmitPick {
        participant: ParticipantId,
        token_symbol: TokenSymbol,
        at_pick_index: u32,
        now: DateTime<Utc>,
    },
    /// The deadline for `at_pick_index` elapsed.
    Timeout {
        at_pick_index: u32,
        now: DateTime<Utc>,
    },
    ConnectionChanged {
        participant: ParticipantId,
        connected: bool,
        now: DateTime<Utc>,
    },
    /// Replace the price board with a fresher listing.
    RefreshDraftable { draftable: Vec<DraftableToken> },
}

/// Outputs the caller must act on, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftEffect {
    TurnUpdate(TurnState),
    PickApplied {
        participant: ParticipantId,
        slot: PickSlot,
    },
    ScheduleTimeout {
        pick_index: u32,
        deadline: DateTime<Utc>,
    },
    CancelTimeout {
        pick_index: u32,
    },
    Completed,
    Forfeited {
        winner: ParticipantId,
        loser: ParticipantId,
    },
}

/// Complete draft state for one match.
#[derive(Debug, Clone)]
pub struct DraftState {
    rules: DraftRules,
    seats: [ParticipantId; 2],
    status: DraftStatus,
    turn: Option<TurnState>,
    /// Picks made so far; also the global index of the next pick.
    pick_index: u32,
    rosters: [Vec<PickSlot>; 2],
    picked: BTreeSet<TokenSymbol>,
    /// Symbol → price. Ordered so that ties resolve lexicographically.
    board: BTreeMap<TokenSymbol, f64>,
    disconnected_since: [Option<DateTime<Utc>>; 2],
    missed_turns: [u32; 2],
}

/// Apply one event to a state, returning the successor and its effects.
///
/// On error the input state is the authoritative state; nothing changed.
pub fn transition(
    state: &DraftState,
    event: DraftEvent,
) -> Result<(DraftState, Vec<DraftEffect>), DraftError> {
    let mut next = state.clone();
    let effects = next.apply(event)?;
    Ok((next, effects))
}

impl DraftState {
    /// New idle draft. Seat 0 is the match creator.
    ///
    /// Participants start out connected as far as forfeiture accounting is
    /// concerned; the coordinator reports disconnections as they happen.
    pub fn new(rules: DraftRules, seats: [ParticipantId; 2]) -> Self {
        Self {
            rules,
            seats,
            status: DraftStatus::Idle,
            turn: None,
            pick_index: 0,
            rosters: [Vec::new(), Vec::new()],
            picked: BTreeSet::new(),
            board: BTreeMap::new(),
            disconnected_since: [None, None],
            missed_turns: [0, 0],
        }
    }

    pub const fn status(&self) -> &DraftStatus {
        &self.status
    }

    pub const fn turn(&self) -> Option<&TurnState> {
        self.turn.as_ref()
    }

    pub const fn rules(&self) -> &DraftRules {
        &self.rules
    }

    pub const fn seats(&self) -> &[ParticipantId; 2] {
        &self.seats
    }

    pub const fn rosters(&self) -> &[Vec<PickSlot>; 2] {
        &self.rosters
    }

    pub const fn picks_made(&self) -> u32 {
        self.pick_index
    }

    pub const fn picked_symbols(&self) -> &BTreeSet<TokenSymbol> {
        &self.picked
    }

    pub fn roster_of(&self, participant: &str) -> Option<&[PickSlot]> {
        self.seat_of(participant).map(|s| self.rosters[s].as_slice())
    }

    pub fn missed_turns_of(&self, participant: &str) -> Option<u32> {
        self.seat_of(participant).map(|s| self.missed_turns[s])
    }

    /// Draftable tokens not yet picked, highest price first.
    pub fn remaining(&self) -> Vec<DraftableToken> {
        let mut tokens: Vec<DraftableToken> = self
            .board
            .iter()
            .filter(|(symbol, _)| !self.picked.contains(*symbol))
            .map(|(symbol, price)| DraftableToken {
                symbol: symbol.clone(),
                price: *price,
            })
            .collect();
        tokens.sort_by(|a, b| b.price.total_cmp(&a.price).then_with(|| a.symbol.cmp(&b.symbol)));
        tokens
    }

    fn seat_of(&self, participant: &str) -> Option<usize> {
        self.seats.iter().position(|p| p == participant)
    }

    /// Seat that owns a given global pick index under snake order.
    pub const fn seat_for_pick(&self, pick_index: u32) -> usize {
        let first = self.rules.first_picker.seat();
        let round = pick_index / PICKS_PER_ROUND + 1;
        let position = (pick_index % PICKS_PER_ROUND) as usize;
        let forward = round % 2 == 1;
        if forward == (position == 0) {
            first
        } else {
            1 - first
        }
    }

    fn apply(&mut self, event: DraftEvent) -> Result<Vec<DraftEffect>, DraftError> {
        match event {
            DraftEvent::Start { draftable, now } => self.start(draftable, now),
            DraftEvent::SubmitPick {
                participant,
                token_symbol,
                at_pick_index,
                now,
            } => self.submit_pick(&participant, &token_symbol, at_pick_index, now),
            DraftEvent::Timeout { at_pick_index, now } => Ok(self.on_timeout(at_pick_index, now)),
            DraftEvent::ConnectionChanged {
                participant,
                connected,
                now,
            } => self.connection_changed(&participant, connected, now),
            DraftEvent::RefreshDraftable { draftable } => self.refresh(draftable),
        }
    }

    fn start(
        &mut self,
        draftable: Vec<DraftableToken>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DraftEffect>, DraftError> {
        if self.status != DraftStatus::Idle {
            return Err(DraftError::AlreadyStarted);
        }

        let board = build_board(draftable);
        let needed = self.rules.match_type.total_picks() as usize;
        if board.len() < needed {
            return Err(DraftError::InsufficientDraftable {
                needed,
                available: board.len(),
            });
        }

        self.board = board;
        self.status = DraftStatus::Active;
        Ok(self.open_turn(now))
    }

    fn submit_pick(
        &mut self,
        participant: &str,
        token_symbol: &str,
        at_pick_index: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DraftEffect>, DraftError> {
        let turn = match (&self.status, &self.turn) {
            (DraftStatus::Active, Some(turn)) => turn,
            _ => return Err(DraftError::DraftNotActive),
        };

        if turn.active_participant != participant {
            return Err(DraftError::NotYourTurn {
                participant: participant.to_string(),
            });
        }
        if at_pick_index != turn.current_pick_index {
            return Err(DraftError::StaleTurn {
                submitted: at_pick_index,
                current: turn.current_pick_index,
            });
        }

        let symbol = normalize_symbol(token_symbol);
        if self.picked.contains(&symbol) {
            return Err(DraftError::TokenAlreadyPicked(symbol));
        }
        if !self.board.contains_key(&symbol) {
            return Err(DraftError::TokenNotDraftable(symbol));
        }

        let seat = self.seat_for_pick(self.pick_index);
        self.missed_turns[seat] = 0;

        let mut effects = vec![DraftEffect::CancelTimeout {
            pick_index: self.pick_index,
        }];
        effects.extend(self.apply_pick(seat, symbol, now, false));
        Ok(effects)
    }

    /// Auto-pick on deadline expiry, or forfeit a long-absent participant.
    ///
    /// A timeout for any index other than the current one is a no-op, so a
    /// second expiry check for the same pick never double-applies. Only a
    /// connected opponent can win by forfeit; with both seats absent the
    /// draft keeps auto-picking until the match is abandoned.
    fn on_timeout(&mut self, at_pick_index: u32, now: DateTime<Utc>) -> Vec<DraftEffect> {
        let current = match (&self.status, &self.turn) {
            (DraftStatus::Active, Some(turn)) => turn.current_pick_index,
            _ => return Vec::new(),
        };
        if at_pick_index != current {
            return Vec::new();
        }

        let seat = self.seat_for_pick(self.pick_index);
        let past_grace = self.disconnected_since[seat]
            .is_some_and(|since| now - since >= self.rules.grace_period);

        if past_grace {
            self.missed_turns[seat] += 1;
        } else {
            self.missed_turns[seat] = 0;
        }

        let opponent_connected = self.disconnected_since[1 - seat].is_none();
        if past_grace
            && opponent_connected
            && self.missed_turns[seat] >= self.rules.forfeit_after_missed_turns
        {
            let winner = self.seats[1 - seat].clone();
            let loser = self.seats[seat].clone();
            self.status = DraftStatus::Forfeited {
                winner: winner.clone(),
            };
            self.turn = None;
            return vec![DraftEffect::Forfeited { winner, loser }];
        }

        match self.auto_pick_choice() {
            Some(symbol) => self.apply_pick(seat, symbol, now, true),
            // Unreachable while the board covers every remaining pick.
            None => Vec::new(),
        }
    }

    fn connection_changed(
        &mut self,
        participant: &str,
        connected: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<DraftEffect>, DraftError> {
        let seat = self
            .seat_of(participant)
            .ok_or_else(|| DraftError::UnknownParticipant(participant.to_string()))?;

        if connected {
            self.disconnected_since[seat] = None;
            self.missed_turns[seat] = 0;
        } else if self.disconnected_since[seat].is_none() {
            self.disconnected_since[seat] = Some(now);
        }
        Ok(Vec::new())
    }

    fn refresh(&mut self, draftable: Vec<DraftableToken>) -> Result<Vec<DraftEffect>, DraftError> {
        let board = build_board(draftable);
        let remaining_picks = (self.rules.match_type.total_picks() - self.pick_index) as usize;
        let unpicked = board.keys().filter(|s| !self.picked.contains(*s)).count();

        if self.status == DraftStatus::Active && unpicked < remaining_picks {
            return Err(DraftError::InsufficientDraftable {
                needed: remaining_picks,
                available: unpicked,
            });
        }

        self.board = board;
        Ok(Vec::new())
    }

    /// Highest-priced unpicked token; ties go to the smaller symbol.
    fn auto_pick_choice(&self) -> Option<TokenSymbol> {
        let mut best: Option<(&TokenSymbol, f64)> = None;
        // BTreeMap iterates in symbol order, so strict `>` keeps the smaller symbol on ties.
        for (symbol, &price) in &self.board {
            if self.picked.contains(symbol) {
                continue;
            }
            if best.is_none_or(|(_, best_price)| price > best_price) {
                best = Some((symbol, price));
            }
        }
        best.map(|(symbol, _)| symbol.clone())
    }

    fn apply_pick(
        &mut self,
        seat: usize,
        symbol: TokenSymbol,
        now: DateTime<Utc>,
        auto_picked: bool,
    ) -> Vec<DraftEffect> {
        let slot = PickSlot {
            slot_index: self.rosters[seat].len() as u32,
            token_symbol: symbol.clone(),
            pick_round: self.pick_index / PICKS_PER_ROUND + 1,
            filled_at: now,
            auto_picked,
        };

        self.rosters[seat].push(slot.clone());
        self.picked.insert(symbol);
        self.pick_index += 1;

        let mut effects = vec![DraftEffect::PickApplied {
            participant: self.seats[seat].clone(),
            slot,
        }];

        if self.pick_index >= self.rules.match_type.total_picks() {
            self.status = DraftStatus::Completed;
            self.turn = None;
            effects.push(DraftEffect::Completed);
        } else {
            effects.extend(self.open_turn(now));
        }
        effects
    }

    fn open_turn(&mut self, now: DateTime<Utc>) -> Vec<DraftEffect> {
        let seat = self.seat_for_pick(self.pick_index);
        let deadline = now + self.rules.per_pick_timeout;
        let turn = TurnState {
            current_pick_index: self.pick_index,
            current_round: self.pick_index / PICKS_PER_ROUND + 1,
            active_participant: self.seats[seat].clone(),
            deadline,
        };
        self.turn = Some(turn.clone());

        vec![
            DraftEffect::TurnUpdate(turn),
            DraftEffect::ScheduleTimeout {
                pick_index: self.pick_index,
                deadline,
            },
        ]
    }
}

fn build_board(draftable: Vec<DraftableToken>) -> BTreeMap<TokenSymbol, f64> {
    draftable
        .into_iter()
        .filter(|t| t.price.is_finite() && t.price > 0.0)
        .map(|t| (normalize_symbol(&t.symbol), t.price))
        .collect()
}
