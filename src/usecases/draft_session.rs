//! Draft Session - Per-match Coordinator Task
//!
//! Owns one match end to end: participant channels, the draft state
//! machine, the match phase and the hand-off to settlement. Each match
//! runs as its own tokio task; everything that mutates the match goes
//! through the task's command channel, so picks, timeouts and
//! connection changes are applied strictly one at a time.
//!
//! Session flow:
//! 1. Both participants attach → fetch draftable list → draft starts
//! 2. Picks and deadline auto-picks until the draft completes
//! 3. Capture entry prices → phase `live` → window timer
//! 4. Window closes → phase `settled` → settlement → result published

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::domain::draft::{DraftEffect, DraftEvent, DraftRules, DraftState, DraftStatus, transition};
use crate::domain::errors::{DraftError, ErrorKind};
use crate::domain::matchup::{
  ConnectionStatus, DraftableToken, MarketSnapshot, Match, MatchId, MatchResult, ParticipantId,
  Phase, PickSlot, TokenSymbol, TurnState,
};
use crate::ports::match_observer::MatchObserver;
use crate::ports::price_oracle::PriceOracle;
use crate::usecases::results::ResultBook;
use crate::usecases::settlement::{SettlementEngine, SettlementRequest};
use crate::usecases::timers::{MatchClock, MatchTimers, TimerKey};

/// Commands queued per session before senders wait.
const COMMAND_BUFFER: usize = 64;

/// Rejections surfaced to a participant's action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
  #[error(transparent)]
  Draft(#[from] DraftError),

  #[error("match is {0}, picks are closed")]
  PhaseClosed(Phase),

  #[error("{0} is not a participant in this match")]
  NotAParticipant(ParticipantId),

  #[error("match {0} not found")]
  MatchNotFound(MatchId),

  #[error("a participant cannot play against themselves")]
  SelfMatch,

  #[error("match session has ended")]
  SessionClosed,

  #[error("match was abandoned")]
  MatchAbandoned,
}

impl SessionError {
  pub const fn kind(&self) -> ErrorKind {
    match self {
      Self::Draft(e) => e.kind(),
      Self::PhaseClosed(_) | Self::SessionClosed => ErrorKind::PhaseClosed,
      Self::NotAParticipant(_) | Self::MatchNotFound(_) => ErrorKind::NotFound,
      Self::SelfMatch => ErrorKind::AuthFailure,
      Self::MatchAbandoned => ErrorKind::MatchAbandoned,
    }
  }
}

/// Outbound events, delivered to both seats in the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
  TurnUpdate(TurnState),
  PickApplied {
    participant: ParticipantId,
    slot: PickSlot,
  },
  MatchPhase {
    phase: Phase,
  },
  MatchResult {
    result: MatchResult,
  },
}

/// A session event stamped with its per-match sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
  pub match_id: MatchId,
  pub seq: u64,
  #[serde(flatten)]
  pub event: SessionEvent,
}

/// Point-in-time view of a session, handed out on attach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
  #[serde(rename = "match")]
  pub info: Match,
  pub turn: Option<TurnState>,
  /// Seat order (creator first).
  pub rosters: [Vec<PickSlot>; 2],
  pub remaining: Vec<DraftableToken>,
  /// Sequence number of the last event emitted so far.
  pub last_seq: u64,
}

/// Per-match timing, resolved from configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
  pub rules: DraftRules,
  /// Competition window after the draft completes.
  pub window: Duration,
  /// How long the match may sit without both participants before it is voided.
  pub abandon_after: Duration,
  /// Delay before retrying a failed draftable fetch.
  pub draftable_retry: Duration,
}

/// Shared collaborators every session uses.
#[derive(Clone)]
pub struct SessionDeps {
  pub oracle: Arc<dyn PriceOracle>,
  pub settlement: Arc<SettlementEngine>,
  pub results: Arc<ResultBook>,
  pub observer: Arc<dyn MatchObserver>,
}

pub enum SessionCommand {
  Attach {
    participant: ParticipantId,
    /// Distinguishes a reconnect from a late detach of the old socket.
    connection: u64,
    outbound: mpsc::UnboundedSender<Envelope>,
    reply: oneshot::Sender<Result<SessionView, SessionError>>,
  },
  Detach {
    participant: ParticipantId,
    connection: u64,
  },
  SubmitPick {
    participant: ParticipantId,
    token_symbol: TokenSymbol,
    pick_index: u32,
    reply: oneshot::Sender<Result<PickSlot, SessionError>>,
  },
  /// Close the competition window now. Idempotent.
  CloseWindow,
  /// Void the match unless it already ended.
  Abandon,
  Snapshot {
    reply: oneshot::Sender<SessionView>,
  },
}

/// Cloneable sender side of a running session.
#[derive(Clone)]
pub struct SessionHandle {
  match_id: MatchId,
  tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
  pub fn match_id(&self) -> &MatchId {
    &self.match_id
  }

  /// Whether the session task has exited.
  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }

  pub async fn attach(
    &self,
    participant: &str,
    connection: u64,
    outbound: mpsc::UnboundedSender<Envelope>,
  ) -> Result<SessionView, SessionError> {
    let (reply, rx) = oneshot::channel();
    self
      .send(SessionCommand::Attach {
        participant: participant.to_string(),
        connection,
        outbound,
        reply,
      })
      .await?;
    rx.await.map_err(|_| SessionError::SessionClosed)?
  }

  pub async fn detach(&self, participant: &str, connection: u64) -> Result<(), SessionError> {
    self
      .send(SessionCommand::Detach {
        participant: participant.to_string(),
        connection,
      })
      .await
  }

  pub async fn submit_pick(
    &self,
    participant: &str,
    token_symbol: &str,
    pick_index: u32,
  ) -> Result<PickSlot, SessionError> {
    let (reply, rx) = oneshot::channel();
    self
      .send(SessionCommand::SubmitPick {
        participant: participant.to_string(),
        token_symbol: token_symbol.to_string(),
        pick_index,
        reply,
      })
      .await?;
    rx.await.map_err(|_| SessionError::SessionClosed)?
  }

  pub async fn close_window(&self) -> Result<(), SessionError> {
    self.send(SessionCommand::CloseWindow).await
  }

  pub async fn abandon(&self) -> Result<(), SessionError> {
    self.send(SessionCommand::Abandon).await
  }

  pub async fn snapshot(&self) -> Result<SessionView, SessionError> {
    let (reply, rx) = oneshot::channel();
    self.send(SessionCommand::Snapshot { reply }).await?;
    rx.await.map_err(|_| SessionError::SessionClosed)
  }

  async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
    self
      .tx
      .send(command)
      .await
      .map_err(|_| SessionError::SessionClosed)
  }
}

/// Spawn the session task for a new match and return its handle.
pub fn spawn_session(
  info: Match,
  settings: SessionSettings,
  deps: SessionDeps,
) -> (SessionHandle, tokio::task::JoinHandle<()>) {
  let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
  let handle = SessionHandle {
    match_id: info.match_id.clone(),
    tx,
  };
  let session = MatchSession::new(info, settings, deps, rx);
  let task = tokio::spawn(session.run());
  (handle, task)
}

struct Seat {
  outbound: Option<(u64, mpsc::UnboundedSender<Envelope>)>,
  /// Events emitted while the seat had no live channel.
  backlog: Vec<Envelope>,
}

impl Seat {
  const fn empty() -> Self {
    Self {
      outbound: None,
      backlog: Vec::new(),
    }
  }
}

struct MatchSession {
  info: Match,
  draft: DraftState,
  settings: SessionSettings,
  deps: SessionDeps,
  clock: MatchClock,
  timers: MatchTimers,
  seats: [Seat; 2],
  seq: u64,
  entry: Vec<MarketSnapshot>,
  rx: mpsc::Receiver<SessionCommand>,
  /// False once every handle is gone; timers still run to completion.
  accepting: bool,
}

impl MatchSession {
  fn new(
    info: Match,
    settings: SessionSettings,
    deps: SessionDeps,
    rx: mpsc::Receiver<SessionCommand>,
  ) -> Self {
    let draft = DraftState::new(settings.rules.clone(), info.participant_ids());
    Self {
      info,
      draft,
      settings,
      deps,
      clock: MatchClock::start(),
      timers: MatchTimers::new(),
      seats: [Seat::empty(), Seat::empty()],
      seq: 0,
      entry: Vec::new(),
      rx,
      accepting: true,
    }
  }

  #[instrument(skip(self), fields(match_id = %self.info.match_id, match_type = %self.info.match_type))]
  async fn run(mut self) {
    info!("Match session started");
    self.deps.observer.match_opened(self.info.match_type);
    self.refresh_abandonment();

    while !self.info.phase.is_terminal() {
      if !self.accepting && self.timers.is_empty() {
        warn!("Session has no handles and nothing scheduled");
        break;
      }

      let deadline = self.timers.next_deadline();
      tokio::select! {
        command = self.rx.recv(), if self.accepting => match command {
          Some(command) => self.handle(command).await,
          None => self.accepting = false,
        },
        () = sleep_until(deadline) => self.fire_due_timers().await,
      }
    }

    self.timers.cancel_all();
    self.deps.observer.match_closed(self.info.match_type, self.info.phase);
    info!(phase = %self.info.phase, events = self.seq, "Match session ended");
  }

  async fn handle(&mut self, command: SessionCommand) {
    match command {
      SessionCommand::Attach {
        participant,
        connection,
        outbound,
        reply,
      } => {
        let result = self.attach(&participant, connection, outbound);
        let attached = result.is_ok();
        let _ = reply.send(result);
        if attached {
          self.maybe_start().await;
          self.refresh_abandonment();
        }
      }
      SessionCommand::Detach {
        participant,
        connection,
      } => self.detach(&participant, connection),
      SessionCommand::SubmitPick {
        participant,
        token_symbol,
        pick_index,
        reply,
      } => self.submit_pick(participant, token_symbol, pick_index, reply).await,
      SessionCommand::CloseWindow => self.close_window().await,
      SessionCommand::Abandon => self.abandon("explicit abandon"),
      SessionCommand::Snapshot { reply } => {
        let _ = reply.send(self.view());
      }
    }
  }

  fn attach(
    &mut self,
    participant: &str,
    connection: u64,
    outbound: mpsc::UnboundedSender<Envelope>,
  ) -> Result<SessionView, SessionError> {
    let seat = self
      .info
      .seat_of(participant)
      .ok_or_else(|| SessionError::NotAParticipant(participant.to_string()))?;

    let view = self.view();

    let backlog = std::mem::take(&mut self.seats[seat].backlog);
    let flushed = backlog.len();
    let mut pending = backlog.into_iter();
    while let Some(envelope) = pending.next() {
      if let Err(unsent) = outbound.send(envelope) {
        // Receiver already gone: keep the rest for the next attach.
        self.seats[seat].backlog.push(unsent.0);
        self.seats[seat].backlog.extend(pending);
        return Ok(view);
      }
    }

    self.seats[seat].outbound = Some((connection, outbound));
    self.info.participants[seat].connection_status = ConnectionStatus::Connected;
    self.note_connection(seat, true);

    info!(participant, connection, flushed, "Participant attached");
    Ok(view)
  }

  fn detach(&mut self, participant: &str, connection: u64) {
    let Some(seat) = self.info.seat_of(participant) else {
      return;
    };
    let current = self.seats[seat]
      .outbound
      .as_ref()
      .is_some_and(|(id, _)| *id == connection);
    if !current {
      debug!(participant, connection, "Ignoring detach of a replaced connection");
      return;
    }

    self.mark_disconnected(seat);
    info!(participant, connection, "Participant detached");
    self.refresh_abandonment();
  }

  /// Start the draft once both seats are present.
  async fn maybe_start(&mut self) {
    if self.info.phase != Phase::Drafting
      || *self.draft.status() != DraftStatus::Idle
      || !self.info.both_connected()
      || self.timers.is_scheduled(TimerKey::DraftableRetry)
    {
      return;
    }

    let draftable = match self.deps.oracle.list_draftable().await {
      Ok(list) => list,
      Err(e) => {
        warn!(error = %e, "Draftable list unavailable, retrying");
        self.schedule_draftable_retry();
        return;
      }
    };

    let event = DraftEvent::Start {
      draftable,
      now: self.clock.now(),
    };
    match transition(&self.draft, event) {
      Ok((next, effects)) => {
        self.draft = next;
        info!(tokens = self.draft.remaining().len(), "Draft started");
        self.apply_effects(effects).await;
      }
      Err(e) => {
        warn!(error = %e, "Draft could not start, retrying");
        self.schedule_draftable_retry();
      }
    }
  }

  fn schedule_draftable_retry(&mut self) {
    let at = Instant::now() + self.settings.draftable_retry;
    self.timers.schedule(TimerKey::DraftableRetry, at);
  }

  async fn submit_pick(
    &mut self,
    participant: ParticipantId,
    token_symbol: TokenSymbol,
    pick_index: u32,
    reply: oneshot::Sender<Result<PickSlot, SessionError>>,
  ) {
    if self.info.phase != Phase::Drafting {
      self.reject(reply, SessionError::PhaseClosed(self.info.phase));
      return;
    }
    if self.info.seat_of(&participant).is_none() {
      self.reject(reply, SessionError::NotAParticipant(participant));
      return;
    }

    let event = DraftEvent::SubmitPick {
      participant: participant.clone(),
      token_symbol,
      at_pick_index: pick_index,
      now: self.clock.now(),
    };
    match transition(&self.draft, event) {
      Ok((next, effects)) => {
        self.draft = next;
        let slot = effects.iter().find_map(|effect| match effect {
          DraftEffect::PickApplied { slot, .. } => Some(slot.clone()),
          _ => None,
        });
        if let Some(slot) = slot {
          info!(participant = %participant, pick_index, token = %slot.token_symbol, "Pick applied");
          let _ = reply.send(Ok(slot));
        }
        self.apply_effects(effects).await;
      }
      Err(e) => {
        debug!(participant = %participant, pick_index, error = %e, "Pick rejected");
        self.reject(reply, e.into());
      }
    }
  }

  fn reject<T>(&self, reply: oneshot::Sender<Result<T, SessionError>>, error: SessionError) {
    self.deps.observer.action_rejected(error.kind());
    let _ = reply.send(Err(error));
  }

  async fn fire_due_timers(&mut self) {
    let now = Instant::now();
    while let Some(key) = self.timers.pop_due(now) {
      if self.info.phase.is_terminal() {
        break;
      }
      match key {
        TimerKey::PickDeadline(pick_index) => self.on_pick_deadline(pick_index).await,
        TimerKey::DraftableRetry => self.maybe_start().await,
        TimerKey::Abandonment => self.abandon("participants absent past the abandonment ceiling"),
        TimerKey::WindowClose => self.close_window().await,
      }
    }
  }

  async fn on_pick_deadline(&mut self, pick_index: u32) {
    let current = self.draft.turn().map(|t| t.current_pick_index);
    if self.info.phase != Phase::Drafting || current != Some(pick_index) {
      return;
    }

    // Auto-pick from the freshest board available; keep the old one on failure.
    match self.deps.oracle.list_draftable().await {
      Ok(draftable) => match transition(&self.draft, DraftEvent::RefreshDraftable { draftable }) {
        Ok((next, _)) => self.draft = next,
        Err(e) => debug!(error = %e, "Keeping previous draftable board"),
      },
      Err(e) => debug!(error = %e, "Draftable refresh failed before auto-pick"),
    }

    let event = DraftEvent::Timeout {
      at_pick_index: pick_index,
      now: self.clock.now(),
    };
    match transition(&self.draft, event) {
      Ok((next, effects)) => {
        self.draft = next;
        if !effects.is_empty() {
          info!(pick_index, "Pick deadline elapsed");
        }
        self.apply_effects(effects).await;
      }
      Err(e) => warn!(pick_index, error = %e, "Timeout rejected by draft"),
    }
  }

  async fn apply_effects(&mut self, effects: Vec<DraftEffect>) {
    for effect in effects {
      match effect {
        DraftEffect::TurnUpdate(turn) => self.broadcast(SessionEvent::TurnUpdate(turn)),
        DraftEffect::PickApplied { participant, slot } => {
          self.deps.observer.pick_applied(slot.auto_picked);
          self.broadcast(SessionEvent::PickApplied { participant, slot });
        }
        DraftEffect::ScheduleTimeout {
          pick_index,
          deadline,
        } => {
          let at = self.clock.instant_at(deadline);
          self.timers.schedule(TimerKey::PickDeadline(pick_index), at);
        }
        DraftEffect::CancelTimeout { pick_index } => {
          self.timers.cancel(TimerKey::PickDeadline(pick_index));
        }
        DraftEffect::Completed => self.on_draft_completed().await,
        DraftEffect::Forfeited { winner, loser } => self.on_forfeit(winner, &loser).await,
      }
    }
    self.refresh_abandonment();
  }

  async fn on_draft_completed(&mut self) {
    let symbols = self.draft.picked_symbols().clone();
    self.entry = self.deps.settlement.capture_entry(&symbols).await;

    self.info.phase = Phase::Live;
    self.timers.cancel(TimerKey::Abandonment);
    self
      .timers
      .schedule(TimerKey::WindowClose, Instant::now() + self.settings.window);
    self.broadcast(SessionEvent::MatchPhase { phase: Phase::Live });

    info!(
      tokens = symbols.len(),
      window_secs = self.settings.window.as_secs(),
      "Draft completed, match is live"
    );
  }

  async fn on_forfeit(&mut self, winner: ParticipantId, loser: &str) {
    self.info.phase = Phase::Void;
    self.timers.cancel_all();

    let result = MatchResult::forfeit(
      self.info.match_id.clone(),
      &self.info.participant_ids(),
      winner.clone(),
      self.clock.now(),
    );
    warn!(winner = %winner, loser, "Match forfeited");

    self.broadcast(SessionEvent::MatchPhase { phase: Phase::Void });
    self.broadcast(SessionEvent::MatchResult {
      result: result.clone(),
    });
    self.deps.results.publish(&result).await;
  }

  /// Settle once the window has elapsed. Later calls are no-ops.
  async fn close_window(&mut self) {
    if self.info.phase != Phase::Live {
      debug!(phase = %self.info.phase, "Window close ignored");
      return;
    }

    self.info.phase = Phase::Settled;
    self.timers.cancel_all();
    self.broadcast(SessionEvent::MatchPhase {
      phase: Phase::Settled,
    });

    let started = Instant::now();
    let request = SettlementRequest::from_draft(&self.info.match_id, &self.draft);
    let result = self.deps.settlement.settle(&request, &self.entry).await;
    self
      .deps
      .observer
      .settlement_duration(started.elapsed().as_secs_f64());

    self.broadcast(SessionEvent::MatchResult { result });
  }

  fn abandon(&mut self, reason: &str) {
    if self.info.phase.is_terminal() {
      return;
    }
    self.info.phase = Phase::Void;
    self.timers.cancel_all();
    self.broadcast(SessionEvent::MatchPhase { phase: Phase::Void });
    warn!(reason, "Match abandoned");
  }

  /// Keep the abandonment timer armed only while the match is at risk.
  ///
  /// Before the draft starts the match is at risk until both seats are
  /// present; once it is running, only when both are gone.
  fn refresh_abandonment(&mut self) {
    if self.info.phase != Phase::Drafting {
      self.timers.cancel(TimerKey::Abandonment);
      return;
    }

    let at_risk = match self.draft.status() {
      DraftStatus::Idle => !self.info.both_connected(),
      _ => self.info.both_disconnected(),
    };

    if !at_risk {
      self.timers.cancel(TimerKey::Abandonment);
    } else if !self.timers.is_scheduled(TimerKey::Abandonment) {
      let at = Instant::now() + self.settings.abandon_after;
      self.timers.schedule(TimerKey::Abandonment, at);
    }
  }

  fn broadcast(&mut self, event: SessionEvent) {
    self.seq += 1;
    let envelope = Envelope {
      match_id: self.info.match_id.clone(),
      seq: self.seq,
      event,
    };

    for seat in 0..2 {
      let delivered = match &self.seats[seat].outbound {
        Some((_, tx)) => tx.send(envelope.clone()).is_ok(),
        None => false,
      };
      if !delivered {
        if self.seats[seat].outbound.is_some() {
          self.mark_disconnected(seat);
        }
        self.seats[seat].backlog.push(envelope.clone());
      }
    }
  }

  fn mark_disconnected(&mut self, seat: usize) {
    self.seats[seat].outbound = None;
    self.info.participants[seat].connection_status = ConnectionStatus::Disconnected;
    self.note_connection(seat, false);
  }

  fn note_connection(&mut self, seat: usize, connected: bool) {
    let event = DraftEvent::ConnectionChanged {
      participant: self.info.participants[seat].identity.clone(),
      connected,
      now: self.clock.now(),
    };
    if let Ok((next, _)) = transition(&self.draft, event) {
      self.draft = next;
    }
  }

  fn view(&self) -> SessionView {
    SessionView {
      info: self.info.clone(),
      turn: self.draft.turn().cloned(),
      rosters: self.draft.rosters().clone(),
      remaining: self.draft.remaining(),
      last_seq: self.seq,
    }
  }
}

async fn sleep_until(deadline: Option<Instant>) {
  match deadline {
    Some(at) => tokio::time::sleep_until(at).await,
    None => std::future::pending().await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_envelope_wire_shape() {
    let envelope = Envelope {
      match_id: "m-1".into(),
      seq: 7,
      event: SessionEvent::MatchPhase { phase: Phase::Live },
    };
    let json = serde_json::to_value(&envelope).unwrap();
    assert_eq!(json["type"], "matchPhase");
    assert_eq!(json["matchId"], "m-1");
    assert_eq!(json["seq"], 7);
    assert_eq!(json["phase"], "live");
  }

  #[test]
  fn test_session_error_kinds() {
    assert_eq!(SessionError::PhaseClosed(Phase::Live).kind(), ErrorKind::PhaseClosed);
    assert_eq!(SessionError::MatchNotFound("x".into()).kind(), ErrorKind::NotFound);
    assert_eq!(SessionError::MatchAbandoned.kind(), ErrorKind::MatchAbandoned);
    assert_eq!(
      SessionError::from(DraftError::TokenNotDraftable("X".into())).kind(),
      ErrorKind::PickInvalid
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_sleep_until_without_deadline_never_fires() {
    let mut idle = tokio_test::task::spawn(sleep_until(None));
    tokio_test::assert_pending!(idle.poll());
    tokio::time::advance(Duration::from_secs(3_600)).await;
    tokio_test::assert_pending!(idle.poll());

    let mut armed = tokio_test::task::spawn(sleep_until(Some(Instant::now() + Duration::from_secs(5))));
    tokio_test::assert_pending!(armed.poll());
    tokio::time::advance(Duration::from_secs(5)).await;
    tokio_test::assert_ready!(armed.poll());
  }
}
