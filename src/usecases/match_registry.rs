//! Match Registry - Session Creation and Routing
//!
//! Creates matches, spawns one session task per match and routes
//! participant commands to it by match id. Results stay reachable
//! through the result book after a session task has exited.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::domain::matchup::{Identity, Match, MatchId, MatchResult, MatchType, PickSlot};
use crate::usecases::draft_session::{
  Envelope, SessionDeps, SessionError, SessionHandle, SessionSettings, SessionView, spawn_session,
};

/// Builds per-match session settings from configuration.
pub trait SettingsSource: Send + Sync + 'static {
  fn settings_for(&self, match_type: MatchType) -> SessionSettings;
}

impl SettingsSource for AppConfig {
  fn settings_for(&self, match_type: MatchType) -> SessionSettings {
    SessionSettings {
      rules: self.draft.rules(match_type),
      window: self.competition.window(match_type),
      abandon_after: self.draft.abandon_after(),
      draftable_retry: self.draft.draftable_retry(),
    }
  }
}

pub struct MatchRegistry {
  settings: Arc<dyn SettingsSource>,
  deps: SessionDeps,
  sessions: RwLock<HashMap<MatchId, SessionHandle>>,
}

impl MatchRegistry {
  pub fn new(settings: Arc<dyn SettingsSource>, deps: SessionDeps) -> Self {
    Self {
      settings,
      deps,
      sessions: RwLock::new(HashMap::new()),
    }
  }

  /// Create a match between two identities and start its session.
  pub async fn create_match(
    &self,
    match_type: MatchType,
    creator: Identity,
    opponent: Identity,
  ) -> Result<MatchId, SessionError> {
    if creator.participant_id == opponent.participant_id {
      return Err(SessionError::SelfMatch);
    }

    let info = Match::new(match_type, creator, opponent);
    let match_id = info.match_id.clone();
    let settings = self.settings.settings_for(match_type);
    let (handle, _task) = spawn_session(info, settings, self.deps.clone());

    let mut sessions = self.sessions.write().await;
    sessions.retain(|_, h| !h.is_closed());
    sessions.insert(match_id.clone(), handle);
    let active = sessions.len();
    drop(sessions);

    info!(match_id = %match_id, match_type = %match_type, active, "Match created");
    Ok(match_id)
  }

  /// An ended session without a result was voided by abandonment.
  async fn session(&self, match_id: &str) -> Result<SessionHandle, SessionError> {
    let handle = self.sessions.read().await.get(match_id).cloned();
    match handle {
      Some(handle) if !handle.is_closed() => Ok(handle),
      Some(_) if self.deps.results.get(match_id).await.is_some() => {
        Err(SessionError::SessionClosed)
      }
      Some(_) => Err(SessionError::MatchAbandoned),
      None => Err(SessionError::MatchNotFound(match_id.to_string())),
    }
  }

  /// Attach (or re-attach) a participant's outbound channel.
  pub async fn join(
    &self,
    match_id: &str,
    participant: &str,
    connection: u64,
    outbound: mpsc::UnboundedSender<Envelope>,
  ) -> Result<SessionView, SessionError> {
    self
      .session(match_id)
      .await?
      .attach(participant, connection, outbound)
      .await
  }

  pub async fn leave(&self, match_id: &str, participant: &str, connection: u64) {
    if let Ok(session) = self.session(match_id).await {
      if session.detach(participant, connection).await.is_err() {
        debug!(match_id, participant, "Detach after session ended");
      }
    }
  }

  pub async fn submit_pick(
    &self,
    match_id: &str,
    participant: &str,
    token_symbol: &str,
    pick_index: u32,
  ) -> Result<PickSlot, SessionError> {
    self
      .session(match_id)
      .await?
      .submit_pick(participant, token_symbol, pick_index)
      .await
  }

  pub async fn close_window(&self, match_id: &str) -> Result<(), SessionError> {
    self.session(match_id).await?.close_window().await
  }

  pub async fn abandon(&self, match_id: &str) -> Result<(), SessionError> {
    self.session(match_id).await?.abandon().await
  }

  pub async fn snapshot(&self, match_id: &str) -> Result<SessionView, SessionError> {
    self.session(match_id).await?.snapshot().await
  }

  /// Final result of a match, if it has one.
  pub async fn result(&self, match_id: &str) -> Option<MatchResult> {
    self.deps.results.get(match_id).await
  }

  /// Sessions whose tasks are still running.
  pub async fn active_sessions(&self) -> usize {
    self
      .sessions
      .read()
      .await
      .values()
      .filter(|h| !h.is_closed())
      .count()
  }
}
