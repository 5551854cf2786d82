//! HTTP API - Sign-in and Match Endpoints
//!
//! axum 0.7 router for the auth boundary and match management:
//! - `GET  /challenge`           issue a sign-in challenge
//! - `POST /verify`              verify a signed challenge, issue a session token
//! - `POST /matches`             create a match (bearer session token)
//! - `GET  /matches/:id`         current session view (bearer, participants only)
//! - `GET  /matches/:id/result`  final result once produced

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use super::session_token::SessionTokens;
use crate::domain::errors::ErrorKind;
use crate::domain::matchup::{Identity, MatchId, MatchType};
use crate::usecases::draft_session::SessionError;
use crate::usecases::identity::{IdentityVerifier, identity_from_address};
use crate::usecases::match_registry::MatchRegistry;

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
  pub verifier: Arc<IdentityVerifier>,
  pub tokens: Arc<SessionTokens>,
  pub registry: Arc<MatchRegistry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeResponse {
  nonce: String,
  message: String,
  expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
  message: String,
  signature: String,
  address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
  identity: Identity,
  session_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMatchRequest {
  match_type: MatchType,
  /// Opponent wallet address.
  opponent: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMatchResponse {
  match_id: MatchId,
}

/// Error body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiError {
  #[serde(skip)]
  status: StatusCode,
  kind: ErrorKind,
  reason: String,
}

impl ApiError {
  fn new(status: StatusCode, kind: ErrorKind, reason: impl Into<String>) -> Self {
    Self {
      status,
      kind,
      reason: reason.into(),
    }
  }

  fn unauthorized(reason: impl Into<String>) -> Self {
    Self::new(StatusCode::UNAUTHORIZED, ErrorKind::AuthFailure, reason)
  }
}

impl From<SessionError> for ApiError {
  fn from(e: SessionError) -> Self {
    let status = match e.kind() {
      ErrorKind::NotFound => StatusCode::NOT_FOUND,
      ErrorKind::AuthFailure => StatusCode::BAD_REQUEST,
      _ => StatusCode::CONFLICT,
    };
    Self::new(status, e.kind(), e.to_string())
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (self.status, Json(self)).into_response()
  }
}

/// Build the API router.
pub fn router(state: ApiState) -> Router {
  Router::new()
    .route("/challenge", get(challenge))
    .route("/verify", post(verify))
    .route("/matches", post(create_match))
    .route("/matches/:id", get(match_view))
    .route("/matches/:id/result", get(match_result))
    .with_state(state)
}

/// Serve the API until shutdown.
#[instrument(skip(state, shutdown_rx))]
pub async fn serve(
  state: ApiState,
  bind_address: String,
  mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
  let listener = tokio::net::TcpListener::bind(&bind_address).await?;
  info!(address = %bind_address, "HTTP API started");

  axum::serve(listener, router(state))
    .with_graceful_shutdown(async move {
      let _ = shutdown_rx.recv().await;
    })
    .await?;

  Ok(())
}

async fn challenge(State(state): State<ApiState>) -> Json<ChallengeResponse> {
  let challenge = state.verifier.issue_challenge().await;
  Json(ChallengeResponse {
    nonce: challenge.nonce,
    message: challenge.message,
    expires_at: challenge.expires_at,
  })
}

async fn verify(
  State(state): State<ApiState>,
  Json(body): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
  let identity = state
    .verifier
    .verify(&body.message, &body.signature, &body.address)
    .await
    .map_err(|e| {
      warn!(address = %body.address, error = %e, "Sign-in rejected");
      ApiError::unauthorized(e.to_string())
    })?;

  let session_token = state.tokens.issue(&identity);
  Ok(Json(VerifyResponse {
    identity,
    session_token,
  }))
}

async fn create_match(
  State(state): State<ApiState>,
  headers: HeaderMap,
  Json(body): Json<CreateMatchRequest>,
) -> Result<(StatusCode, Json<CreateMatchResponse>), ApiError> {
  let creator = authenticate(&state, &headers)?;
  let opponent = identity_from_address(&body.opponent)
    .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.kind(), e.to_string()))?;

  let match_id = state
    .registry
    .create_match(body.match_type, creator, opponent)
    .await?;

  Ok((StatusCode::CREATED, Json(CreateMatchResponse { match_id })))
}

/// Session view for one of the match's participants.
async fn match_view(
  State(state): State<ApiState>,
  headers: HeaderMap,
  Path(match_id): Path<String>,
) -> Result<Response, ApiError> {
  let caller = authenticate(&state, &headers)?;
  let view = state.registry.snapshot(&match_id).await?;
  if view.info.seat_of(&caller.participant_id).is_none() {
    return Err(SessionError::NotAParticipant(caller.participant_id).into());
  }
  Ok(Json(view).into_response())
}

async fn match_result(
  State(state): State<ApiState>,
  Path(match_id): Path<String>,
) -> Result<Response, ApiError> {
  match state.registry.result(&match_id).await {
    Some(result) => Ok(Json(result).into_response()),
    None => Err(ApiError::new(
      StatusCode::NOT_FOUND,
      ErrorKind::NotFound,
      format!("no result for match {match_id}"),
    )),
  }
}

/// Resolve the caller from an `Authorization: Bearer <token>` header.
fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<Identity, ApiError> {
  let token = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

  state
    .tokens
    .validate(token)
    .map_err(|e| ApiError::unauthorized(e.to_string()))
}
