//! Session Gateway - WebSocket Draft Protocol
//!
//! Accepts participant sockets, authenticates them with a session
//! token and bridges them to match sessions. One connection may attach
//! to several matches; every attached match pushes its events into the
//! same outbound queue. Inbound messages are rate limited per
//! connection.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use super::protocol::{ClientMessage, ServerMessage};
use crate::adapters::api::session_token::SessionTokens;
use crate::domain::errors::ErrorKind;
use crate::domain::matchup::{Identity, MatchId};
use crate::usecases::draft_session::{Envelope, SessionError};
use crate::usecases::match_registry::MatchRegistry;

/// WebSocket front door for match sessions.
pub struct SessionGateway {
    registry: Arc<MatchRegistry>,
    tokens: Arc<SessionTokens>,
    max_messages_per_second: NonZeroU32,
    next_connection: AtomicU64,
}

/// Per-socket state.
struct Connection {
    id: u64,
    identity: Option<Identity>,
    joined: HashSet<MatchId>,
    limiter: DefaultDirectRateLimiter,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl SessionGateway {
    pub fn new(
        registry: Arc<MatchRegistry>,
        tokens: Arc<SessionTokens>,
        max_messages_per_second: u32,
    ) -> Self {
        Self {
            registry,
            tokens,
            max_messages_per_second: NonZeroU32::new(max_messages_per_second)
                .unwrap_or(NonZeroU32::MIN),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Bind and serve until shutdown.
    pub async fn serve(
        self: Arc<Self>,
        bind_address: &str,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("Failed to bind session gateway on {bind_address}"))?;
        self.run(listener, shutdown_rx).await
    }

    /// Accept loop on an already-bound listener.
    #[instrument(skip_all)]
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!(address = %listener.local_addr()?, "Session gateway started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received in session gateway");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    let gateway = Arc::clone(&self);
                    let shutdown = shutdown_rx.resubscribe();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws) => gateway.handle_socket(ws, addr, shutdown).await,
                            Err(e) => warn!(peer = %addr, error = %e, "WebSocket handshake failed"),
                        }
                    });
                }
            }
        }
    }

    /// Drive one socket until it closes or the service shuts down.
    #[instrument(skip(self, ws, shutdown_rx), fields(peer = %addr))]
    pub async fn handle_socket<S>(
        &self,
        ws: WebSocketStream<S>,
        addr: SocketAddr,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut write, mut read) = ws.split();
        let (outbound, mut events) = mpsc::unbounded_channel();
        let mut conn = Connection {
            id: self.next_connection.fetch_add(1, Ordering::Relaxed),
            identity: None,
            joined: HashSet::new(),
            limiter: RateLimiter::direct(Quota::per_second(self.max_messages_per_second)),
            outbound,
        };
        debug!(connection = conn.id, "Socket connected");

        loop {
            let outgoing = tokio::select! {
                _ = shutdown_rx.recv() => break,
                Some(envelope) = events.recv() => encode(&envelope),
                inbound = read.next() => match inbound {
                    Some(Ok(Message::Text(text))) => self.on_text(&mut conn, &text).await.and_then(|m| encode(&m)),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "Socket read error");
                        break;
                    }
                    Some(Ok(_)) => None,
                },
            };

            if let Some(text) = outgoing {
                if let Err(e) = write.send(Message::Text(text)).await {
                    debug!(error = %e, "Socket write failed");
                    break;
                }
            }
        }

        if let Some(identity) = &conn.identity {
            for match_id in &conn.joined {
                self.registry
                    .leave(match_id, &identity.participant_id, conn.id)
                    .await;
            }
        }
        let _ = write.close().await;
        debug!(connection = conn.id, "Socket closed");
    }

    async fn on_text(&self, conn: &mut Connection, text: &str) -> Option<ServerMessage> {
        if conn.limiter.check().is_err() {
            return Some(ServerMessage::rejected(
                ErrorKind::RateLimited,
                "too many messages, slow down",
            ));
        }

        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => return Some(ServerMessage::rejected(ErrorKind::Malformed, e)),
        };

        if let ClientMessage::Authenticate { session_token } = &message {
            return Some(match self.tokens.validate(session_token) {
                Ok(identity) => {
                    info!(connection = conn.id, participant = %identity.participant_id, "Socket authenticated");
                    conn.identity = Some(identity.clone());
                    ServerMessage::Authenticated { identity }
                }
                Err(e) => ServerMessage::rejected(ErrorKind::AuthFailure, e),
            });
        }

        let Some(participant) = conn.identity.as_ref().map(|i| i.participant_id.clone()) else {
            return Some(ServerMessage::rejected(
                ErrorKind::AuthFailure,
                "authenticate first",
            ));
        };

        match message {
            ClientMessage::Authenticate { .. } => None,
            ClientMessage::Reconnect { match_id } => {
                let joined = self
                    .registry
                    .join(&match_id, &participant, conn.id, conn.outbound.clone())
                    .await;
                match joined {
                    Ok(view) => {
                        conn.joined.insert(match_id);
                        Some(ServerMessage::Joined { view })
                    }
                    Err(SessionError::SessionClosed | SessionError::MatchNotFound(_)) => {
                        match self.registry.result(&match_id).await {
                            Some(result) => Some(ServerMessage::MatchResult { match_id, result }),
                            None => Some(ServerMessage::rejected(
                                ErrorKind::NotFound,
                                format!("match {match_id} is not running"),
                            )),
                        }
                    }
                    Err(e) => Some(ServerMessage::rejected(e.kind(), e)),
                }
            }
            ClientMessage::SubmitPick {
                match_id,
                token_symbol,
                pick_index,
            } => {
                let picked = self
                    .registry
                    .submit_pick(&match_id, &participant, &token_symbol, pick_index)
                    .await;
                // Accepted picks are confirmed by the session's own pickApplied event.
                picked
                    .err()
                    .map(|e| ServerMessage::rejected(e.kind(), e))
            }
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "Failed to encode outbound message");
            None
        }
    }
}
