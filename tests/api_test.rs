//! API Tests - HTTP Sign-in and WebSocket Session Protocol
//!
//! Binds the real axum router and session gateway on ephemeral ports
//! and drives them with reqwest and tokio-tungstenite clients.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use draft_duel::adapters::api::routes::{self, ApiState};
use draft_duel::adapters::api::session_token::SessionTokens;
use draft_duel::adapters::gateway::SessionGateway;
use draft_duel::domain::draft::{DraftRules, FirstPicker};
use draft_duel::domain::matchup::{DraftableToken, Identity, MatchResult, MatchType, TokenSymbol};
use draft_duel::domain::scoring::RoundMultipliers;
use draft_duel::ports::match_observer::NoopObserver;
use draft_duel::ports::price_oracle::PriceOracle;
use draft_duel::ports::result_sink::ResultSink;
use draft_duel::usecases::draft_session::{SessionDeps, SessionSettings};
use draft_duel::usecases::identity::IdentityVerifier;
use draft_duel::usecases::match_registry::{MatchRegistry, SettingsSource};
use draft_duel::usecases::results::ResultBook;
use draft_duel::usecases::settlement::SettlementEngine;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const C: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

struct StaticOracle(BTreeMap<TokenSymbol, f64>);

#[async_trait]
impl PriceOracle for StaticOracle {
    async fn list_draftable(&self) -> anyhow::Result<Vec<DraftableToken>> {
        Ok(self
            .0
            .iter()
            .map(|(symbol, price)| DraftableToken {
                symbol: symbol.clone(),
                price: *price,
            })
            .collect())
    }

    async fn get_prices(
        &self,
        symbols: &BTreeSet<TokenSymbol>,
    ) -> anyhow::Result<HashMap<TokenSymbol, f64>> {
        Ok(symbols
            .iter()
            .filter_map(|s| self.0.get(s).map(|p| (s.clone(), *p)))
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct MemorySink(Mutex<Vec<MatchResult>>);

#[async_trait]
impl ResultSink for MemorySink {
    async fn record(&self, result: &MatchResult) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn load_all(&self) -> anyhow::Result<Vec<MatchResult>> {
        Ok(self.0.lock().unwrap().clone())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

struct TestSettings;

impl SettingsSource for TestSettings {
    fn settings_for(&self, match_type: MatchType) -> SessionSettings {
        SessionSettings {
            rules: DraftRules {
                match_type,
                per_pick_timeout: chrono::Duration::seconds(60),
                grace_period: chrono::Duration::seconds(30),
                forfeit_after_missed_turns: 2,
                first_picker: FirstPicker::Creator,
            },
            window: Duration::from_secs(3_600),
            abandon_after: Duration::from_secs(3_600),
            draftable_retry: Duration::from_secs(5),
        }
    }
}

fn registry() -> Arc<MatchRegistry> {
    let oracle: Arc<dyn PriceOracle> = Arc::new(StaticOracle(
        [("BTC".to_string(), 60_000.0), ("ETH".to_string(), 3_000.0)]
            .into_iter()
            .collect(),
    ));
    let results = Arc::new(ResultBook::new(Arc::new(MemorySink::default())));
    Arc::new(MatchRegistry::new(
        Arc::new(TestSettings),
        SessionDeps {
            settlement: Arc::new(SettlementEngine::new(
                Arc::clone(&oracle),
                Arc::clone(&results),
                RoundMultipliers::default(),
                2,
                Duration::from_millis(10),
            )),
            oracle,
            results,
            observer: Arc::new(NoopObserver),
        },
    ))
}

fn tokens() -> Arc<SessionTokens> {
    Arc::new(SessionTokens::new(
        b"integration-test-secret-0123456789abcdef".to_vec(),
        chrono::Duration::hours(1),
    ))
}

fn identity(addr: &str) -> Identity {
    Identity {
        participant_id: addr.to_string(),
        wallet_address: addr.to_string(),
    }
}

async fn send(ws: &mut Socket, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn next_json(ws: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn next_of_type(ws: &mut Socket, kind: &str) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == kind {
            return value;
        }
    }
}

// ---- HTTP API ----

#[tokio::test]
async fn test_sign_in_and_create_match_over_http() {
    let registry = registry();
    let tokens = tokens();
    let state = ApiState {
        verifier: Arc::new(IdentityVerifier::new("draft-duel.test", chrono::Duration::minutes(5))),
        tokens: Arc::clone(&tokens),
        registry: Arc::clone(&registry),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, routes::router(state)).await });

    let client = reqwest::Client::new();
    let signer = PrivateKeySigner::random();

    let challenge: Value = client
        .get(format!("{base}/challenge"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let message = challenge["message"].as_str().unwrap().to_string();
    let signature = signer.sign_message_sync(message.as_bytes()).unwrap();

    let verify_body = json!({
        "message": message,
        "signature": alloy::primitives::hex::encode_prefixed(signature.as_bytes()),
        "address": signer.address().to_string(),
    });
    let verified = client
        .post(format!("{base}/verify"))
        .json(&verify_body)
        .send()
        .await
        .unwrap();
    assert_eq!(verified.status(), 200);
    let verified: Value = verified.json().await.unwrap();
    let token = verified["sessionToken"].as_str().unwrap().to_string();
    assert_eq!(
        verified["identity"]["participantId"],
        format!("{:#x}", signer.address())
    );

    // Replaying the same signed challenge fails.
    let replay = client
        .post(format!("{base}/verify"))
        .json(&verify_body)
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), 401);

    let unauthenticated = client
        .post(format!("{base}/matches"))
        .json(&json!({ "matchType": "fast", "opponent": B }))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthenticated.status(), 401);

    let created = client
        .post(format!("{base}/matches"))
        .bearer_auth(&token)
        .json(&json!({ "matchType": "fast", "opponent": B }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let created: Value = created.json().await.unwrap();
    let match_id = created["matchId"].as_str().unwrap().to_string();

    let anonymous = client
        .get(format!("{base}/matches/{match_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 401);

    let outsider = tokens.issue(&identity(C));
    let foreign = client
        .get(format!("{base}/matches/{match_id}"))
        .bearer_auth(&outsider)
        .send()
        .await
        .unwrap();
    assert_eq!(foreign.status(), 404);

    let opponent_token = tokens.issue(&identity(B));
    let view: Value = client
        .get(format!("{base}/matches/{match_id}"))
        .bearer_auth(&opponent_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["match"]["phase"], "drafting");
    assert_eq!(view["match"]["matchType"], "fast");

    let result = client
        .get(format!("{base}/matches/{match_id}/result"))
        .send()
        .await
        .unwrap();
    assert_eq!(result.status(), 404);

    let missing = client
        .get(format!("{base}/matches/not-a-match"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["kind"], "notFound");

    let self_match = client
        .post(format!("{base}/matches"))
        .bearer_auth(&token)
        .json(&json!({ "matchType": "full", "opponent": signer.address().to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(self_match.status(), 400);
}

// ---- WebSocket Gateway ----

#[tokio::test]
async fn test_socket_session_protocol() {
    let registry = registry();
    let tokens = tokens();
    let match_id = registry
        .create_match(MatchType::Fast, identity(A), identity(B))
        .await
        .unwrap();

    let gateway = Arc::new(SessionGateway::new(
        Arc::clone(&registry),
        Arc::clone(&tokens),
        50,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = tokio::spawn(gateway.run(listener, shutdown_rx));

    let (mut a, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (mut b, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    // Nothing is allowed before authentication.
    send(&mut a, json!({ "type": "join", "matchId": match_id })).await;
    let rejected = next_json(&mut a).await;
    assert_eq!(rejected["type"], "rejected");
    assert_eq!(rejected["kind"], "authFailure");

    send(&mut a, json!({ "type": "authenticate", "sessionToken": "garbage" })).await;
    assert_eq!(next_json(&mut a).await["kind"], "authFailure");

    send(&mut a, Value::String("not an object".into())).await;
    assert_eq!(next_json(&mut a).await["kind"], "malformed");

    for (ws, who) in [(&mut a, A), (&mut b, B)] {
        let token = tokens.issue(&identity(who));
        send(ws, json!({ "type": "authenticate", "sessionToken": token })).await;
        let authenticated = next_json(ws).await;
        assert_eq!(authenticated["type"], "authenticated");
        assert_eq!(authenticated["identity"]["participantId"], who);

        send(ws, json!({ "type": "join", "matchId": match_id })).await;
        let joined = next_of_type(ws, "joined").await;
        assert_eq!(joined["view"]["match"]["matchId"], match_id.as_str());
    }

    let turn = next_of_type(&mut a, "turnUpdate").await;
    assert_eq!(turn["activeParticipant"], A);
    assert_eq!(turn["currentPickIndex"], 0);
    assert_eq!(turn["matchId"], match_id.as_str());

    // Out of turn.
    send(
        &mut b,
        json!({ "type": "submitPick", "matchId": match_id, "tokenSymbol": "BTC", "pickIndex": 0 }),
    )
    .await;
    let rejected = next_of_type(&mut b, "rejected").await;
    assert_eq!(rejected["kind"], "turnViolation");

    send(
        &mut a,
        json!({ "type": "submitPick", "matchId": match_id, "tokenSymbol": "eth", "pickIndex": 0 }),
    )
    .await;
    let applied = next_of_type(&mut b, "pickApplied").await;
    assert_eq!(applied["participant"], A);
    assert_eq!(applied["slot"]["tokenSymbol"], "ETH");
    assert_eq!(applied["slot"]["autoPicked"], false);

    let _ = shutdown_tx.send(());
    server.await.unwrap().unwrap();
}
