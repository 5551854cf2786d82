//! Session Tokens — HMAC-SHA256 Signed Bearer Tokens
//!
//! Issued once a wallet signature verifies; presented as a bearer
//! token on the match API and in the `authenticate` message on the
//! session socket. The signing secret comes from the environment
//! (DRAFT_SESSION_SECRET) and never leaves the process.
//!
//! Token format: `base64url(claims_json) "." base64url(hmac(secret, claims_b64))`

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::matchup::Identity;

/// Minimum secret length accepted from the environment.
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed session token")]
    Malformed,

    #[error("session token signature mismatch")]
    BadSignature,

    #[error("session token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    wallet: String,
    exp: i64,
}

/// Issues and validates session tokens.
pub struct SessionTokens {
    /// HMAC key (never serialized).
    secret: Vec<u8>,
    /// Token lifetime.
    ttl: Duration,
}

impl SessionTokens {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    /// Load the signing secret from DRAFT_SESSION_SECRET.
    pub fn from_env(ttl: Duration) -> Result<Self> {
        let secret = std::env::var("DRAFT_SESSION_SECRET")
            .context("DRAFT_SESSION_SECRET not set")?;
        anyhow::ensure!(
            secret.len() >= MIN_SECRET_LEN,
            "DRAFT_SESSION_SECRET must be at least {} bytes",
            MIN_SECRET_LEN
        );
        Ok(Self::new(secret.into_bytes(), ttl))
    }

    pub fn issue(&self, identity: &Identity) -> String {
        self.issue_at(identity, Utc::now())
    }

    pub fn issue_at(&self, identity: &Identity, now: DateTime<Utc>) -> String {
        let claims = Claims {
            sub: identity.participant_id.clone(),
            wallet: identity.wallet_address.clone(),
            exp: (now + self.ttl).timestamp(),
        };
        // Serializing three plain fields cannot fail.
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&payload));
        format!("{payload}.{signature}")
    }

    pub fn validate(&self, token: &str) -> Result<Identity, TokenError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        if !constant_time_eq(&signature, &self.mac(payload)) {
            return Err(TokenError::BadSignature);
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(Identity {
            participant_id: claims.sub,
            wallet_address: claims.wallet,
        })
    }

    fn mac(&self, payload: &str) -> [u8; 32] {
        hmac_sha256::HMAC::mac(payload.as_bytes(), &self.secret)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            participant_id: "0x52908400098527886e0f7030069857d2e4169ee7".into(),
            wallet_address: "0x52908400098527886E0F7030069857D2E4169EE7".into(),
        }
    }

    fn tokens() -> SessionTokens {
        SessionTokens::new(b"0123456789abcdef0123456789abcdef".to_vec(), Duration::hours(1))
    }

    #[test]
    fn test_issue_then_validate() {
        let t = tokens();
        let token = t.issue(&identity());
        assert_eq!(t.validate(&token).unwrap(), identity());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let t = tokens();
        let token = t.issue(&identity());
        let (_, sig) = token.split_once('.').unwrap();

        let forged = Claims {
            sub: "0x0000000000000000000000000000000000000001".into(),
            wallet: "0x0000000000000000000000000000000000000001".into(),
            exp: i64::MAX,
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let err = t.validate(&format!("{payload}.{sig}")).unwrap_err();
        assert_eq!(err, TokenError::BadSignature);
    }

    #[test]
    fn test_other_secret_rejected() {
        let token = tokens().issue(&identity());
        let other = SessionTokens::new(b"another-secret-another-secret-xx".to_vec(), Duration::hours(1));
        assert_eq!(other.validate(&token).unwrap_err(), TokenError::BadSignature);
    }

    #[test]
    fn test_expired_rejected() {
        let t = tokens();
        let issued = Utc::now();
        let token = t.issue_at(&identity(), issued);
        let err = t
            .validate_at(&token, issued + Duration::hours(2))
            .unwrap_err();
        assert_eq!(err, TokenError::Expired);
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(tokens().validate("nope").unwrap_err(), TokenError::Malformed);
    }
}
