//! Identity Verifier - Wallet Challenge/Response Authentication
//!
//! Issues single-use sign-in challenges and verifies EIP-191
//! personal-sign signatures over them. A challenge nonce is valid
//! once: it is consumed on the first successful verification and
//! every later attempt with it fails, even with a valid signature.

use std::collections::HashMap;

use alloy::primitives::{Address, PrimitiveSignature};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::ErrorKind;
use crate::domain::matchup::Identity;

/// Prefix of the message line carrying the nonce.
const NONCE_PREFIX: &str = "Nonce: ";

/// A sign-in challenge handed to a wallet.
#[derive(Debug, Clone)]
pub struct Challenge {
  /// Random single-use nonce.
  pub nonce: String,
  /// Exact text the wallet must sign.
  pub message: String,
  /// Instant after which the nonce is rejected.
  pub expires_at: DateTime<Utc>,
}

/// Authentication failures. All map to `ErrorKind::AuthFailure`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
  #[error("message does not contain a nonce")]
  MalformedMessage,

  #[error("invalid signature: {0}")]
  InvalidSignature(String),

  #[error("invalid wallet address: {0}")]
  InvalidAddress(String),

  #[error("signature was produced by a different address")]
  AddressMismatch,

  #[error("unknown nonce")]
  UnknownNonce,

  #[error("nonce expired")]
  NonceExpired,

  #[error("nonce already used")]
  NonceConsumed,
}

impl AuthError {
  pub const fn kind(&self) -> ErrorKind {
    ErrorKind::AuthFailure
  }
}

#[derive(Debug, Clone)]
struct NonceRecord {
  expires_at: DateTime<Utc>,
  consumed: bool,
}

/// Challenge issuer and signature verifier.
pub struct IdentityVerifier {
  /// Domain shown in the sign-in message.
  domain: String,
  /// Challenge lifetime.
  ttl: Duration,
  /// Outstanding and consumed nonces until they expire.
  nonces: Mutex<HashMap<String, NonceRecord>>,
}

impl IdentityVerifier {
  /// Create a verifier with the given challenge TTL.
  pub fn new(domain: impl Into<String>, ttl: Duration) -> Self {
    Self {
      domain: domain.into(),
      ttl,
      nonces: Mutex::new(HashMap::new()),
    }
  }

  /// Issue a fresh challenge.
  pub async fn issue_challenge(&self) -> Challenge {
    self.issue_challenge_at(Utc::now()).await
  }

  /// Issue a challenge as of `now`. Prunes expired nonces.
  pub async fn issue_challenge_at(&self, now: DateTime<Utc>) -> Challenge {
    let nonce = Uuid::new_v4().simple().to_string();
    let expires_at = now + self.ttl;

    let message = format!(
      "{domain} wants you to sign in with your wallet.\n\n{NONCE_PREFIX}{nonce}\nIssued At: {issued}\nExpiration Time: {expires}",
      domain = self.domain,
      issued = now.to_rfc3339(),
      expires = expires_at.to_rfc3339(),
    );

    let mut nonces = self.nonces.lock().await;
    let before = nonces.len();
    nonces.retain(|_, record| record.expires_at > now);
    if nonces.len() < before {
      debug!(pruned = before - nonces.len(), "Pruned expired nonces");
    }
    nonces.insert(
      nonce.clone(),
      NonceRecord {
        expires_at,
        consumed: false,
      },
    );

    Challenge {
      nonce,
      message,
      expires_at,
    }
  }

  /// Verify a signed challenge against the claimed wallet address.
  pub async fn verify(
    &self,
    message: &str,
    signature: &str,
    claimed_address: &str,
  ) -> Result<Identity, AuthError> {
    self.verify_at(message, signature, claimed_address, Utc::now()).await
  }

  /// Verify as of `now`.
  ///
  /// Signature and address are checked before the nonce is touched, so a
  /// forged attempt cannot burn someone else's challenge.
  pub async fn verify_at(
    &self,
    message: &str,
    signature: &str,
    claimed_address: &str,
    now: DateTime<Utc>,
  ) -> Result<Identity, AuthError> {
    let nonce = extract_nonce(message).ok_or(AuthError::MalformedMessage)?;
    let recovered = recover_signer(message, signature)?;

    let claimed: Address = claimed_address
      .trim()
      .parse()
      .map_err(|_| AuthError::InvalidAddress(claimed_address.to_string()))?;

    if recovered != claimed {
      warn!(claimed = %claimed, "Signature does not match claimed address");
      return Err(AuthError::AddressMismatch);
    }

    let mut nonces = self.nonces.lock().await;
    let record = nonces.get_mut(nonce).ok_or(AuthError::UnknownNonce)?;
    if record.consumed {
      warn!(address = %claimed, "Replayed sign-in nonce rejected");
      return Err(AuthError::NonceConsumed);
    }
    if record.expires_at <= now {
      return Err(AuthError::NonceExpired);
    }
    record.consumed = true;
    drop(nonces);

    let identity = identity_for(recovered);
    info!(participant = %identity.participant_id, "Wallet verified");
    Ok(identity)
  }

  /// Number of tracked nonces (outstanding + consumed, not yet pruned).
  pub async fn tracked_nonces(&self) -> usize {
    self.nonces.lock().await.len()
  }
}

/// Stable identity derived from a wallet address.
pub fn identity_for(address: Address) -> Identity {
  Identity {
    participant_id: format!("{address:#x}"),
    wallet_address: address.to_checksum(None),
  }
}

/// Parse a wallet address into its identity without a signature.
///
/// Used when naming an opponent; the opponent still has to sign in
/// before they can act in the match.
pub fn identity_from_address(raw: &str) -> Result<Identity, AuthError> {
  raw
    .trim()
    .parse::<Address>()
    .map(identity_for)
    .map_err(|_| AuthError::InvalidAddress(raw.to_string()))
}

fn extract_nonce(message: &str) -> Option<&str> {
  message
    .lines()
    .find_map(|line| line.trim().strip_prefix(NONCE_PREFIX))
    .map(str::trim)
    .filter(|nonce| !nonce.is_empty())
}

/// Recover the EIP-191 signer of `message`.
fn recover_signer(message: &str, signature: &str) -> Result<Address, AuthError> {
  let bytes = alloy::primitives::hex::decode(signature.trim())
    .map_err(|e| AuthError::InvalidSignature(e.to_string()))?;
  let signature = PrimitiveSignature::from_raw(&bytes)
    .map_err(|e| AuthError::InvalidSignature(e.to_string()))?;
  signature
    .recover_address_from_msg(message.as_bytes())
    .map_err(|e| AuthError::InvalidSignature(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use alloy::signers::SignerSync;
  use alloy::signers::local::PrivateKeySigner;

  fn sign(signer: &PrivateKeySigner, message: &str) -> String {
    let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
    alloy::primitives::hex::encode_prefixed(signature.as_bytes())
  }

  fn verifier() -> IdentityVerifier {
    IdentityVerifier::new("test", Duration::minutes(5))
  }

  #[tokio::test]
  async fn test_valid_signature_verifies() {
    let v = verifier();
    let signer = PrivateKeySigner::random();
    let challenge = v.issue_challenge().await;
    let sig = sign(&signer, &challenge.message);

    let identity = v
      .verify(&challenge.message, &sig, &signer.address().to_string())
      .await
      .unwrap();

    assert_eq!(identity.participant_id, format!("{:#x}", signer.address()));
    assert_eq!(identity.wallet_address, signer.address().to_checksum(None));
  }

  #[tokio::test]
  async fn test_claimed_address_is_case_insensitive() {
    let v = verifier();
    let signer = PrivateKeySigner::random();
    let challenge = v.issue_challenge().await;
    let sig = sign(&signer, &challenge.message);

    let upper = format!("0x{}", alloy::primitives::hex::encode(signer.address()).to_uppercase());
    assert!(v.verify(&challenge.message, &sig, &upper).await.is_ok());
  }

  #[tokio::test]
  async fn test_replayed_nonce_rejected() {
    let v = verifier();
    let signer = PrivateKeySigner::random();
    let challenge = v.issue_challenge().await;
    let sig = sign(&signer, &challenge.message);
    let addr = signer.address().to_string();

    v.verify(&challenge.message, &sig, &addr).await.unwrap();
    let err = v.verify(&challenge.message, &sig, &addr).await.unwrap_err();
    assert_eq!(err, AuthError::NonceConsumed);
    assert_eq!(err.kind(), ErrorKind::AuthFailure);

    // Still consumed on a third attempt.
    let err = v.verify(&challenge.message, &sig, &addr).await.unwrap_err();
    assert_eq!(err, AuthError::NonceConsumed);
  }

  #[tokio::test]
  async fn test_wrong_address_rejected_without_consuming_nonce() {
    let v = verifier();
    let signer = PrivateKeySigner::random();
    let other = PrivateKeySigner::random();
    let challenge = v.issue_challenge().await;
    let sig = sign(&signer, &challenge.message);

    let err = v
      .verify(&challenge.message, &sig, &other.address().to_string())
      .await
      .unwrap_err();
    assert_eq!(err, AuthError::AddressMismatch);

    assert!(
      v.verify(&challenge.message, &sig, &signer.address().to_string())
        .await
        .is_ok()
    );
  }

  #[tokio::test]
  async fn test_expired_nonce_rejected() {
    let v = verifier();
    let signer = PrivateKeySigner::random();
    let issued = Utc::now();
    let challenge = v.issue_challenge_at(issued).await;
    let sig = sign(&signer, &challenge.message);

    let err = v
      .verify_at(
        &challenge.message,
        &sig,
        &signer.address().to_string(),
        issued + Duration::minutes(6),
      )
      .await
      .unwrap_err();
    assert_eq!(err, AuthError::NonceExpired);
  }

  #[tokio::test]
  async fn test_unknown_nonce_rejected() {
    let v = verifier();
    let signer = PrivateKeySigner::random();
    let message = "test wants you to sign in.\n\nNonce: deadbeef";
    let sig = sign(&signer, message);

    let err = v
      .verify(message, &sig, &signer.address().to_string())
      .await
      .unwrap_err();
    assert_eq!(err, AuthError::UnknownNonce);
  }

  #[tokio::test]
  async fn test_garbage_signature_rejected() {
    let v = verifier();
    let challenge = v.issue_challenge().await;
    let err = v
      .verify(&challenge.message, "0x1234", "0x0000000000000000000000000000000000000001")
      .await
      .unwrap_err();
    assert!(matches!(err, AuthError::InvalidSignature(_)));
  }

  #[tokio::test]
  async fn test_issue_prunes_expired() {
    let v = verifier();
    let t0 = Utc::now();
    v.issue_challenge_at(t0).await;
    v.issue_challenge_at(t0 + Duration::minutes(10)).await;
    assert_eq!(v.tracked_nonces().await, 1);
  }

  #[test]
  fn test_identity_from_address() {
    let id = identity_from_address("0x52908400098527886E0F7030069857D2E4169EE7").unwrap();
    assert_eq!(id.participant_id, "0x52908400098527886e0f7030069857d2e4169ee7");
    assert!(identity_from_address("not-an-address").is_err());
  }
}
