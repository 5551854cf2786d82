//! HTTP API Adapter
//!
//! Wallet challenge/verify login, match creation and match lookups,
//! plus the signed session tokens handed out on login.
//!
//! Sub-modules:
//! - `routes`: axum router and handlers
//! - `session_token`: HMAC-signed bearer tokens

pub mod routes;
pub mod session_token;
