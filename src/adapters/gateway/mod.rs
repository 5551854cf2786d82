//! Session Gateway Adapter
//!
//! WebSocket server carrying the draft session protocol between
//! participants and their match sessions.
//!
//! Sub-modules:
//! - `protocol`: Client/server message types
//! - `ws`: Socket accept loop, authentication and routing

pub mod protocol;
pub mod ws;

pub use ws::SessionGateway;
