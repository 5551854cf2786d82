//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the engine's workflows. Each use case is a self-contained
//! business operation.
//!
//! Use cases:
//! - `IdentityVerifier`: Wallet challenge/response sign-in
//! - `MatchRegistry`: Match creation and command routing
//! - `draft_session`: One coordinator task per live match
//! - `SettlementEngine`: Entry/exit price capture and scoring
//! - `ResultBook`: Append-only result index over the result sink

pub mod draft_session;
pub mod identity;
pub mod match_registry;
pub mod results;
pub mod settlement;
pub mod timers;

