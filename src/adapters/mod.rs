//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, WebSockets, file I/O). Each
//! sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `api`: HTTP auth + match endpoints and session tokens
//! - `feeds`: Spot price source (Binance REST) behind a shared cache
//! - `gateway`: Participant WebSocket protocol
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: JSONL match result log

pub mod api;
pub mod feeds;
pub mod gateway;
pub mod metrics;
pub mod persistence;
