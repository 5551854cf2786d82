//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the domain/usecases layer
//! requires from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `PriceOracle`: Current USD prices for the draftable universe
//! - `ResultSink`: Durable append-only record of match results
//! - `MatchObserver`: Match lifecycle hooks for metrics

pub mod match_observer;
pub mod price_oracle;
pub mod result_sink;
