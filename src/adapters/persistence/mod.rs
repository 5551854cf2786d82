//! Persistence Adapters - JSONL-based File Storage
//!
//! Implements the ResultSink port with an append-only JSONL file.
//! Append-only files, no database.

pub mod results;

pub use results::JsonlResultLog;
