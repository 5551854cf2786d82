//! Result Log - Append-only JSONL Match Results
//!
//! Persists every `MatchResult` to `results/results.jsonl`, one JSON
//! record per line. The escrow/payout side tails this file; records
//! are never rewritten.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::matchup::MatchResult;
use crate::ports::result_sink::ResultSink;

const RESULTS_FILE: &str = "results.jsonl";

/// Append-only JSONL result log.
pub struct JsonlResultLog {
    dir: PathBuf,
    path: PathBuf,
    /// Serializes appends so lines never interleave.
    write_lock: Mutex<()>,
}

impl JsonlResultLog {
    /// Open (creating if needed) the result log under `data_dir`.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let dir = Path::new(data_dir).join("results");
        fs::create_dir_all(&dir)
            .await
            .context("Failed to create results directory")?;

        Ok(Self {
            path: dir.join(RESULTS_FILE),
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonlResultLog {
    #[instrument(skip(self, result), fields(match_id = %result.match_id))]
    async fn record(&self, result: &MatchResult) -> Result<()> {
        let mut json = serde_json::to_string(result)
            .context("Failed to serialize match result")?;
        json.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context("Failed to open result log")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write match result")?;
        file.flush().await.context("Failed to flush result log")?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_all(&self) -> Result<Vec<MatchResult>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .context("Failed to read result log")?;

        let mut results = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MatchResult>(line) {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "Skipping malformed result record");
                }
            }
        }

        info!(count = results.len(), "Loaded match results");
        Ok(results)
    }

    async fn is_healthy(&self) -> bool {
        let probe = self.dir.join(".health_check");
        let result = fs::write(&probe, b"ok").await;
        let _ = fs::remove_file(&probe).await;
        result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::matchup::{Outcome, ParticipantPnl, Resolution};
    use chrono::Utc;

    fn result(id: &str) -> MatchResult {
        MatchResult {
            match_id: id.into(),
            outcome: Outcome::Tie,
            resolution: Resolution::Settled,
            per_participant_pnl: vec![
                ParticipantPnl { identity: "0xa".into(), pnl: 0.0 },
                ParticipantPnl { identity: "0xb".into(), pnl: 0.0 },
            ],
            snapshots: Vec::new(),
            settled_at: Utc::now(),
        }
    }

    fn temp_dir(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!("draft-duel-{name}-{}", uuid::Uuid::new_v4()));
        dir.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_append_and_load_in_order() {
        let log = JsonlResultLog::new(&temp_dir("order")).await.unwrap();
        log.record(&result("m-1")).await.unwrap();
        log.record(&result("m-2")).await.unwrap();

        let loaded = log.load_all().await.unwrap();
        let ids: Vec<&str> = loaded.iter().map(|r| r.match_id.as_str()).collect();
        assert_eq!(ids, vec!["m-1", "m-2"]);
        assert!(log.is_healthy().await);
    }

    #[tokio::test]
    async fn test_malformed_lines_skipped() {
        let log = JsonlResultLog::new(&temp_dir("malformed")).await.unwrap();
        log.record(&result("m-1")).await.unwrap();

        let mut file = OpenOptions::new().append(true).open(log.path()).await.unwrap();
        file.write_all(b"{not json}\n").await.unwrap();
        file.flush().await.unwrap();
        log.record(&result("m-2")).await.unwrap();

        assert_eq!(log.load_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_log_loads_nothing() {
        let log = JsonlResultLog::new(&temp_dir("empty")).await.unwrap();
        assert!(log.load_all().await.unwrap().is_empty());
    }
}
