//! Checkpoint persistence for incremental runs
//!
//! One checkpoint record holds the resume position and cumulative counters.
//! It is read once at the start of a run and written at most once, only
//! after the run's mutation and synthesis steps have been attempted — never
//! mid-run, so a crash re-runs at worst one window of already-idempotent
//! work. An aborted run writes nothing.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, TriageError};

/// Persisted resume state. Zero-value defaults mean "beginning of history".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Inclusive lower bound for the next incremental fetch
    pub last_processed_date: Option<NaiveDate>,
    /// Mid-window resume cursor; cleared when a run finishes its window
    pub last_page_token: Option<String>,
    /// Monotonic count of messages processed across all runs
    pub total_processed: u64,
    pub last_run_timestamp: Option<DateTime<Utc>>,
    /// Run that produced this record
    pub last_run_id: Option<String>,
}

/// Partial update merged into the stored checkpoint. `None` fields keep
/// their stored value; `last_page_token` uses a nested Option so a
/// completed window can clear the cursor explicitly.
#[derive(Debug, Clone, Default)]
pub struct CheckpointUpdate {
    pub last_processed_date: Option<NaiveDate>,
    pub last_page_token: Option<Option<String>>,
    pub total_processed: Option<u64>,
    pub run_id: Option<String>,
}

/// Exclusive owner of the persisted checkpoint record
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint, returning defaults when no record exists.
    pub async fn load(&self) -> Result<Checkpoint> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let checkpoint: Checkpoint = serde_json::from_str(&content).map_err(|e| {
                    TriageError::Checkpoint(format!("invalid checkpoint file: {}", e))
                })?;
                debug!(
                    "Loaded checkpoint: total_processed={}, last_processed_date={:?}",
                    checkpoint.total_processed, checkpoint.last_processed_date
                );
                Ok(checkpoint)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No checkpoint found at {:?}, starting from history start", self.path);
                Ok(Checkpoint::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Merge `update` into the stored record and persist it. Provided
    /// fields overwrite, others are retained, and `last_run_timestamp` is
    /// always refreshed. Called at most once per run.
    pub async fn update(&self, update: CheckpointUpdate) -> Result<Checkpoint> {
        let mut checkpoint = self.load().await?;

        if let Some(date) = update.last_processed_date {
            checkpoint.last_processed_date = Some(date);
        }
        if let Some(token) = update.last_page_token {
            checkpoint.last_page_token = token;
        }
        if let Some(total) = update.total_processed {
            checkpoint.total_processed = total;
        }
        if let Some(run_id) = update.run_id {
            checkpoint.last_run_id = Some(run_id);
        }
        checkpoint.last_run_timestamp = Some(Utc::now());

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&checkpoint)?;
        tokio::fs::write(&self.path, json).await?;

        info!(
            "Checkpoint updated: total_processed={}, last_processed_date={:?}",
            checkpoint.total_processed, checkpoint.last_processed_date
        );
        Ok(checkpoint)
    }
}
