use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Overall result of one run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every target succeeded.
    Success,
    /// Some but not all targets succeeded.
    Partial,
    /// No target succeeded, but the run itself completed normally.
    Failed,
    /// A fault escaped the per-target isolation boundary.
    Error,
    /// The job has not run yet.
    NotStarted,
}

impl Default for RunOutcome {
    fn default() -> Self {
        RunOutcome::NotStarted
    }
}

/// Snapshot of a job's most recent run. Replaced wholesale on every attempt;
/// no history is kept here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub last_run_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Per-target success map for fan-out jobs, so an operator can see which
    /// sub-target failed without digging through logs.
    #[serde(default)]
    pub per_target: BTreeMap<String, bool>,
}

impl RunStatus {
    pub fn error(now: DateTime<Utc>) -> Self {
        Self {
            last_run_at: now,
            outcome: RunOutcome::Error,
            per_target: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
#[error("status sink unavailable: {0}")]
pub struct StatusError(pub String);

/// Persists the latest run snapshot for external monitoring.
pub trait StatusSink: Send + Sync {
    fn record(&self, job_id: &str, status: RunStatus) -> Result<(), StatusError>;
    fn latest(&self, job_id: &str) -> Option<RunStatus>;
}

/// Shared in-memory sink; handles clone cheaply and point at the same map.
#[derive(Clone, Default)]
pub struct MemoryStatusSink {
    inner: Arc<RwLock<HashMap<String, RunStatus>>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusSink for MemoryStatusSink {
    fn record(&self, job_id: &str, status: RunStatus) -> Result<(), StatusError> {
        let mut guard = self.inner.write().expect("status poisoned");
        guard.insert(job_id.to_string(), status);
        Ok(())
    }

    fn latest(&self, job_id: &str) -> Option<RunStatus> {
        self.inner
            .read()
            .expect("status poisoned")
            .get(job_id)
            .cloned()
    }
}
