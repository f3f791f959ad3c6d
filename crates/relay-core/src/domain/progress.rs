//! Progress snapshots and worker progress updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::TaskStatus;
use super::task::WorkerKind;

/// Point-in-time view of a task, as returned by a progress query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub id: TaskId,
    pub worker: WorkerKind,
    pub status: TaskStatus,
    pub progress: Option<u64>,
    pub total: Option<u64>,
    pub registered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A worker's progress report. `sequence` increases per task; the registry
/// drops anything not newer than what it has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub task_id: TaskId,
    pub sequence: u64,
    pub progress: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}
