//! Task lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// TaskStatus はタスクの状態を表現
///
/// State transitions:
/// - Registered -> Running -> Completed
/// - Registered -> Running -> Failed (worker error)
/// - Registered -> Failed (a prerequisite failed or expired; never runs)
/// - Registered | Running -> Expired (`expires_after` elapsed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for prerequisites, or ready and not yet leased.
    Registered,

    /// Leased by a worker.
    Running,

    Completed,

    Failed,

    Expired,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Expired
        )
    }

    /// Does this state block every dependent forever?
    pub fn poisons_dependents(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Expired)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Registered => "registered",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}
