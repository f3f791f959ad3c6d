//! Observability: registry counters and tracing setup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::domain::TaskStatus;

/// Number of tracked tasks in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCounts {
    pub registered: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub expired: usize,
}

impl RegistryCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Registered => self.registered += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Expired => self.expired += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.registered + self.running + self.completed + self.failed + self.expired
    }

    /// Tasks that may still change status.
    pub fn active(&self) -> usize {
        self.registered + self.running
    }
}

/// Initialize tracing for binaries.
///
/// Uses `RUST_LOG` for filtering, defaulting to `info`. Calling it twice is a
/// no-op.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init();
}
