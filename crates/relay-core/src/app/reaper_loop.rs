//! ReaperLoop - 期限切れタスクの回収
//!
//! # フロー
//! 1. 一定間隔で `TaskRegistry::expire_overdue()` を呼ぶ
//! 2. 期限切れのタスクは Expired、その依存タスクは Failed になる
//! 3. 状態変化は registry が progress バスへ流す
//!
//! registry 自体も各操作の前に期限を掃くので、この loop は
//! 誰も registry に触らない間の取りこぼしを防ぐためのもの。

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::TaskId;
use crate::registry::TaskRegistry;

pub struct ReaperLoop {
    registry: Arc<dyn TaskRegistry>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(registry: Arc<dyn TaskRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub async fn run_once(&self) -> Vec<TaskId> {
        let expired = self.registry.expire_overdue().await;
        if !expired.is_empty() {
            info!(count = expired.len(), "expired overdue tasks");
        }
        expired
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            debug!("reaper stopped");
        })
    }
}
