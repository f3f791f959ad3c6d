//! GCLoop - 期限切れテーブルの回収
//!
//! 期限切れのテーブルは読み出し時点で既に存在しない扱いになる。
//! この loop はメモリを実際に解放するだけ。

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::table::TableStoreFactory;

pub struct GCLoop {
    tables: Arc<dyn TableStoreFactory>,
    interval: Duration,
}

impl GCLoop {
    pub fn new(tables: Arc<dyn TableStoreFactory>, interval: Duration) -> Self {
        Self { tables, interval }
    }

    pub async fn run_once(&self) -> usize {
        let purged = self.tables.purge_expired().await;
        if purged > 0 {
            debug!(purged, "purged expired tables");
        }
        purged
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
            debug!("table gc stopped");
        })
    }
}
