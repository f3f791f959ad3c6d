//! EventSink port - 状態遷移の通知
//!
//! The registry reports every status transition here after releasing its
//! lock. The bus-backed sink lives in `bus`.

use async_trait::async_trait;

use crate::domain::{RelayError, StatusChange};

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, change: StatusChange) -> Result<(), RelayError>;
}

/// 何もしない（テスト・単体利用向け）
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _change: StatusChange) -> Result<(), RelayError> {
        Ok(())
    }
}
