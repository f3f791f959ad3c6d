//! Ordered handler lanes.
//!
//! A dispatcher drains one subscription and routes each message to a lane
//! chosen by its ordering key. Each lane handles its messages one at a time,
//! so messages sharing a key keep their order while different keys proceed
//! concurrently.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Subscription;
use crate::domain::{Ordered, RelayError};

#[async_trait]
pub trait MessageHandler<M>: Send + Sync + 'static {
    async fn handle(&self, message: M) -> Result<(), RelayError>;
}

/// Running dispatcher and lanes.
pub struct LaneGroup {
    joins: Vec<JoinHandle<()>>,
}

impl LaneGroup {
    /// Wait for the dispatcher and every lane to finish.
    pub async fn join(self) {
        for join in self.joins {
            let _ = join.await;
        }
    }
}

/// Spawn `lanes` handler lanes fed from `subscription`.
///
/// Stops when `cancel` fires or the bus closes. Lane queues are unbounded so
/// the dispatcher never blocks on a handler that is itself publishing to
/// this bus.
pub fn spawn_lanes<M, H>(
    name: &'static str,
    mut subscription: Subscription<M>,
    handler: Arc<H>,
    lanes: usize,
    cancel: CancellationToken,
) -> LaneGroup
where
    M: Ordered + Send + 'static,
    H: MessageHandler<M>,
{
    let lanes = lanes.max(1);
    let mut joins = Vec::with_capacity(lanes + 1);
    let mut senders = Vec::with_capacity(lanes);

    for lane in 0..lanes {
        let (tx, mut rx) = mpsc::unbounded_channel::<M>();
        senders.push(tx);
        let handler = Arc::clone(&handler);
        joins.push(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = handler.handle(message).await {
                    warn!(handler = name, lane, error = %e, "message handler failed");
                }
            }
        }));
    }

    joins.push(tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = subscription.recv() => message,
            };
            let Some(message) = message else {
                break;
            };
            let lane = (message.ordering_key().0 % senders.len() as u128) as usize;
            if senders[lane].send(message).is_err() {
                break;
            }
        }
        debug!(handler = name, "dispatcher stopped");
        // dropping `senders` lets every lane drain and exit
    }));

    LaneGroup { joins }
}
