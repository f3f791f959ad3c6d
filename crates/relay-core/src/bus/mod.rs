//! In-process message bus.
//!
//! Every subscriber receives every message published after it subscribed,
//! in publish order per publisher. Delivery never drops: a full subscriber
//! queue makes `publish` wait.

mod lanes;

pub use lanes::{LaneGroup, MessageHandler, spawn_lanes};

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

use crate::domain::{ProgressMessage, RegistrationMessage, RelayError, StatusChange};
use crate::ports::EventSink;

pub const DEFAULT_CAPACITY: usize = 1024;

pub type RegistrationBus = MessageBus<RegistrationMessage>;
pub type ProgressBus = MessageBus<ProgressMessage>;

struct BusInner<M> {
    topic: &'static str,
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
    capacity: usize,
    closed: AtomicBool,
}

/// Cloneable handle to one topic.
pub struct MessageBus<M> {
    inner: Arc<BusInner<M>>,
}

impl<M> Clone for MessageBus<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Clone + Send + 'static> MessageBus<M> {
    pub fn new(topic: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topic,
                subscribers: Mutex::new(Vec::new()),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn topic(&self) -> &'static str {
        self.inner.topic
    }

    /// Start receiving. Only messages published after this call are seen.
    pub async fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        if !self.inner.closed.load(Ordering::SeqCst) {
            self.inner.subscribers.lock().await.push(tx);
        }
        Subscription { rx }
    }

    /// Deliver `message` to every live subscriber.
    pub async fn publish(&self, message: M) -> Result<(), RelayError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed(self.inner.topic));
        }
        let subscribers = self.inner.subscribers.lock().await.clone();

        let mut dropped = false;
        for subscriber in &subscribers {
            // a send error means the subscription was dropped
            if subscriber.send(message.clone()).await.is_err() {
                dropped = true;
            }
        }

        if dropped {
            self.inner
                .subscribers
                .lock()
                .await
                .retain(|subscriber| !subscriber.is_closed());
        }
        Ok(())
    }

    /// Refuse further publishes and end every subscription.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.subscribers.lock().await.clear();
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().await.len()
    }
}

/// Receiving end of a bus subscription. Dropping it unsubscribes.
pub struct Subscription<M> {
    rx: mpsc::Receiver<M>,
}

impl<M> Subscription<M> {
    /// Next message, or `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }
}

/// Status transitions go out on the progress topic.
#[async_trait]
impl EventSink for ProgressBus {
    async fn emit(&self, change: StatusChange) -> Result<(), RelayError> {
        self.publish(ProgressMessage::StatusChanged(change)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskStatus};

    #[tokio::test]
    async fn every_subscriber_sees_every_message_in_order() {
        let bus: MessageBus<u32> = MessageBus::new("numbers", 4);
        let mut a = bus.subscribe().await;
        let mut b = bus.subscribe().await;

        for n in 0..3 {
            bus.publish(n).await.unwrap();
        }

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(0));
            assert_eq!(sub.recv().await, Some(1));
            assert_eq!(sub.recv().await, Some(2));
        }
    }

    #[tokio::test]
    async fn full_subscriber_applies_backpressure() {
        let bus: MessageBus<u32> = MessageBus::new("numbers", 1);
        let mut sub = bus.subscribe().await;
        bus.publish(1).await.unwrap();

        let blocked = tokio::time::timeout(std::time::Duration::from_millis(30), bus.publish(2));
        assert!(blocked.await.is_err());

        assert_eq!(sub.recv().await, Some(1));
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let bus: MessageBus<u32> = MessageBus::new("numbers", 4);
        let sub = bus.subscribe().await;
        drop(sub);

        bus.publish(1).await.unwrap();
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn closed_bus_ends_subscriptions_and_rejects_publish() {
        let bus: MessageBus<u32> = MessageBus::new("numbers", 4);
        let mut sub = bus.subscribe().await;

        bus.close().await;

        assert_eq!(sub.recv().await, None);
        assert_eq!(bus.publish(1).await, Err(RelayError::Closed("numbers")));
    }

    #[tokio::test]
    async fn progress_bus_is_an_event_sink() {
        let bus = ProgressBus::new("progress", 4);
        let mut sub = bus.subscribe().await;
        let change = StatusChange {
            task_id: TaskId::from_u128(1),
            status: TaskStatus::Completed,
            error: None,
        };

        bus.emit(change.clone()).await.unwrap();

        assert!(matches!(
            sub.recv().await,
            Some(ProgressMessage::StatusChanged(received)) if received == change
        ));
    }
}
