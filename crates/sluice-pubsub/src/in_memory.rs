//! InMemoryPubSub - process-local publish/subscribe channel
//!
//! Mirrors a broker within one process:
//! - Per-topic subscriber registries
//! - Per-subscriber worker tasks preserving delivery order
//! - Redelivery of nacked messages to the same subscriber
//! - Optional persistence (replay of past messages to new subscribers)
//! - Optional blocking of publish until every subscriber acked

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use sluice_core::{AckDecision, Message};

use crate::transport::{Delivery, Publisher, Subscriber};
use crate::{PubSubError, Result};

/// Configuration for the in-memory pub/sub channel
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Buffer size of the delivery channel handed to each subscriber
    pub output_channel_buffer: usize,
    /// When true, all published messages are replayed to new subscribers
    pub persistent: bool,
    /// When true, publish waits until every current subscriber has acked
    pub block_publish_until_subscriber_ack: bool,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            output_channel_buffer: 16,
            persistent: false,
            block_publish_until_subscriber_ack: false,
        }
    }
}

/// Work item handed to a subscriber worker
struct WorkerItem {
    message: Message,
    /// Present when the publisher is waiting for this delivery to be acked
    done_tx: Option<oneshot::Sender<()>>,
}

/// One registered subscriber of a topic
struct SubscriberHandle {
    worker_tx: mpsc::Sender<WorkerItem>,
}

/// Per-topic state. Held behind a DashMap entry so that appending to the
/// persisted log and snapshotting the subscriber list happen atomically,
/// which keeps persistent replay free of gaps and duplicates.
#[derive(Default)]
struct Topic {
    subscribers: Vec<SubscriberHandle>,
    persisted: Vec<Message>,
}

/// Process-local pub/sub transport
pub struct InMemoryPubSub {
    config: InMemoryConfig,
    topics: DashMap<String, Topic>,
    closed: AtomicBool,
    next_subscriber_id: AtomicU64,
}

impl InMemoryPubSub {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            config,
            topics: DashMap::new(),
            closed: AtomicBool::new(false),
            next_subscriber_id: AtomicU64::new(0),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Worker loop for one subscriber. Delivers messages in order,
    /// redelivering until acked. Exits when the subscriber drops its
    /// receiver or the transport closes and the queue drains.
    async fn run_subscriber_worker(
        subscriber_id: u64,
        topic: String,
        mut rx: mpsc::Receiver<WorkerItem>,
        delivery_tx: mpsc::Sender<Delivery>,
    ) {
        debug!(subscriber_id, topic = %topic, "Subscriber worker started");

        while let Some(item) = rx.recv().await {
            loop {
                let (delivery, ack_rx) = Delivery::new(item.message.clone());

                if delivery_tx.send(delivery).await.is_err() {
                    debug!(subscriber_id, topic = %topic, "Subscriber receiver dropped, worker exiting");
                    return;
                }

                match ack_rx.await {
                    Ok(AckDecision::Ack) => break,
                    Ok(AckDecision::Nack) | Err(_) => {
                        debug!(
                            subscriber_id,
                            topic = %topic,
                            message_uuid = %item.message.uuid,
                            "Delivery nacked, redelivering"
                        );
                    }
                }
            }

            if let Some(done_tx) = item.done_tx {
                let _ = done_tx.send(());
            }
        }

        debug!(subscriber_id, topic = %topic, "Subscriber worker exited");
    }
}

#[async_trait]
impl Publisher for InMemoryPubSub {
    async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<()> {
        if self.is_closed() {
            return Err(PubSubError::Closed);
        }

        for message in messages {
            // Append to the log and snapshot subscribers in one critical
            // section, then hand off to workers outside of it.
            let mut pending_acks = Vec::new();
            let mut sends = Vec::new();
            {
                let mut entry = self.topics.entry(topic.to_string()).or_default();

                // Prune subscribers whose workers have exited
                entry.subscribers.retain(|s| !s.worker_tx.is_closed());

                if self.config.persistent {
                    entry.persisted.push(message.clone());
                }

                for sub in &entry.subscribers {
                    let done_tx = if self.config.block_publish_until_subscriber_ack {
                        let (done_tx, done_rx) = oneshot::channel();
                        pending_acks.push(done_rx);
                        Some(done_tx)
                    } else {
                        None
                    };

                    sends.push((
                        sub.worker_tx.clone(),
                        WorkerItem {
                            message: message.clone(),
                            done_tx,
                        },
                    ));
                }
            }

            if sends.is_empty() && !self.config.persistent {
                debug!(topic = %topic, message_uuid = %message.uuid, "No subscribers, message dropped");
            }

            for (worker_tx, item) in sends {
                // Awaiting here gives publishers backpressure from slow
                // subscribers. A send error means the worker exited after
                // the snapshot; the subscriber is pruned on the next publish.
                let _ = worker_tx.send(item).await;
            }

            for done_rx in pending_acks {
                let _ = done_rx.await;
            }
        }

        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Closing in-memory pub/sub");
        // Dropping the worker senders lets workers drain queued items and
        // then end each subscriber's delivery channel.
        self.topics.clear();
    }
}

#[async_trait]
impl Subscriber for InMemoryPubSub {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Delivery>> {
        if self.is_closed() {
            return Err(PubSubError::Closed);
        }

        let buffer = self.config.output_channel_buffer.max(1);
        let (delivery_tx, delivery_rx) = mpsc::channel(buffer);
        let (worker_tx, worker_rx) = mpsc::channel(buffer);
        let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);

        let replay = {
            let mut entry = self.topics.entry(topic.to_string()).or_default();
            let replay: Vec<Message> = if self.config.persistent {
                entry.persisted.clone()
            } else {
                Vec::new()
            };
            entry.subscribers.push(SubscriberHandle {
                worker_tx: worker_tx.clone(),
            });
            replay
        };

        tokio::spawn(Self::run_subscriber_worker(
            subscriber_id,
            topic.to_string(),
            worker_rx,
            delivery_tx,
        ));

        if !replay.is_empty() {
            debug!(
                subscriber_id,
                topic = %topic,
                count = replay.len(),
                "Replaying persisted messages to new subscriber"
            );
            tokio::spawn(async move {
                for message in replay {
                    let item = WorkerItem {
                        message,
                        done_tx: None,
                    };
                    if worker_tx.send(item).await.is_err() {
                        break;
                    }
                }
            });
        }

        debug!(subscriber_id, topic = %topic, "Subscribed");
        Ok(delivery_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::new_uuid;
    use std::sync::Arc;
    use std::time::Duration;

    fn message(payload: &str) -> Message {
        Message::new(new_uuid(), payload.to_string())
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let pubsub = InMemoryPubSub::new(InMemoryConfig::default());

        let mut rx = pubsub.subscribe("orders").await.unwrap();
        pubsub
            .publish("orders", vec![message("one"), message("two")])
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message.payload_str(), "one");
        first.ack();

        let second = rx.recv().await.unwrap();
        assert_eq!(second.message.payload_str(), "two");
        second.ack();
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let pubsub = InMemoryPubSub::new(InMemoryConfig::default());
        pubsub.publish("orders", vec![message("lost")]).await.unwrap();

        // A later subscriber sees nothing on a non-persistent channel
        let mut rx = pubsub.subscribe("orders").await.unwrap();
        let received =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(received.is_err(), "message should not be replayed");
    }

    #[tokio::test]
    async fn test_persistent_replays_to_new_subscriber() {
        let pubsub = InMemoryPubSub::new(InMemoryConfig {
            persistent: true,
            ..Default::default()
        });

        pubsub
            .publish("orders", vec![message("one"), message("two")])
            .await
            .unwrap();

        let mut rx = pubsub.subscribe("orders").await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.message.payload_str(), "one");
        first.ack();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.message.payload_str(), "two");
        second.ack();
    }

    #[tokio::test]
    async fn test_nack_triggers_redelivery() {
        let pubsub = InMemoryPubSub::new(InMemoryConfig::default());
        let mut rx = pubsub.subscribe("orders").await.unwrap();

        let msg = message("retry me");
        let uuid = msg.uuid.clone();
        pubsub.publish("orders", vec![msg]).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message.uuid, uuid);
        first.nack();

        let redelivered = rx.recv().await.unwrap();
        assert_eq!(redelivered.message.uuid, uuid);
        redelivered.ack();
    }

    #[tokio::test]
    async fn test_block_publish_until_subscriber_ack() {
        let pubsub = Arc::new(InMemoryPubSub::new(InMemoryConfig {
            block_publish_until_subscriber_ack: true,
            ..Default::default()
        }));
        let mut rx = pubsub.subscribe("orders").await.unwrap();

        let publisher = pubsub.clone();
        let publish_task =
            tokio::spawn(
                async move { publisher.publish("orders", vec![message("blocking")]).await },
            );

        let delivery = rx.recv().await.unwrap();

        // Publish must still be in flight before the ack
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!publish_task.is_finished());

        delivery.ack();
        publish_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_ends_subscriber_channels() {
        let pubsub = InMemoryPubSub::new(InMemoryConfig::default());
        let mut rx = pubsub.subscribe("orders").await.unwrap();

        pubsub.close().await;
        pubsub.close().await; // idempotent

        assert!(rx.recv().await.is_none());
        assert!(matches!(
            pubsub.publish("orders", vec![message("late")]).await,
            Err(PubSubError::Closed)
        ));
        assert!(pubsub.subscribe("orders").await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let pubsub = InMemoryPubSub::new(InMemoryConfig::default());

        let rx = pubsub.subscribe("orders").await.unwrap();
        drop(rx);

        // First publish runs into the dead worker; once the worker has
        // exited, the next publish prunes the handle
        pubsub.publish("orders", vec![message("a")]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pubsub.publish("orders", vec![message("b")]).await.unwrap();

        let subscriber_count = pubsub
            .topics
            .get("orders")
            .map(|t| t.subscribers.len())
            .unwrap_or(0);
        assert_eq!(subscriber_count, 0);
    }
}
