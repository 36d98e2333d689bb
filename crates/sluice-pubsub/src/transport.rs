//! Publisher/Subscriber traits and the Delivery wrapper

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use sluice_core::{AckDecision, Message};

use crate::Result;

/// Publishes messages to a topic
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish messages to the given topic, in order
    async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<()>;

    /// Close the publisher; subsequent publishes fail
    async fn close(&self);
}

/// Subscribes to a topic and yields deliveries on a channel
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribe to the given topic. The returned channel ends when the
    /// transport is closed.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Delivery>>;
}

/// A received message bundled with its acknowledgement callback.
///
/// Ack and nack consume the delivery. Dropping a delivery without
/// acknowledging counts as a nack, so a consumer that dies mid-message
/// triggers redelivery rather than message loss.
#[derive(Debug)]
pub struct Delivery {
    pub message: Message,
    ack_tx: oneshot::Sender<AckDecision>,
}

impl Delivery {
    pub fn new(message: Message) -> (Self, oneshot::Receiver<AckDecision>) {
        let (ack_tx, ack_rx) = oneshot::channel();
        (Self { message, ack_tx }, ack_rx)
    }

    /// Acknowledge successful processing
    pub fn ack(self) {
        let _ = self.ack_tx.send(AckDecision::Ack);
    }

    /// Reject the message, requesting redelivery
    pub fn nack(self) {
        let _ = self.ack_tx.send(AckDecision::Nack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::new_uuid;

    #[tokio::test]
    async fn test_ack_reaches_receiver() {
        let (delivery, ack_rx) = Delivery::new(Message::new(new_uuid(), "payload"));
        delivery.ack();
        assert_eq!(ack_rx.await.unwrap(), AckDecision::Ack);
    }

    #[tokio::test]
    async fn test_drop_without_ack_closes_channel() {
        let (delivery, ack_rx) = Delivery::new(Message::new(new_uuid(), "payload"));
        drop(delivery);
        assert!(ack_rx.await.is_err());
    }
}
