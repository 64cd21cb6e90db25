//! Consuming side of the queue.
//!
//! [`Consumer::consume`] hands messages to the caller over a bounded channel
//! and keeps the broker subscription alive behind it: when the broker drops
//! the connection, the consumer reconnects with backoff and resumes
//! delivery on the same channel. The channel closes only on shutdown or once
//! reconnection gives up.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::broker::{Broker, Delivery, DeliveryStream};
use super::connection::QueueConnection;
use super::error::{QueueError, QueueResult};
use crate::config::QueueConfig;
use crate::signals::ShutdownHandle;

/// A message handed to the application.
///
/// The delivery is already acknowledged by the time it is received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub delivery_tag: u64,
    pub redelivered: bool,
}

impl From<Delivery> for Message {
    fn from(delivery: Delivery) -> Self {
        Self {
            body: delivery.body,
            content_type: delivery.content_type,
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
        }
    }
}

/// Subscribes to the stream queue.
#[derive(Debug)]
pub struct Consumer {
    connection: QueueConnection,
}

impl Consumer {
    pub fn new(broker: Arc<dyn Broker>, config: &QueueConfig) -> Self {
        Self {
            connection: QueueConnection::new(broker, config),
        }
    }

    /// Connects, subscribes and spawns the delivery task.
    ///
    /// Fails if the first connection cannot be established within the
    /// backoff budget.
    pub async fn consume(mut self, shutdown: ShutdownHandle) -> QueueResult<mpsc::Receiver<Message>> {
        let deliveries = self.connection.reconnect(&shutdown).await?;
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(self.run(deliveries, tx, shutdown));
        Ok(rx)
    }

    async fn run(
        mut self,
        mut deliveries: DeliveryStream,
        tx: mpsc::Sender<Message>,
        shutdown: ShutdownHandle,
    ) {
        let queue = self.connection.topology().queue.clone();
        info!(queue = %queue, "consumer started");

        loop {
            let lost = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                err = self.connection.closed() => Some(err),
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        if !self.forward(delivery, &tx, &shutdown).await {
                            break;
                        }
                        None
                    }
                    Some(Err(err)) => Some(err),
                    None => Some(QueueError::ChannelClosed("delivery stream ended".into())),
                },
            };

            let Some(err) = lost else { continue };
            warn!(queue = %queue, error = %err, "consumer lost broker, reconnecting");
            match self.connection.reconnect(&shutdown).await {
                Ok(stream) => deliveries = stream,
                Err(QueueError::Cancelled) => break,
                Err(err) => {
                    error!(queue = %queue, error = %err, "consumer giving up");
                    break;
                }
            }
        }

        self.connection.disconnect().await;
        info!(queue = %queue, "consumer stopped");
    }

    /// Acks then hands one delivery to the application. Returns false when
    /// the consumer should stop.
    async fn forward(
        &self,
        delivery: Delivery,
        tx: &mpsc::Sender<Message>,
        shutdown: &ShutdownHandle,
    ) -> bool {
        if let Err(err) = self.connection.ack(delivery.delivery_tag).await {
            warn!(tag = delivery.delivery_tag, error = %err, "ack failed");
        }
        debug!(tag = delivery.delivery_tag, redelivered = delivery.redelivered, "delivery received");

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            sent = tx.send(Message::from(delivery)) => {
                if sent.is_err() {
                    debug!("message receiver dropped");
                }
                sent.is_ok()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::queue::{MemoryBroker, Producer};
    use std::time::Duration;

    fn config() -> QueueConfig {
        QueueConfig::new("s").with_backoff(BackoffConfig::default().with_jitter(0.0))
    }

    #[tokio::test]
    async fn receives_published_messages_acked() {
        let broker = MemoryBroker::new();
        let shutdown = ShutdownHandle::new();
        let mut rx = Consumer::new(Arc::new(broker.clone()), &config())
            .consume(shutdown.clone())
            .await
            .unwrap();

        let mut producer = Producer::new(Arc::new(broker.clone()), &config());
        producer.publish_bytes(b"{\"n\":1}".to_vec()).await.unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.body, b"{\"n\":1}");
        assert_eq!(message.content_type.as_deref(), Some("application/json"));
        assert_eq!(broker.acked_count(), 1);

        shutdown.trigger();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_receiver_stops_consumer() {
        let broker = MemoryBroker::new();
        let rx = Consumer::new(Arc::new(broker.clone()), &config())
            .consume(ShutdownHandle::new())
            .await
            .unwrap();
        drop(rx);

        let mut producer = Producer::new(Arc::new(broker.clone()), &config());
        producer.publish_bytes(b"{}".to_vec()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while broker.has_consumer("s") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn initial_connect_failure_is_reported() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let result = Consumer::new(Arc::new(broker), &config())
            .consume(ShutdownHandle::new())
            .await;
        assert!(matches!(result, Err(QueueError::BackoffExhausted { .. })));
    }
}
