//! Publishing side of the queue.

use std::sync::Arc;

use calremind_protocol::{Notification, encode_message};
use tracing::{debug, warn};

use super::broker::{Broker, OutgoingMessage};
use super::connection::QueueConnection;
use super::error::QueueResult;
use crate::config::QueueConfig;

/// Publishes notifications to the stream exchange.
///
/// Connects lazily on first publish. A lost connection is detected before
/// the next publish and replaced with a single new attempt; publishes are
/// never retried here. Callers own the retry policy.
#[derive(Debug)]
pub struct Producer {
    connection: QueueConnection,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>, config: &QueueConfig) -> Self {
        Self {
            connection: QueueConnection::new(broker, config),
        }
    }

    /// Encodes and publishes one notification as a persistent JSON message.
    pub async fn publish(&mut self, notification: &Notification) -> QueueResult<()> {
        let body = encode_message(notification)?;
        self.publish_bytes(body).await?;
        debug!(event_id = %notification.event_id, "notification published");
        Ok(())
    }

    /// Publishes a pre-encoded JSON body.
    pub async fn publish_bytes(&mut self, body: Vec<u8>) -> QueueResult<()> {
        self.connection.poll_disconnected();
        if !self.connection.is_connected() {
            self.connection.connect().await?;
        }

        let result = self.publish_once(body).await;
        if let Err(err) = &result
            && err.is_transient()
        {
            warn!(error = %err, "publish failed, dropping broker connection");
            self.connection.disconnect().await;
        }
        result
    }

    async fn publish_once(&self, body: Vec<u8>) -> QueueResult<()> {
        let channel = self.connection.open_channel().await?;
        let result = channel
            .publish(self.connection.topology(), OutgoingMessage::json(body))
            .await;
        if let Err(err) = channel.close().await {
            debug!(error = %err, "closing publish channel failed");
        }
        result
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn close(&mut self) {
        self.connection.disconnect().await;
    }
}
