//! Queue error types.

use std::time::Duration;

use calremind_protocol::ProtocolError;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by brokers, connections, producers and consumers.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Could not reach the broker, or the connection was lost.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// The channel (or its connection) is closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Declaring or binding exchanges and queues failed.
    #[error("topology setup failed: {0}")]
    Topology(String),

    /// The broker rejected a publish.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Acknowledging a delivery failed.
    #[error("ack failed: {0}")]
    Ack(String),

    /// Reconnection gave up after exhausting its time budget.
    #[error("reconnect gave up after {attempts} attempts in {elapsed:?}")]
    BackoffExhausted { attempts: u32, elapsed: Duration },

    /// Shutdown was requested while waiting.
    #[error("cancelled by shutdown")]
    Cancelled,

    /// Operation needs a live connection and there is none.
    #[error("not connected")]
    NotConnected,

    /// Message body could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] ProtocolError),
}

impl QueueError {
    /// Returns true for connectivity failures that a reconnect may fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::ChannelClosed(_) | Self::NotConnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(QueueError::Connection("refused".into()).is_transient());
        assert!(QueueError::ChannelClosed("gone".into()).is_transient());
        assert!(QueueError::NotConnected.is_transient());
        assert!(!QueueError::Cancelled.is_transient());
        assert!(!QueueError::Topology("bad".into()).is_transient());
        assert!(
            !QueueError::BackoffExhausted {
                attempts: 8,
                elapsed: Duration::from_secs(60)
            }
            .is_transient()
        );
    }
}
