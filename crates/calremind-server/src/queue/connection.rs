//! Connection lifecycle shared by producers and consumers.
//!
//! [`QueueConnection`] owns at most one broker connection plus a control
//! channel. Close notifications from the broker are tagged with a connection
//! generation so a hook fired by an old connection never tears down its
//! replacement.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::broker::{Broker, BrokerChannel, BrokerConnection, DeliveryStream};
use super::error::{QueueError, QueueResult};
use super::topology::Topology;
use crate::config::{BackoffConfig, QueueConfig};
use crate::signals::ShutdownHandle;

/// Where a [`QueueConnection`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// A (re)connectable handle to one stream on a broker.
pub struct QueueConnection {
    broker: Arc<dyn Broker>,
    topology: Topology,
    backoff: BackoffConfig,
    consumer_tag: String,
    connection: Option<Box<dyn BrokerConnection>>,
    channel: Option<Box<dyn BrokerChannel>>,
    generation: u64,
    state: ConnectionState,
    close_tx: mpsc::UnboundedSender<(u64, QueueError)>,
    close_rx: mpsc::UnboundedReceiver<(u64, QueueError)>,
}

impl QueueConnection {
    pub fn new(broker: Arc<dyn Broker>, config: &QueueConfig) -> Self {
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        Self {
            broker,
            topology: config.topology(),
            backoff: config.backoff.clone(),
            consumer_tag: config.consumer_tag.clone(),
            connection: None,
            channel: None,
            generation: 0,
            state: ConnectionState::Disconnected,
            close_tx,
            close_rx,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Dials the broker, opens the control channel and declares the
    /// exchange. Any previous connection is closed first.
    pub async fn connect(&mut self) -> QueueResult<()> {
        self.disconnect().await;
        self.state = ConnectionState::Connecting;
        self.generation += 1;
        let generation = self.generation;

        debug!(broker = self.broker.name(), generation, "dialing broker");
        let connection = match self.broker.dial().await {
            Ok(connection) => connection,
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                return Err(err);
            }
        };

        let tx = self.close_tx.clone();
        connection.on_close(Box::new(move |err| {
            let _ = tx.send((generation, err));
        }));

        match Self::setup(connection.as_ref(), &self.topology).await {
            Ok(channel) => {
                self.connection = Some(connection);
                self.channel = Some(channel);
                self.state = ConnectionState::Connected;
                info!(
                    broker = self.broker.name(),
                    exchange = %self.topology.exchange,
                    "connected to broker"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(close_err) = connection.close().await {
                    debug!(error = %close_err, "closing half-open connection failed");
                }
                self.state = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    async fn setup(
        connection: &dyn BrokerConnection,
        topology: &Topology,
    ) -> QueueResult<Box<dyn BrokerChannel>> {
        let channel = connection.open_channel().await?;
        channel.declare_exchange(topology).await?;
        // Producers bind too, so messages published before the first
        // consumer ever connects are kept in the queue.
        channel.bind_queue(topology).await?;
        Ok(channel)
    }

    /// Registers the consumer on the control channel.
    pub async fn start_consuming(&mut self) -> QueueResult<DeliveryStream> {
        let channel = self.channel.as_ref().ok_or(QueueError::NotConnected)?;
        let deliveries = channel.consume(&self.topology, &self.consumer_tag).await?;
        info!(queue = %self.topology.queue, tag = %self.consumer_tag, "consumer registered");
        Ok(deliveries)
    }

    /// Opens an extra channel on the live connection.
    pub async fn open_channel(&self) -> QueueResult<Box<dyn BrokerChannel>> {
        let connection = self.connection.as_ref().ok_or(QueueError::NotConnected)?;
        connection.open_channel().await
    }

    /// Acknowledges a delivery received on the control channel.
    pub async fn ack(&self, delivery_tag: u64) -> QueueResult<()> {
        let channel = self.channel.as_ref().ok_or(QueueError::NotConnected)?;
        channel.ack(delivery_tag).await
    }

    /// Completes when the broker closes the current connection.
    ///
    /// Close notifications from earlier connections are skipped. Safe to
    /// use as a `select!` branch.
    pub async fn closed(&mut self) -> QueueError {
        while let Some((generation, err)) = self.close_rx.recv().await {
            if generation == self.generation {
                self.mark_lost();
                return err;
            }
            debug!(generation, current = self.generation, "ignoring stale close");
        }
        QueueError::NotConnected
    }

    /// Returns true if the current connection was lost since the last call.
    pub fn poll_disconnected(&mut self) -> bool {
        let mut lost = false;
        while let Ok((generation, err)) = self.close_rx.try_recv() {
            if generation == self.generation {
                warn!(error = %err, "broker connection lost");
                lost = true;
            }
        }
        if self.connection.as_ref().is_some_and(|c| !c.is_open()) {
            lost = true;
        }
        if lost {
            self.mark_lost();
        }
        lost
    }

    fn mark_lost(&mut self) {
        self.channel = None;
        self.connection = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Connects and starts consuming, retrying with exponential backoff.
    ///
    /// The first attempt is immediate. Gives up with
    /// [`QueueError::BackoffExhausted`] once the next delay would exceed the
    /// time budget, or with [`QueueError::Cancelled`] on shutdown.
    pub async fn reconnect(&mut self, shutdown: &ShutdownHandle) -> QueueResult<DeliveryStream> {
        let mut backoff = self.backoff.start();
        loop {
            if shutdown.is_shutdown() {
                self.disconnect().await;
                return Err(QueueError::Cancelled);
            }

            let attempt = async {
                self.connect().await?;
                self.start_consuming().await
            };
            let err = match attempt.await {
                Ok(deliveries) => {
                    if backoff.retries() > 0 {
                        info!(retries = backoff.retries(), "reconnected to broker");
                    }
                    return Ok(deliveries);
                }
                Err(err) => err,
            };
            self.disconnect().await;

            let Some(delay) = backoff.next_delay() else {
                warn!(error = %err, retries = backoff.retries(), "giving up on broker");
                return Err(QueueError::BackoffExhausted {
                    attempts: backoff.retries() + 1,
                    elapsed: backoff.elapsed(),
                });
            };
            warn!(error = %err, retry_in = ?delay, "broker connection attempt failed");

            tokio::select! {
                _ = shutdown.cancelled() => return Err(QueueError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Closes the channel and connection. Idempotent.
    pub async fn disconnect(&mut self) {
        // Hooks registered by the dropped connection are now stale.
        self.generation += 1;
        if let Some(channel) = self.channel.take()
            && let Err(err) = channel.close().await
        {
            debug!(error = %err, "channel close failed");
        }
        if let Some(connection) = self.connection.take()
            && connection.is_open()
            && let Err(err) = connection.close().await
        {
            debug!(error = %err, "connection close failed");
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl fmt::Debug for QueueConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConnection")
            .field("broker", &self.broker.name())
            .field("topology", &self.topology)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryBroker;
    use std::time::Duration;

    fn connection(broker: &MemoryBroker) -> QueueConnection {
        let config = QueueConfig::new("s").with_backoff(BackoffConfig::default().with_jitter(0.0));
        QueueConnection::new(Arc::new(broker.clone()), &config)
    }

    #[tokio::test]
    async fn connect_declares_exchange() {
        let broker = MemoryBroker::new();
        let mut conn = connection(&broker);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(broker.connection_count(), 1);

        conn.start_consuming().await.unwrap();
        assert!(broker.has_consumer("s"));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let broker = MemoryBroker::new();
        let mut conn = connection(&broker);
        conn.connect().await.unwrap();

        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(broker.connection_count(), 0);
        assert!(matches!(conn.ack(1).await, Err(QueueError::NotConnected)));
    }

    #[tokio::test]
    async fn broker_close_is_observed() {
        let broker = MemoryBroker::new();
        let mut conn = connection(&broker);
        conn.connect().await.unwrap();

        broker.drop_connections();
        assert!(conn.poll_disconnected());
        assert!(!conn.is_connected());
        assert!(!conn.poll_disconnected());
    }

    #[tokio::test]
    async fn closed_skips_stale_generations() {
        let broker = MemoryBroker::new();
        let mut conn = connection(&broker);
        conn.connect().await.unwrap();
        broker.drop_connections();
        // Replacing the connection makes the pending close stale.
        conn.connect().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(50), conn.closed()).await;
        assert!(waited.is_err());
        assert!(conn.is_connected());

        broker.drop_connections();
        let err = conn.closed().await;
        assert!(err.is_transient());
        assert!(!conn.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_waits_for_broker() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let mut conn = connection(&broker);
        let shutdown = ShutdownHandle::new();

        let restore = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            restore.set_available(true);
        });

        let started = tokio::time::Instant::now();
        conn.reconnect(&shutdown).await.unwrap();
        // Attempts at 0s, 1s, 3s fail; the one at 7s succeeds.
        assert_eq!(started.elapsed(), Duration::from_secs(7));
        assert!(broker.has_consumer("s"));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_budget() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let mut conn = connection(&broker);

        let err = conn.reconnect(&ShutdownHandle::new()).await.err().unwrap();
        match err {
            QueueError::BackoffExhausted { attempts, elapsed } => {
                assert_eq!(attempts, 8);
                assert_eq!(elapsed, Duration::from_secs(60));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_stops_on_shutdown() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let mut conn = connection(&broker);
        let shutdown = ShutdownHandle::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.trigger();
        });

        let err = conn.reconnect(&shutdown).await.err().unwrap();
        assert!(matches!(err, QueueError::Cancelled));
    }
}
