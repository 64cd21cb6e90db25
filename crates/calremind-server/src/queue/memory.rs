//! In-process broker.
//!
//! [`MemoryBroker`] routes through direct exchanges into durable
//! queues held in memory for the lifetime of the broker value. Messages
//! delivered but not acknowledged when their channel goes away are requeued
//! with `redelivered` set, like an AMQP broker would.
//!
//! [`MemoryBroker::drop_connections`] and [`MemoryBroker::set_available`]
//! inject broker-side failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use calremind_store::BoxFuture;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::broker::{
    Broker, BrokerChannel, BrokerConnection, CloseHook, Delivery, DeliveryStream, OutgoingMessage,
};
use super::error::{QueueError, QueueResult};
use super::topology::Topology;

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<State>>,
}

struct State {
    available: bool,
    next_id: u64,
    connections: HashMap<u64, Vec<CloseHook>>,
    channels: HashMap<u64, u64>,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, QueueState>,
    published: u64,
    acked: u64,
}

#[derive(Default)]
struct Exchange {
    bindings: Vec<(String, String)>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Stored>,
    unacked: HashMap<u64, (u64, Stored)>,
    consumer: Option<ConsumerSlot>,
}

struct ConsumerSlot {
    channel: u64,
    tx: mpsc::UnboundedSender<QueueResult<Delivery>>,
}

#[derive(Clone)]
struct Stored {
    body: Vec<u8>,
    content_type: Option<String>,
    redelivered: bool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                available: true,
                next_id: 1,
                connections: HashMap::new(),
                channels: HashMap::new(),
                exchanges: HashMap::new(),
                queues: HashMap::new(),
                published: 0,
                acked: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes new dials fail (`false`) or succeed (`true`). Existing
    /// connections are not affected.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Drops every open connection as if the broker restarted, firing
    /// their close hooks. Queued messages survive.
    pub fn drop_connections(&self) {
        let hooks = {
            let mut state = self.lock();
            let ids: Vec<u64> = state.connections.keys().copied().collect();
            let mut hooks = Vec::new();
            for id in ids {
                hooks.extend(state.remove_connection(id));
            }
            hooks
        };
        info!(connections = hooks.len(), "memory broker dropped all connections");
        for hook in hooks {
            hook(QueueError::Connection("connection reset by broker".into()));
        }
    }

    /// Number of messages accepted by an exchange.
    pub fn published_count(&self) -> u64 {
        self.lock().published
    }

    /// Number of acknowledged deliveries.
    pub fn acked_count(&self) -> u64 {
        self.lock().acked
    }

    /// Messages held by a queue, delivered or not, that are not yet acked.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len() + q.unacked.len())
    }

    pub fn has_consumer(&self, queue: &str) -> bool {
        self.lock()
            .queues
            .get(queue)
            .is_some_and(|q| q.consumer.is_some())
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }
}

impl State {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_channel(&self, channel: u64) -> QueueResult<()> {
        match self.channels.get(&channel) {
            Some(conn) if self.connections.contains_key(conn) => Ok(()),
            _ => Err(QueueError::ChannelClosed(format!("channel {channel} is closed"))),
        }
    }

    /// Removes a connection with its channels and returns its close hooks.
    fn remove_connection(&mut self, id: u64) -> Vec<CloseHook> {
        let hooks = self.connections.remove(&id).unwrap_or_default();
        let channels: HashSet<u64> = self
            .channels
            .iter()
            .filter(|(_, conn)| **conn == id)
            .map(|(channel, _)| *channel)
            .collect();
        self.channels.retain(|channel, _| !channels.contains(channel));
        self.release_channels(&channels);
        hooks
    }

    /// Cancels consumers on `channels` and requeues their unacked messages.
    fn release_channels(&mut self, channels: &HashSet<u64>) {
        for queue in self.queues.values_mut() {
            if queue
                .consumer
                .as_ref()
                .is_some_and(|c| channels.contains(&c.channel))
            {
                queue.consumer = None;
            }

            let mut orphaned: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, (channel, _))| channels.contains(channel))
                .map(|(tag, _)| *tag)
                .collect();
            orphaned.sort_unstable_by(|a, b| b.cmp(a));
            for tag in orphaned {
                if let Some((_, mut stored)) = queue.unacked.remove(&tag) {
                    stored.redelivered = true;
                    queue.ready.push_front(stored);
                }
            }
        }
    }

    /// Pushes ready messages of `queue` to its consumer, if any.
    fn dispatch(&mut self, queue: &str) {
        let mut next_tag = self.next_id;
        if let Some(q) = self.queues.get_mut(queue) {
            while let Some(slot) = &q.consumer {
                let Some(stored) = q.ready.pop_front() else {
                    break;
                };
                let tag = next_tag;
                let delivery = Delivery {
                    delivery_tag: tag,
                    body: stored.body.clone(),
                    content_type: stored.content_type.clone(),
                    redelivered: stored.redelivered,
                };
                if slot.tx.send(Ok(delivery)).is_err() {
                    // Consumer stream dropped without closing its channel.
                    q.ready.push_front(stored);
                    q.consumer = None;
                    break;
                }
                next_tag += 1;
                q.unacked.insert(tag, (slot.channel, stored));
            }
        }
        self.next_id = next_tag;
    }
}

impl Broker for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    fn dial(&self) -> BoxFuture<'_, QueueResult<Box<dyn BrokerConnection>>> {
        let result = {
            let mut state = self.lock();
            if state.available {
                let id = state.next_id();
                state.connections.insert(id, Vec::new());
                debug!(connection = id, "memory broker accepted connection");
                Ok(Box::new(MemoryConnection {
                    broker: self.clone(),
                    id,
                }) as Box<dyn BrokerConnection>)
            } else {
                Err(QueueError::Connection("broker unavailable".into()))
            }
        };
        Box::pin(async move { result })
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
}

impl BrokerConnection for MemoryConnection {
    fn open_channel(&self) -> BoxFuture<'_, QueueResult<Box<dyn BrokerChannel>>> {
        let result = {
            let mut state = self.broker.lock();
            if state.connections.contains_key(&self.id) {
                let channel = state.next_id();
                state.channels.insert(channel, self.id);
                Ok(Box::new(MemoryChannel {
                    broker: self.broker.clone(),
                    id: channel,
                }) as Box<dyn BrokerChannel>)
            } else {
                Err(QueueError::ChannelClosed(format!(
                    "connection {} is closed",
                    self.id
                )))
            }
        };
        Box::pin(async move { result })
    }

    fn on_close(&self, hook: CloseHook) {
        let mut state = self.broker.lock();
        if let Some(hooks) = state.connections.get_mut(&self.id) {
            hooks.push(hook);
            return;
        }
        drop(state);
        hook(QueueError::Connection("connection already closed".into()));
    }

    fn is_open(&self) -> bool {
        self.broker.lock().connections.contains_key(&self.id)
    }

    fn close(&self) -> BoxFuture<'_, QueueResult<()>> {
        // Hooks are dropped unfired: this close was requested.
        drop(self.broker.lock().remove_connection(self.id));
        Box::pin(async { Ok(()) })
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    id: u64,
}

impl MemoryChannel {
    fn declare_exchange_now(&self, topology: &Topology) -> QueueResult<()> {
        let mut state = self.broker.lock();
        state.check_channel(self.id)?;
        state
            .exchanges
            .entry(topology.exchange.clone())
            .or_default();
        Ok(())
    }

    fn bind_queue_now(&self, topology: &Topology) -> QueueResult<()> {
        let mut state = self.broker.lock();
        state.check_channel(self.id)?;
        let exchange = state.exchanges.get_mut(&topology.exchange).ok_or_else(|| {
            QueueError::Topology(format!("no exchange named {}", topology.exchange))
        })?;
        let binding = (topology.binding_key.clone(), topology.queue.clone());
        if !exchange.bindings.contains(&binding) {
            exchange.bindings.push(binding);
        }
        state.queues.entry(topology.queue.clone()).or_default();
        Ok(())
    }

    fn publish_now(&self, topology: &Topology, message: OutgoingMessage) -> QueueResult<()> {
        let mut state = self.broker.lock();
        state.check_channel(self.id)?;
        let exchange = state.exchanges.get(&topology.exchange).ok_or_else(|| {
            QueueError::Publish(format!("no exchange named {}", topology.exchange))
        })?;
        let targets: Vec<String> = exchange
            .bindings
            .iter()
            .filter(|(key, _)| *key == topology.binding_key)
            .map(|(_, queue)| queue.clone())
            .collect();

        state.published += 1;
        if targets.is_empty() {
            debug!(exchange = %topology.exchange, "message unroutable, dropped");
        }
        for queue in targets {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_back(Stored {
                    body: message.body.clone(),
                    content_type: Some(message.content_type.clone()),
                    redelivered: false,
                });
            }
            state.dispatch(&queue);
        }
        Ok(())
    }

    fn consume_now(&self, topology: &Topology) -> QueueResult<DeliveryStream> {
        let mut state = self.broker.lock();
        state.check_channel(self.id)?;
        let queue = state
            .queues
            .get_mut(&topology.queue)
            .ok_or_else(|| QueueError::Topology(format!("no queue named {}", topology.queue)))?;
        if queue.consumer.as_ref().is_some_and(|c| !c.tx.is_closed()) {
            return Err(QueueError::Topology(format!(
                "queue {} already has a consumer",
                topology.queue
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        queue.consumer = Some(ConsumerSlot { channel: self.id, tx });
        state.dispatch(&topology.queue);

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    fn ack_now(&self, delivery_tag: u64) -> QueueResult<()> {
        let mut state = self.broker.lock();
        state.check_channel(self.id)?;
        let found = state
            .queues
            .values_mut()
            .any(|q| q.unacked.remove(&delivery_tag).is_some());
        if !found {
            return Err(QueueError::Ack(format!("unknown delivery tag {delivery_tag}")));
        }
        state.acked += 1;
        Ok(())
    }
}

impl BrokerChannel for MemoryChannel {
    fn declare_exchange<'a>(&'a self, topology: &'a Topology) -> BoxFuture<'a, QueueResult<()>> {
        let result = self.declare_exchange_now(topology);
        Box::pin(async move { result })
    }

    fn bind_queue<'a>(&'a self, topology: &'a Topology) -> BoxFuture<'a, QueueResult<()>> {
        let result = self.bind_queue_now(topology);
        Box::pin(async move { result })
    }

    fn publish<'a>(
        &'a self,
        topology: &'a Topology,
        message: OutgoingMessage,
    ) -> BoxFuture<'a, QueueResult<()>> {
        let result = self.publish_now(topology, message);
        Box::pin(async move { result })
    }

    fn consume<'a>(
        &'a self,
        topology: &'a Topology,
        _consumer_tag: &'a str,
    ) -> BoxFuture<'a, QueueResult<DeliveryStream>> {
        let result = self.consume_now(topology);
        Box::pin(async move { result })
    }

    fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, QueueResult<()>> {
        let result = self.ack_now(delivery_tag);
        Box::pin(async move { result })
    }

    fn close(&self) -> BoxFuture<'_, QueueResult<()>> {
        let mut state = self.broker.lock();
        if state.channels.remove(&self.id).is_some() {
            state.release_channels(&HashSet::from([self.id]));
        }
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn channel(broker: &MemoryBroker) -> (Box<dyn BrokerConnection>, Box<dyn BrokerChannel>) {
        let conn = broker.dial().await.unwrap();
        let channel = conn.open_channel().await.unwrap();
        (conn, channel)
    }

    async fn declared(broker: &MemoryBroker, topology: &Topology) {
        let (conn, ch) = channel(broker).await;
        ch.declare_exchange(topology).await.unwrap();
        ch.bind_queue(topology).await.unwrap();
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_broker_refuses_dial() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        assert!(matches!(broker.dial().await, Err(QueueError::Connection(_))));
        broker.set_available(true);
        assert!(broker.dial().await.is_ok());
    }

    #[tokio::test]
    async fn routes_by_binding_key() {
        let broker = MemoryBroker::new();
        let topology = Topology::for_stream("s");
        declared(&broker, &topology).await;

        let (_conn, ch) = channel(&broker).await;
        ch.publish(&topology, OutgoingMessage::json(b"{}".to_vec()))
            .await
            .unwrap();

        let mut other = topology.clone();
        other.binding_key = "elsewhere".into();
        ch.publish(&other, OutgoingMessage::json(b"{}".to_vec()))
            .await
            .unwrap();

        assert_eq!(broker.published_count(), 2);
        assert_eq!(broker.queue_len("s"), 1);
    }

    #[tokio::test]
    async fn publish_without_exchange_fails() {
        let broker = MemoryBroker::new();
        let (_conn, ch) = channel(&broker).await;
        let result = ch
            .publish(&Topology::for_stream("s"), OutgoingMessage::json(vec![1]))
            .await;
        assert!(matches!(result, Err(QueueError::Publish(_))));
    }

    #[tokio::test]
    async fn consume_and_ack() {
        let broker = MemoryBroker::new();
        let topology = Topology::for_stream("s");
        declared(&broker, &topology).await;

        let (_conn, ch) = channel(&broker).await;
        ch.publish(&topology, OutgoingMessage::json(b"1".to_vec()))
            .await
            .unwrap();
        let mut deliveries = ch.consume(&topology, "t").await.unwrap();

        let delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"1");
        assert_eq!(delivery.content_type.as_deref(), Some("application/json"));
        assert!(!delivery.redelivered);

        ch.ack(delivery.delivery_tag).await.unwrap();
        assert_eq!(broker.acked_count(), 1);
        assert_eq!(broker.queue_len("s"), 0);
        assert!(matches!(
            ch.ack(delivery.delivery_tag).await,
            Err(QueueError::Ack(_))
        ));
    }

    #[tokio::test]
    async fn drop_connections_fires_hooks_and_requeues() {
        let broker = MemoryBroker::new();
        let topology = Topology::for_stream("s");
        declared(&broker, &topology).await;

        let (conn, ch) = channel(&broker).await;
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        conn.on_close(Box::new(move |_| flag.store(true, Ordering::SeqCst)));

        ch.publish(&topology, OutgoingMessage::json(b"1".to_vec()))
            .await
            .unwrap();
        let mut deliveries = ch.consume(&topology, "t").await.unwrap();
        let first = deliveries.next().await.unwrap().unwrap();

        broker.drop_connections();

        assert!(fired.load(Ordering::SeqCst));
        assert!(!conn.is_open());
        assert!(deliveries.next().await.is_none());
        assert!(matches!(
            ch.ack(first.delivery_tag).await,
            Err(QueueError::ChannelClosed(_))
        ));

        // The unacked message is handed out again on a new connection.
        let (_conn, ch) = channel(&broker).await;
        let mut deliveries = ch.consume(&topology, "t").await.unwrap();
        let again = deliveries.next().await.unwrap().unwrap();
        assert_eq!(again.body, b"1");
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn requested_close_does_not_fire_hook() {
        let broker = MemoryBroker::new();
        let conn = broker.dial().await.unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        conn.on_close(Box::new(move |_| flag.store(true, Ordering::SeqCst)));

        conn.close().await.unwrap();
        broker.drop_connections();

        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn messages_wait_for_a_consumer() {
        let broker = MemoryBroker::new();
        let topology = Topology::for_stream("s");
        declared(&broker, &topology).await;

        let (_conn, ch) = channel(&broker).await;
        for body in [b"a", b"b"] {
            ch.publish(&topology, OutgoingMessage::json(body.to_vec()))
                .await
                .unwrap();
        }
        assert!(!broker.has_consumer("s"));

        let mut deliveries = ch.consume(&topology, "t").await.unwrap();
        assert!(broker.has_consumer("s"));
        assert_eq!(deliveries.next().await.unwrap().unwrap().body, b"a");
        assert_eq!(deliveries.next().await.unwrap().unwrap().body, b"b");
    }
}
