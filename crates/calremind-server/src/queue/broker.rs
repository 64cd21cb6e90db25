//! Broker abstraction.
//!
//! These traits are the seam between the pipeline and a concrete message
//! broker. [`MemoryBroker`](super::MemoryBroker) implements them in-process;
//! the `amqp` feature adds an AMQP 0.9.1 implementation.

use calremind_protocol::CONTENT_TYPE;
use calremind_store::BoxFuture;
use futures_util::stream::BoxStream;

use super::error::{QueueError, QueueResult};
use super::topology::Topology;

/// Callback fired once when the broker closes a connection.
pub type CloseHook = Box<dyn FnOnce(QueueError) + Send>;

/// Stream of deliveries for one consumer registration.
///
/// The stream ends when the channel or connection goes away.
pub type DeliveryStream = BoxStream<'static, QueueResult<Delivery>>;

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub content_type: String,
    /// Ask the broker to persist the message to disk.
    pub persistent: bool,
}

impl OutgoingMessage {
    /// A persistent JSON message.
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            body,
            content_type: CONTENT_TYPE.to_string(),
            persistent: true,
        }
    }
}

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge the delivery.
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    /// Set when the broker delivered this message before without an ack.
    pub redelivered: bool,
}

/// Opens connections to a broker.
pub trait Broker: Send + Sync {
    /// Returns a short name for logs (e.g., "memory", "amqp").
    fn name(&self) -> &str;

    /// Opens a new connection.
    fn dial(&self) -> BoxFuture<'_, QueueResult<Box<dyn BrokerConnection>>>;
}

/// A live connection to a broker.
pub trait BrokerConnection: Send + Sync {
    fn open_channel(&self) -> BoxFuture<'_, QueueResult<Box<dyn BrokerChannel>>>;

    /// Registers a hook fired when the broker drops this connection.
    ///
    /// Not fired for closes requested through [`BrokerConnection::close`].
    fn on_close(&self, hook: CloseHook);

    fn is_open(&self) -> bool;

    fn close(&self) -> BoxFuture<'_, QueueResult<()>>;
}

/// A channel on a connection.
pub trait BrokerChannel: Send + Sync {
    /// Declares the durable exchange of `topology`.
    fn declare_exchange<'a>(&'a self, topology: &'a Topology) -> BoxFuture<'a, QueueResult<()>>;

    /// Declares the durable queue of `topology` and binds it to the
    /// exchange with the binding key.
    fn bind_queue<'a>(&'a self, topology: &'a Topology) -> BoxFuture<'a, QueueResult<()>>;

    /// Publishes to the exchange with the binding key as routing key.
    fn publish<'a>(
        &'a self,
        topology: &'a Topology,
        message: OutgoingMessage,
    ) -> BoxFuture<'a, QueueResult<()>>;

    /// Starts consuming the queue of `topology`.
    fn consume<'a>(
        &'a self,
        topology: &'a Topology,
        consumer_tag: &'a str,
    ) -> BoxFuture<'a, QueueResult<DeliveryStream>>;

    fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, QueueResult<()>>;

    fn close(&self) -> BoxFuture<'_, QueueResult<()>>;
}
