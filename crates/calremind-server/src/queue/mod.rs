//! Durable message queue between the notifier and the sender.
//!
//! The [`Broker`] traits abstract the transport. [`Producer`] publishes
//! notifications to the stream exchange, [`Consumer`] subscribes to the
//! stream queue and survives broker restarts.

#[cfg(feature = "amqp")]
mod amqp;
mod broker;
mod connection;
mod consumer;
mod error;
mod memory;
mod producer;
mod topology;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use broker::{
    Broker, BrokerChannel, BrokerConnection, CloseHook, Delivery, DeliveryStream, OutgoingMessage,
};
pub use connection::{ConnectionState, QueueConnection};
pub use consumer::{Consumer, Message};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryBroker;
pub use producer::Producer;
pub use topology::Topology;
