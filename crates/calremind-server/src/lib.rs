//! Notification pipeline: scheduler, notifier, queue, sender.
//!
//! This crate moves reminders from the event store to the recipients'
//! mailboxes:
//! - a [`Scheduler`] ticks a [`Notifier`], which claims due events and
//!   publishes one [`Notification`](calremind_protocol::Notification) each
//! - the durable queue ([`queue`]) carries them to the [`Sender`]
//! - the sender mails each notification and confirms it through
//!   [`EventApi`](calremind_store::EventApi)
//! - [`CleanupAction`] and [`ReclaimAction`] keep the store tidy
//!
//! Every task stops through one [`ShutdownHandle`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use calremind_server::{
//!     Consumer, LogMailer, MemoryBroker, Notifier, Producer, QueueConfig, Scheduler,
//!     SchedulerConfig, Sender, ShutdownHandle,
//! };
//! use calremind_store::{Calendar, InMemoryEventStore, InMemoryUserDirectory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryEventStore::new());
//!     let calendar = Arc::new(Calendar::new(store.clone()));
//!     let broker = Arc::new(MemoryBroker::new());
//!     let queue = QueueConfig::default();
//!     let shutdown = ShutdownHandle::new();
//!
//!     let notifier = Notifier::new(
//!         store,
//!         Arc::new(InMemoryUserDirectory::new()),
//!         Producer::new(broker.clone(), &queue),
//!     );
//!     let scheduler = Scheduler::new(SchedulerConfig::new(Duration::from_secs(60)));
//!     tokio::spawn(scheduler.run(notifier, shutdown.clone()));
//!
//!     let sender = Sender::new(Consumer::new(broker, &queue), Arc::new(LogMailer::new()), calendar);
//!     sender.run(shutdown).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod housekeeping;
pub mod mail;
mod notifier;
pub mod queue;
mod scheduler;
mod sender;
mod signals;

pub use config::{BackoffConfig, Backoff, DEFAULT_STREAM, NotifierConfig, QueueConfig, SenderConfig};
pub use error::{ServerError, ServerResult};
pub use housekeeping::{CleanupAction, ReclaimAction};
pub use mail::{LogMailer, Mail, MailError, MailResult, MailTemplates, Mailer, NOTIFICATION_TEMPLATE};
#[cfg(feature = "smtp")]
pub use mail::{SmtpConfig, SmtpMailer};
pub use notifier::{NotifyReport, Notifier};
#[cfg(feature = "amqp")]
pub use queue::AmqpBroker;
pub use queue::{
    Broker, ConnectionState, Consumer, MemoryBroker, Message, Producer, QueueConnection,
    QueueError, QueueResult, Topology,
};
pub use scheduler::{
    Action, Scheduler, SchedulerCommand, SchedulerConfig, SchedulerHandle, SchedulerState,
    SharedSchedulerState,
};
pub use sender::{Sender, SenderReport};
pub use signals::{ShutdownHandle, ShutdownSignal, SignalHandler};
