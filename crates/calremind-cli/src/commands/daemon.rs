//! Daemon commands: `run`, `scheduler` and `sender`.
//!
//! This module wires the pipeline from configuration:
//! - Event store (memory or SQLite) behind a [`Calendar`]
//! - Broker (in-process, or AMQP when `queue.uri` is set)
//! - Mailer (logging, or SMTP when `[sender.smtp]` is set)
//! - One [`Scheduler`] per periodic job, plus the [`Sender`]
//!
//! Every task shares one [`ShutdownHandle`], which only a signal triggers.
//! A task that fails or ends early is logged and leaves the others running;
//! the daemon then exits with an error once it stops.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use calremind_server::{
    Broker, CleanupAction, Consumer, LogMailer, Mailer, MemoryBroker, Notifier, Producer,
    ReclaimAction, Scheduler, SchedulerConfig, Sender, ServerError, ServerResult, ShutdownHandle,
    SignalHandler,
};
use calremind_store::{Calendar, EventApi, InMemoryUserDirectory, UserDirectory};

use crate::commands::open_calendar;
use crate::config::{DaemonConfig, QueueSettings, SenderSettings};
use crate::error::{CliError, CliResult};
#[cfg(any(feature = "amqp", feature = "smtp"))]
use crate::secret;

/// Which half of the pipeline a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Notifier, housekeeping and sender in one process.
    All,
    /// Notifier and housekeeping, publishing to an external broker.
    Scheduler,
    /// Sender, consuming from an external broker.
    Sender,
}

impl Role {
    fn runs_scheduler(self) -> bool {
        matches!(self, Self::All | Self::Scheduler)
    }

    fn runs_sender(self) -> bool {
        matches!(self, Self::All | Self::Sender)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Scheduler => f.write_str("scheduler"),
            Self::Sender => f.write_str("sender"),
        }
    }
}

/// The collaborators every pipeline task is built from.
#[derive(Clone)]
pub struct Components {
    pub calendar: Calendar,
    pub broker: Arc<dyn Broker>,
    pub mailer: Arc<dyn Mailer>,
    pub users: Arc<dyn UserDirectory>,
}

impl Components {
    /// Builds the store, broker and mailer from configuration.
    pub fn build(config: &DaemonConfig, role: Role) -> CliResult<Self> {
        let calendar = open_calendar(&config.store)?;
        let broker = build_broker(&config.queue, role)?;
        let mailer = build_mailer(&config.sender)?;
        let users: InMemoryUserDirectory = config.user_directory();
        if role.runs_scheduler() && users.is_empty() {
            warn!("no [[users]] configured; every due event will fail to notify");
        }

        info!(
            store = calendar.store().name(),
            broker = broker.name(),
            users = users.len(),
            "components ready"
        );

        Ok(Self {
            calendar,
            broker,
            mailer,
            users: Arc::new(users),
        })
    }
}

/// Starts the daemon in the foreground.
///
/// Blocks until SIGTERM/SIGINT or until every pipeline task has stopped.
pub async fn run(config: &DaemonConfig, role: Role) -> CliResult<()> {
    config.validate()?;

    // 1. Signal handler
    let signals = SignalHandler::new();
    signals.spawn_listener()?;

    // 2. Store, broker, mailer
    let components = Components::build(config, role)?;

    // 3. Pipeline
    serve(config, role, components, signals.shutdown_handle()).await
}

/// Runs the pipeline tasks for `role` until `shutdown` fires or none are left.
///
/// Returns the first task failure, if any. A task that returns before
/// shutdown counts as failed.
pub async fn serve(
    config: &DaemonConfig,
    role: Role,
    components: Components,
    shutdown: ShutdownHandle,
) -> CliResult<()> {
    let Components {
        calendar,
        broker,
        mailer,
        users,
    } = components;
    let queue = config.queue.to_queue_config()?;
    let events: Arc<dyn EventApi> = Arc::new(calendar.clone());
    let mut tasks: JoinSet<(&'static str, ServerResult<()>)> = JoinSet::new();

    if role.runs_scheduler() {
        let producer = Producer::new(Arc::clone(&broker), &queue);
        let notifier = Notifier::new(Arc::clone(calendar.store()), users, producer)
            .with_config(config.scheduler.to_notifier_config());
        let scheduler = Scheduler::new(config.scheduler.to_scheduler_config());
        let stop = shutdown.clone();
        tasks.spawn(async move { ("notifier", scheduler.run(notifier, stop).await) });

        if config.cleanup.enabled {
            let store_time = config.cleanup.store_time()?;
            let cleanup = CleanupAction::new(Arc::clone(&events), store_time);
            let scheduler = Scheduler::new(SchedulerConfig::new(config.cleanup.period()));
            let stop = shutdown.clone();
            tasks.spawn(async move { ("cleanup", scheduler.run(cleanup, stop).await) });
        }

        if let Some(timeout) = config.cleanup.reclaim_after()? {
            let reclaim = ReclaimAction::new(Arc::clone(&events), timeout);
            let scheduler = Scheduler::new(SchedulerConfig::new(config.cleanup.period()));
            let stop = shutdown.clone();
            tasks.spawn(async move { ("reclaim", scheduler.run(reclaim, stop).await) });
        }
    }

    if role.runs_sender() {
        let consumer = Consumer::new(Arc::clone(&broker), &queue);
        let sender = Sender::new(consumer, mailer, Arc::clone(&events))
            .with_config(config.sender.to_sender_config());
        let stop = shutdown.clone();
        tasks.spawn(async move { ("sender", sender.run(stop).await.map(|_| ())) });
    }

    info!(%role, tasks = tasks.len(), stream = %queue.stream, "calremind started");

    let mut failure: Option<CliError> = None;
    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok((task, Ok(()))) if shutdown.is_shutdown() => {
                info!(task, "task stopped");
                continue;
            }
            Ok((task, Ok(()))) => {
                error!(task, remaining = tasks.len(), "task stopped before shutdown");
                CliError::Task {
                    task: task.into(),
                    message: "stopped before shutdown".into(),
                }
            }
            Ok((task, Err(e))) => {
                error!(task, remaining = tasks.len(), error = %e, "task failed");
                CliError::Server(e)
            }
            Err(e) => {
                error!(remaining = tasks.len(), error = %e, "task panicked");
                CliError::Task {
                    task: "pipeline".into(),
                    message: e.to_string(),
                }
            }
        };
        failure.get_or_insert(err);
    }

    info!("calremind stopped");
    failure.map_or(Ok(()), Err)
}

/// Picks the broker: in-process unless `queue.uri` is set.
fn build_broker(settings: &QueueSettings, role: Role) -> CliResult<Arc<dyn Broker>> {
    match &settings.uri {
        Some(uri) => amqp_broker(uri),
        None if role == Role::All => Ok(Arc::new(MemoryBroker::new())),
        None => Err(CliError::config(format!(
            "`calremind {role}` needs queue.uri; the in-process broker only works with `calremind run`"
        ))),
    }
}

#[cfg(feature = "amqp")]
fn amqp_broker(uri: &str) -> CliResult<Arc<dyn Broker>> {
    let uri = secret::resolve(uri)?;
    Ok(Arc::new(calremind_server::AmqpBroker::new(uri)))
}

#[cfg(not(feature = "amqp"))]
fn amqp_broker(_uri: &str) -> CliResult<Arc<dyn Broker>> {
    Err(CliError::config("queue.uri requires the `amqp` feature"))
}

/// Picks the mailer: SMTP when configured, otherwise log only.
fn build_mailer(settings: &SenderSettings) -> CliResult<Arc<dyn Mailer>> {
    let templates = settings.templates()?;
    match &settings.smtp {
        Some(smtp) => smtp_mailer(smtp, templates),
        None => {
            info!("no [sender.smtp] configured; mail is logged, not sent");
            Ok(Arc::new(LogMailer::new().with_templates(templates)))
        }
    }
}

#[cfg(feature = "smtp")]
fn smtp_mailer(
    settings: &crate::config::SmtpSettings,
    templates: calremind_server::MailTemplates,
) -> CliResult<Arc<dyn Mailer>> {
    let config = calremind_server::SmtpConfig {
        host: settings.host.clone(),
        port: settings.port,
        username: settings.username.clone(),
        password: secret::resolve_opt(settings.password.as_deref())?,
    };
    let mailer = calremind_server::SmtpMailer::new(&config, templates).map_err(ServerError::from)?;
    Ok(Arc::new(mailer))
}

#[cfg(not(feature = "smtp"))]
fn smtp_mailer(
    _settings: &crate::config::SmtpSettings,
    _templates: calremind_server::MailTemplates,
) -> CliResult<Arc<dyn Mailer>> {
    Err(CliError::Server(ServerError::config(
        "[sender.smtp] requires the `smtp` feature",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles() {
        assert!(Role::All.runs_scheduler() && Role::All.runs_sender());
        assert!(Role::Scheduler.runs_scheduler() && !Role::Scheduler.runs_sender());
        assert!(!Role::Sender.runs_scheduler() && Role::Sender.runs_sender());
        assert_eq!(Role::Sender.to_string(), "sender");
    }

    #[test]
    fn split_roles_need_a_broker_uri() {
        let settings = QueueSettings::default();
        assert!(build_broker(&settings, Role::All).is_ok());
        let err = build_broker(&settings, Role::Sender).err().unwrap();
        assert!(err.to_string().contains("queue.uri"));
    }

    #[cfg(not(feature = "amqp"))]
    #[test]
    fn broker_uri_without_amqp_feature() {
        let settings = QueueSettings {
            uri: Some("amqp://localhost".into()),
            ..Default::default()
        };
        assert!(matches!(
            build_broker(&settings, Role::All),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn log_mailer_without_smtp() {
        assert!(build_mailer(&SenderSettings::default()).is_ok());
    }
}
