//! Mails queued notifications and confirms them.
//!
//! Deliveries are acknowledged by the consumer before they reach the
//! sender, so a notification whose mail fails is not redelivered. The event
//! stays `blocked` and is only retried if a reclaim pass re-arms it.

use std::collections::BTreeMap;
use std::sync::Arc;

use calremind_protocol::{Notification, check_content_type, decode_message};
use calremind_store::EventApi;
use chrono::Duration;
use tracing::{debug, info, warn};

use crate::config::SenderConfig;
use crate::error::ServerResult;
use crate::mail::{Mail, Mailer};
use crate::queue::{Consumer, Message, QueueError};
use crate::signals::ShutdownHandle;

/// Outcome of a sender run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderReport {
    pub received: usize,
    /// Mailed and confirmed.
    pub sent: usize,
    pub failed: usize,
}

pub struct Sender {
    consumer: Consumer,
    mailer: Arc<dyn Mailer>,
    events: Arc<dyn EventApi>,
    config: SenderConfig,
}

impl Sender {
    pub fn new(consumer: Consumer, mailer: Arc<dyn Mailer>, events: Arc<dyn EventApi>) -> Self {
        Self {
            consumer,
            mailer,
            events,
            config: SenderConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Processes messages until shutdown.
    ///
    /// Returns an error if the consumer gives up on the broker first.
    pub async fn run(self, shutdown: ShutdownHandle) -> ServerResult<SenderReport> {
        let Self {
            consumer,
            mailer,
            events,
            config,
        } = self;

        let mut report = SenderReport::default();
        let mut messages = match consumer.consume(shutdown.clone()).await {
            Ok(messages) => messages,
            Err(QueueError::Cancelled) => return Ok(report),
            Err(e) => return Err(e.into()),
        };
        info!(template = %config.template, "sender started");

        while let Some(message) = messages.recv().await {
            report.received += 1;
            let tag = message.delivery_tag;
            match process(&config, mailer.as_ref(), events.as_ref(), message).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(tag, error = %e, "notification not sent");
                }
            }
        }

        info!(
            received = report.received,
            sent = report.sent,
            failed = report.failed,
            "sender stopped"
        );
        if !shutdown.is_shutdown() {
            return Err(QueueError::ChannelClosed("consumer gave up on the broker".into()).into());
        }
        Ok(report)
    }
}

async fn process(
    config: &SenderConfig,
    mailer: &dyn Mailer,
    events: &dyn EventApi,
    message: Message,
) -> ServerResult<()> {
    check_content_type(message.content_type.as_deref())?;
    let notification: Notification = decode_message(&message.body)?;
    if message.redelivered {
        debug!(event_id = %notification.event_id, "processing redelivered notification");
    }

    let mail = build_mail(config, &notification);
    mailer.send_mail(&config.template, mail).await?;
    events.set_notified(notification.event_id).await?;
    debug!(event_id = %notification.event_id, to = %notification.user_email, "notification confirmed");
    Ok(())
}

pub(crate) fn build_mail(config: &SenderConfig, notification: &Notification) -> Mail {
    let data = BTreeMap::from([
        ("event_id".to_string(), notification.event_id.to_string()),
        ("name".to_string(), notification.user_name.clone()),
        ("email".to_string(), notification.user_email.clone()),
        ("title".to_string(), notification.title.clone()),
        (
            "start".to_string(),
            notification.start.format("%Y-%m-%d %H:%M UTC").to_string(),
        ),
        ("duration".to_string(), format_duration(notification.duration)),
    ]);
    Mail {
        from: config.from.clone(),
        to: vec![notification.user_email.clone()],
        subject: format!("{}{}", config.subject_prefix, notification.title),
        data,
    }
}

fn format_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes();
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m} min"),
        (h, 0) => format!("{h} h"),
        (h, m) => format!("{h} h {m} min"),
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("consumer", &self.consumer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
