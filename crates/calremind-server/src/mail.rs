//! Outgoing mail.
//!
//! The sender renders a named template with a flat string map and hands the
//! result to a [`Mailer`]. [`LogMailer`] logs and records mail in memory;
//! the `smtp` feature adds [`SmtpMailer`].

use std::collections::{BTreeMap, HashMap};

use calremind_store::BoxFuture;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Name of the built-in reminder template.
pub const NOTIFICATION_TEMPLATE: &str = "notification";

const NOTIFICATION_BODY: &str = "Hello {{name}},\n\n\
This is a reminder for \"{{title}}\", starting at {{start}} ({{duration}}).\n";

/// Result type for mail operations.
pub type MailResult<T> = Result<T, MailError>;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("unknown mail template: {0}")]
    UnknownTemplate(String),

    #[error("mail has no recipient")]
    MissingRecipient,

    #[error("invalid address: {0}")]
    Address(String),

    #[error("mail transport failed: {0}")]
    Transport(String),
}

/// A mail to render and send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    /// Values substituted into the template.
    pub data: BTreeMap<String, String>,
}

impl Mail {
    fn check_recipients(&self) -> MailResult<()> {
        if self.to.iter().all(|to| to.trim().is_empty()) {
            return Err(MailError::MissingRecipient);
        }
        Ok(())
    }
}

/// Delivers rendered mail.
pub trait Mailer: Send + Sync {
    /// Renders `template` with `mail.data` and sends it.
    fn send_mail<'a>(&'a self, template: &'a str, mail: Mail) -> BoxFuture<'a, MailResult<()>>;
}

/// Named body templates using `{{key}}` placeholders.
///
/// Placeholders without a value are left untouched.
#[derive(Debug, Clone)]
pub struct MailTemplates {
    templates: HashMap<String, String>,
}

impl Default for MailTemplates {
    fn default() -> Self {
        Self::empty().with_template(NOTIFICATION_TEMPLATE, NOTIFICATION_BODY)
    }
}

impl MailTemplates {
    /// A template set without the built-in reminder.
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_template(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.insert(name.into(), body.into());
        self
    }

    /// Fills `{{key}}` placeholders in one pass. Substituted values are
    /// not scanned again; unknown placeholders are kept as written.
    pub fn render(&self, name: &str, data: &BTreeMap<String, String>) -> MailResult<String> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| MailError::UnknownTemplate(name.to_string()))?;
        let mut body = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(open) = rest.find("{{") {
            body.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                rest = &rest[open..];
                break;
            };
            let key = &after[..close];
            match data.get(key) {
                Some(value) => body.push_str(value),
                None => body.push_str(&rest[open..open + close + 4]),
            }
            rest = &after[close + 2..];
        }
        body.push_str(rest);
        Ok(body)
    }
}

/// A mail accepted by [`LogMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub template: String,
    pub mail: Mail,
    pub body: String,
}

/// Logs mail instead of sending it, keeping a copy of everything accepted.
#[derive(Debug, Default)]
pub struct LogMailer {
    templates: MailTemplates,
    sent: Mutex<Vec<SentMail>>,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_templates(mut self, templates: MailTemplates) -> Self {
        self.templates = templates;
        self
    }

    /// Returns every mail accepted so far.
    pub async fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().await.clone()
    }
}

impl Mailer for LogMailer {
    fn send_mail<'a>(&'a self, template: &'a str, mail: Mail) -> BoxFuture<'a, MailResult<()>> {
        Box::pin(async move {
            mail.check_recipients()?;
            let body = self.templates.render(template, &mail.data)?;
            info!(to = ?mail.to, subject = %mail.subject, template, "mail sent");
            self.sent.lock().await.push(SentMail {
                template: template.to_string(),
                mail,
                body,
            });
            Ok(())
        })
    }
}

#[cfg(feature = "smtp")]
pub use smtp::{SmtpConfig, SmtpMailer};

#[cfg(feature = "smtp")]
mod smtp {
    use calremind_store::BoxFuture;
    use lettre::message::Mailbox;
    use lettre::message::header::ContentType;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
    use tracing::info;

    use super::{Mail, MailError, MailResult, MailTemplates, Mailer};

    /// SMTP relay settings (STARTTLS).
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SmtpConfig {
        pub host: String,
        pub port: u16,
        pub username: Option<String>,
        pub password: Option<String>,
    }

    impl Default for SmtpConfig {
        fn default() -> Self {
            Self {
                host: "localhost".into(),
                port: 587,
                username: None,
                password: None,
            }
        }
    }

    /// Sends mail through an SMTP relay.
    pub struct SmtpMailer {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        templates: MailTemplates,
    }

    impl SmtpMailer {
        pub fn new(config: &SmtpConfig, templates: MailTemplates) -> MailResult<Self> {
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Transport(format!("SMTP relay: {e}")))?
                .port(config.port);
            if let (Some(user), Some(pass)) = (&config.username, &config.password) {
                builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
            }
            Ok(Self {
                transport: builder.build(),
                templates,
            })
        }

        fn build(&self, template: &str, mail: &Mail) -> MailResult<Message> {
            mail.check_recipients()?;
            let body = self.templates.render(template, &mail.data)?;
            let from: Mailbox = mail
                .from
                .parse()
                .map_err(|e| MailError::Address(format!("{}: {e}", mail.from)))?;

            let mut builder = Message::builder().from(from).subject(mail.subject.clone());
            for to in mail.to.iter().filter(|to| !to.trim().is_empty()) {
                let mailbox: Mailbox = to
                    .parse()
                    .map_err(|e| MailError::Address(format!("{to}: {e}")))?;
                builder = builder.to(mailbox);
            }
            builder
                .header(ContentType::TEXT_PLAIN)
                .body(body)
                .map_err(|e| MailError::Transport(format!("build message: {e}")))
        }
    }

    impl Mailer for SmtpMailer {
        fn send_mail<'a>(&'a self, template: &'a str, mail: Mail) -> BoxFuture<'a, MailResult<()>> {
            Box::pin(async move {
                let message = self.build(template, &mail)?;
                self.transport
                    .send(message)
                    .await
                    .map_err(|e| MailError::Transport(e.to_string()))?;
                info!(to = ?mail.to, subject = %mail.subject, "mail sent over SMTP");
                Ok(())
            })
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("name".to_string(), "Ann".to_string()),
            ("title".to_string(), "Standup".to_string()),
            ("start".to_string(), "2025-02-05 10:00 UTC".to_string()),
            ("duration".to_string(), "15 min".to_string()),
        ])
    }

    fn mail(to: &str) -> Mail {
        Mail {
            from: "calremind <noreply@localhost>".into(),
            to: vec![to.into()],
            subject: "Reminder: Standup".into(),
            data: data(),
        }
    }

    #[test]
    fn renders_notification_template() {
        let body = MailTemplates::default()
            .render(NOTIFICATION_TEMPLATE, &data())
            .unwrap();
        assert_eq!(
            body,
            "Hello Ann,\n\nThis is a reminder for \"Standup\", starting at 2025-02-05 10:00 UTC (15 min).\n"
        );
    }

    #[test]
    fn unfilled_placeholders_are_kept() {
        let templates = MailTemplates::empty().with_template("t", "{{a}} and {{b}}");
        let data = BTreeMap::from([("a".to_string(), "x".to_string())]);
        assert_eq!(templates.render("t", &data).unwrap(), "x and {{b}}");
    }

    #[test]
    fn values_are_not_expanded_again() {
        let templates = MailTemplates::empty().with_template("t", "Hi {{name}}: {{title}} {{");
        let data = BTreeMap::from([
            ("name".to_string(), "{{title}}".to_string()),
            ("title".to_string(), "Standup".to_string()),
        ]);
        assert_eq!(templates.render("t", &data).unwrap(), "Hi {{title}}: Standup {{");
    }

    #[test]
    fn unknown_template_is_an_error() {
        let err = MailTemplates::default().render("nope", &data()).unwrap_err();
        assert!(matches!(err, MailError::UnknownTemplate(name) if name == "nope"));
    }

    #[tokio::test]
    async fn log_mailer_records_rendered_mail() {
        let mailer = LogMailer::new();
        mailer
            .send_mail(NOTIFICATION_TEMPLATE, mail("ann@example.com"))
            .await
            .unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].mail.to, vec!["ann@example.com".to_string()]);
        assert!(sent[0].body.starts_with("Hello Ann,"));
    }

    #[tokio::test]
    async fn log_mailer_requires_recipient() {
        let mailer = LogMailer::new();
        let err = mailer
            .send_mail(NOTIFICATION_TEMPLATE, mail(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::MissingRecipient));
        assert!(mailer.sent().await.is_empty());
    }
}
