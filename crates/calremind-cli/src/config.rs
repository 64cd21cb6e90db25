//! Daemon configuration.
//!
//! All settings live in a single `config.toml`, by default at
//! `~/.config/calremind/config.toml`. Every section is optional.
//!
//! ```toml
//! [store]
//! backend = "sqlite"
//! path = "/var/lib/calremind/events.db"
//!
//! [queue]
//! uri = "env::CALREMIND_AMQP_URI"
//! stream = "notifications"
//!
//! [scheduler]
//! period_secs = 60
//!
//! [sender]
//! from = "calremind <noreply@example.com>"
//!
//! [cleanup]
//! store_time_days = 30
//!
//! [[users]]
//! id = "u1"
//! name = "Ann"
//! email = "ann@example.com"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use calremind_core::{OwnerId, Recipient};
use calremind_server::{
    BackoffConfig, MailTemplates, NotifierConfig, QueueConfig, SchedulerConfig, SenderConfig,
};
use calremind_store::InMemoryUserDirectory;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Configuration for the `calremind` binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub store: StoreSettings,
    pub queue: QueueSettings,
    pub scheduler: SchedulerSettings,
    pub sender: SenderSettings,
    pub cleanup: CleanupSettings,
    pub users: Vec<UserEntry>,
}

/// Event store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Lost on exit. Only useful with `calremind run`.
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// SQLite database file. Defaults to `events.db` in the data directory.
    pub path: Option<PathBuf>,
    /// Whether conflict checks compare whole event spans or start instants.
    pub include_duration: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            include_duration: true,
        }
    }
}

impl StoreSettings {
    /// Returns the SQLite path, falling back to the data directory.
    pub fn sqlite_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| DaemonConfig::default_data_dir().join("events.db"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// AMQP broker URI (supports `pass::` and `env::`). Without it the
    /// in-process broker is used.
    pub uri: Option<String>,
    pub stream: String,
    pub listen_queue: Option<String>,
    pub consumer_tag: String,
    pub backoff: BackoffSettings,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let defaults = QueueConfig::default();
        Self {
            uri: None,
            stream: defaults.stream,
            listen_queue: defaults.listen_queue,
            consumer_tag: defaults.consumer_tag,
            backoff: BackoffSettings::default(),
        }
    }
}

impl QueueSettings {
    pub fn to_queue_config(&self) -> CliResult<QueueConfig> {
        let mut config = QueueConfig::new(&self.stream)
            .with_consumer_tag(&self.consumer_tag)
            .with_backoff(self.backoff.to_backoff_config()?);
        if let Some(queue) = &self.listen_queue {
            config = config.with_listen_queue(queue);
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub initial_secs: f64,
    pub multiplier: f64,
    pub max_secs: f64,
    pub max_elapsed_secs: f64,
    pub jitter: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        let defaults = BackoffConfig::default();
        Self {
            initial_secs: defaults.initial_interval.as_secs_f64(),
            multiplier: defaults.multiplier,
            max_secs: defaults.max_interval.as_secs_f64(),
            max_elapsed_secs: defaults.max_elapsed.as_secs_f64(),
            jitter: defaults.jitter_fraction,
        }
    }
}

impl BackoffSettings {
    pub fn to_backoff_config(&self) -> CliResult<BackoffConfig> {
        let initial = seconds("queue.backoff.initial_secs", self.initial_secs)?;
        let max = seconds("queue.backoff.max_secs", self.max_secs)?;
        let max_elapsed = seconds("queue.backoff.max_elapsed_secs", self.max_elapsed_secs)?;
        if initial.is_zero() || max < initial {
            return Err(CliError::config(
                "queue.backoff needs 0 < initial_secs <= max_secs",
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(CliError::config("queue.backoff.multiplier must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(CliError::config("queue.backoff.jitter must be between 0 and 1"));
        }
        Ok(BackoffConfig::default()
            .with_intervals(initial, max, self.multiplier)
            .with_max_elapsed(max_elapsed)
            .with_jitter(self.jitter))
    }
}

fn seconds(field: &str, value: f64) -> CliResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        CliError::config(format!("{field} must be a finite, non-negative number (got {value})"))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Seconds between notifier passes.
    pub period_secs: u64,
    pub max_consecutive_failures: Option<u32>,
    /// Due events handled per pass.
    pub max_batch: Option<usize>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        Self {
            period_secs: scheduler.period.as_secs(),
            max_consecutive_failures: scheduler.max_consecutive_failures,
            max_batch: NotifierConfig::default().max_batch,
        }
    }
}

impl SchedulerSettings {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(Duration::from_secs(self.period_secs))
            .with_max_consecutive_failures(self.max_consecutive_failures)
    }

    pub fn to_notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            max_batch: self.max_batch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderSettings {
    pub from: String,
    pub subject_prefix: String,
    /// Template name used for reminders.
    pub template: String,
    /// Body for `template`, read from disk. `{{name}}`, `{{title}}`,
    /// `{{start}}` and friends are substituted.
    pub template_file: Option<PathBuf>,
    /// Mail is logged instead of sent when unset.
    pub smtp: Option<SmtpSettings>,
}

impl Default for SenderSettings {
    fn default() -> Self {
        let defaults = SenderConfig::default();
        Self {
            from: defaults.from,
            subject_prefix: defaults.subject_prefix,
            template: defaults.template,
            template_file: None,
            smtp: None,
        }
    }
}

impl SenderSettings {
    pub fn to_sender_config(&self) -> SenderConfig {
        SenderConfig {
            from: self.from.clone(),
            template: self.template.clone(),
            subject_prefix: self.subject_prefix.clone(),
        }
    }

    /// Returns the built-in templates plus `template_file`, if any.
    pub fn templates(&self) -> CliResult<MailTemplates> {
        let templates = MailTemplates::default();
        match &self.template_file {
            Some(path) => {
                let body = std::fs::read_to_string(path).map_err(|e| {
                    CliError::config(format!("failed to read template {}: {e}", path.display()))
                })?;
                Ok(templates.with_template(&self.template, body))
            }
            None => Ok(templates),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    /// Supports `pass::` and `env::` references.
    pub password: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    pub enabled: bool,
    pub period_secs: u64,
    /// Finished events are kept this many days.
    pub store_time_days: i64,
    /// Re-arm events stuck in `blocked` for this long. Off when unset.
    pub reclaim_after_secs: Option<i64>,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: 3600,
            store_time_days: 30,
            reclaim_after_secs: None,
        }
    }
}

impl CleanupSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn store_time(&self) -> CliResult<chrono::Duration> {
        if self.store_time_days < 0 {
            return Err(CliError::config("cleanup.store_time_days must not be negative"));
        }
        chrono::Duration::try_days(self.store_time_days)
            .filter(|age| chrono::Utc::now().checked_sub_signed(*age).is_some())
            .ok_or_else(|| {
                CliError::config(format!(
                    "cleanup.store_time_days {} is too large",
                    self.store_time_days
                ))
            })
    }

    pub fn reclaim_after(&self) -> CliResult<Option<chrono::Duration>> {
        let Some(secs) = self.reclaim_after_secs else {
            return Ok(None);
        };
        if secs <= 0 {
            return Err(CliError::config("cleanup.reclaim_after_secs must be positive"));
        }
        chrono::Duration::try_seconds(secs)
            .filter(|age| chrono::Utc::now().checked_sub_signed(*age).is_some())
            .map(Some)
            .ok_or_else(|| {
                CliError::config(format!("cleanup.reclaim_after_secs {secs} is too large"))
            })
    }
}

/// One known event owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl DaemonConfig {
    /// Loads configuration from the default path, or defaults if the file
    /// does not exist.
    pub fn load() -> CliResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> CliResult<Self> {
        toml::from_str(content).map_err(|e| CliError::config(format!("failed to parse config: {e}")))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calremind")
            .join("config.toml")
    }

    /// Returns the default data directory.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calremind")
    }

    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> CliResult<()> {
        if self.scheduler.period_secs == 0 {
            return Err(CliError::config("scheduler.period_secs must be positive"));
        }
        if self.cleanup.enabled && self.cleanup.period_secs == 0 {
            return Err(CliError::config("cleanup.period_secs must be positive"));
        }
        self.cleanup.store_time()?;
        self.cleanup.reclaim_after()?;
        if self.queue.stream.trim().is_empty() {
            return Err(CliError::config("queue.stream must not be empty"));
        }
        self.queue.backoff.to_backoff_config()?;
        for user in &self.users {
            if user.id.trim().is_empty() || user.email.trim().is_empty() {
                return Err(CliError::config(format!(
                    "user entries need an id and an email (got id {:?})",
                    user.id
                )));
            }
        }
        Ok(())
    }

    /// Builds the owner directory from `[[users]]`.
    pub fn user_directory(&self) -> InMemoryUserDirectory {
        self.users
            .iter()
            .map(|u| (OwnerId::new(&u.id), Recipient::new(&u.name, &u.email)))
            .collect()
    }
}
