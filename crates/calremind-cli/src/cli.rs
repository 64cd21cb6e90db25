//! Command-line interface definition.

use std::path::PathBuf;

use calremind_core::EventId;
use calremind_core::tracing::TracingOutputFormat;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// calremind - calendar reminders delivered by mail
#[derive(Debug, Parser)]
#[command(name = "calremind")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CALREMIND_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Log format: pretty, compact or json
    #[arg(long, env = "CALREMIND_LOG_FORMAT", global = true)]
    pub log_format: Option<TracingOutputFormat>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Returns true for the long-running commands.
    pub fn is_daemon(&self) -> bool {
        matches!(
            self.command,
            Command::Run | Command::Scheduler | Command::Sender
        )
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the notifier, sender and housekeeping in one process
    Run,

    /// Run the notifier and housekeeping only, publishing to the broker
    Scheduler,

    /// Run the sender only, consuming from the broker
    Sender,

    /// Manage events
    Event {
        #[command(subcommand)]
        action: EventAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Event actions.
#[derive(Debug, Subcommand)]
pub enum EventAction {
    /// Create an event, refusing double bookings
    Add {
        /// Owner id, as listed under [[users]]
        #[arg(long)]
        owner: String,

        /// Event title
        #[arg(long)]
        title: String,

        /// Start instant, RFC 3339 (e.g. 2025-02-05T10:00:00Z)
        #[arg(long)]
        start: DateTime<Utc>,

        /// Duration in minutes
        #[arg(long, default_value = "60")]
        duration: i64,

        /// Minutes before the start at which to send the reminder
        #[arg(long, default_value = "0")]
        notify: i64,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,
    },

    /// List events
    List {
        /// Only events of this owner
        #[arg(long)]
        owner: Option<String>,
    },

    /// Delete an event
    Delete {
        /// Event id
        id: EventId,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_event_add() {
        let cli = Cli::try_parse_from([
            "calremind",
            "event",
            "add",
            "--owner",
            "u1",
            "--title",
            "Standup",
            "--start",
            "2025-02-05T10:00:00Z",
            "--notify",
            "15",
        ])
        .unwrap();

        match cli.command {
            Command::Event {
                action:
                    EventAction::Add {
                        owner,
                        duration,
                        notify,
                        start,
                        ..
                    },
            } => {
                assert_eq!(owner, "u1");
                assert_eq!(duration, 60);
                assert_eq!(notify, 15);
                assert_eq!(start.to_rfc3339(), "2025-02-05T10:00:00+00:00");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_start() {
        let result = Cli::try_parse_from([
            "calremind", "event", "add", "--owner", "u1", "--title", "x", "--start", "tomorrow",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["calremind", "run", "--log-format", "json", "-v"]).unwrap();
        assert!(cli.is_daemon());
        assert!(cli.debug);
        assert_eq!(cli.log_format, Some(TracingOutputFormat::Json));
    }

    #[test]
    fn config_is_not_a_daemon() {
        let cli = Cli::try_parse_from(["calremind", "config", "path"]).unwrap();
        assert!(!cli.is_daemon());
    }
}
