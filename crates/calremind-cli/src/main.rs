//! calremind CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use calremind_cli::cli::{Cli, Command, ConfigAction, EventAction};
use calremind_cli::commands::{self, daemon::Role};
use calremind_cli::config::DaemonConfig;
use calremind_cli::error::CliResult;
use calremind_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let mut tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else if cli.is_daemon() {
        TracingConfig::daemon()
    } else {
        TracingConfig::default().with_level(Level::WARN)
    };
    if let Some(format) = cli.log_format {
        tracing_config = tracing_config.with_format(format);
    }
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    // Run the command
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    // Load configuration
    let path = cli.config.clone().unwrap_or_else(DaemonConfig::default_path);
    let config = if cli.config.is_some() {
        DaemonConfig::load_from(&path)?
    } else {
        DaemonConfig::load()?
    };

    match cli.command {
        Command::Run => commands::daemon::run(&config, Role::All).await,
        Command::Scheduler => commands::daemon::run(&config, Role::Scheduler).await,
        Command::Sender => commands::daemon::run(&config, Role::Sender).await,
        Command::Event { action } => {
            let calendar = commands::open_calendar(&config.store)?;
            match action {
                EventAction::Add {
                    owner,
                    title,
                    start,
                    duration,
                    notify,
                    description,
                } => {
                    let new =
                        commands::event::new_event(&owner, &title, start, duration, notify, description)?;
                    commands::event::add(&calendar, new).await.map(|_| ())
                }
                EventAction::List { owner } => {
                    commands::event::list(&calendar, owner.as_deref()).await.map(|_| ())
                }
                EventAction::Delete { id } => commands::event::delete(&calendar, id).await,
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&path),
        },
    }
}
