//! Fixed-period runner for pipeline actions.
//!
//! A [`Scheduler`] drives one [`Action`] on a ticker:
//! - the first tick fires one period after start
//! - missed ticks are delayed, never queued, so runs never overlap
//! - a run in progress is never dropped; actions watch the shutdown handle
//! - too many consecutive failures stop the scheduler

use std::sync::Arc;
use std::time::Duration;

use calremind_store::BoxFuture;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::signals::ShutdownHandle;

/// A unit of periodic work.
pub trait Action: Send {
    /// Returns a short name for logs (e.g., "notifier").
    fn name(&self) -> &str;

    /// Runs once. The scheduler waits for the run to finish, so long waits
    /// inside should race `shutdown` and return early.
    fn do_action<'a>(&'a mut self, shutdown: &'a ShutdownHandle)
    -> BoxFuture<'a, ServerResult<()>>;
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between two ticks.
    pub period: Duration,
    /// Consecutive failed runs after which the scheduler stops. `None`
    /// keeps going forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            max_consecutive_failures: Some(10),
        }
    }
}

impl SchedulerConfig {
    /// Creates a new scheduler config with the given period.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Builder: set the failure limit.
    #[must_use]
    pub fn with_max_consecutive_failures(mut self, max: Option<u32>) -> Self {
        self.max_consecutive_failures = max;
        self
    }
}

/// Commands that can be sent to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Run the action now, even when paused.
    TriggerNow,
    /// Skip ticks until resumed.
    Pause,
    Resume,
}

/// Scheduler state.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// Whether the scheduler is paused.
    pub paused: bool,
    /// Number of consecutive failed runs.
    pub consecutive_failures: u32,
    pub total_runs: u64,
    pub total_failures: u64,
    /// Last successful run.
    pub last_success: Option<DateTime<Utc>>,
    /// Last run, successful or not.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful run.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.total_runs += 1;
        self.last_success = Some(Utc::now());
        self.last_attempt = self.last_success;
        self.last_error = None;
    }

    /// Records a failed run.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.consecutive_failures += 1;
        self.total_runs += 1;
        self.total_failures += 1;
        self.last_attempt = Some(Utc::now());
        self.last_error = Some(error.into());
    }
}

/// Shared scheduler state.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

/// Runs one action periodically until shutdown.
pub struct Scheduler {
    config: SchedulerConfig,
    state: SharedSchedulerState,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    /// Creates a new scheduler with the given configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        Self {
            config,
            state: Arc::new(RwLock::new(SchedulerState::new())),
            command_tx,
            command_rx,
        }
    }

    /// Returns a handle for sending commands to the scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            command_tx: self.command_tx.clone(),
            state: self.state.clone(),
        }
    }

    /// Returns the shared state.
    pub fn state(&self) -> SharedSchedulerState {
        self.state.clone()
    }

    /// Runs `action` on every tick until `shutdown` fires.
    ///
    /// Returns `Ok(())` on shutdown and [`ServerError::ActionFailed`] once
    /// the consecutive failure limit is reached.
    pub async fn run<A: Action>(mut self, mut action: A, shutdown: ShutdownHandle) -> ServerResult<()> {
        let period = self.config.period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(action = action.name(), period_ms = period.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(cmd) = self.command_rx.recv() => match cmd {
                    SchedulerCommand::TriggerNow => {
                        debug!(action = action.name(), "triggered manually");
                        self.tick(&mut action, &shutdown).await?;
                    }
                    SchedulerCommand::Pause => {
                        info!(action = action.name(), "scheduler paused");
                        self.state.write().await.paused = true;
                    }
                    SchedulerCommand::Resume => {
                        info!(action = action.name(), "scheduler resumed");
                        self.state.write().await.paused = false;
                    }
                },
                _ = ticker.tick() => {
                    if self.state.read().await.paused {
                        debug!(action = action.name(), "scheduler paused, skipping tick");
                        continue;
                    }
                    self.tick(&mut action, &shutdown).await?;
                }
            }
        }

        info!(action = action.name(), "scheduler stopped");
        Ok(())
    }

    async fn tick<A: Action>(&self, action: &mut A, shutdown: &ShutdownHandle) -> ServerResult<()> {
        let started = Instant::now();
        let result = action.do_action(shutdown).await;

        let mut state = self.state.write().await;
        match result {
            Ok(()) => {
                state.record_success();
                debug!(
                    action = action.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "run completed"
                );
            }
            Err(e) => {
                state.record_failure(e.to_string());
                warn!(
                    action = action.name(),
                    error = %e,
                    failures = state.consecutive_failures,
                    "run failed"
                );
                if let Some(max) = self.config.max_consecutive_failures
                    && state.consecutive_failures >= max
                {
                    error!(action = action.name(), failures = max, "giving up after consecutive failures");
                    return Err(ServerError::action_failed(action.name(), max));
                }
            }
        }
        Ok(())
    }
}

/// Handle for sending commands to a running scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: SharedSchedulerState,
}

impl SchedulerHandle {
    /// Runs the action as soon as the current run (if any) finishes.
    pub async fn trigger_now(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::TriggerNow).await
    }

    /// Pauses the scheduler.
    pub async fn pause(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Pause).await
    }

    /// Resumes the scheduler.
    pub async fn resume(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Resume).await
    }

    /// Returns the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        self.state.read().await.clone()
    }

    /// Returns true if the scheduler is paused.
    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused
    }
}
