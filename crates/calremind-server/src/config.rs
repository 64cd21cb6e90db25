//! Runtime configuration for pipeline components.

use std::time::Duration;

use tokio::time::Instant;

use crate::queue::Topology;

/// Default name of the notification stream.
pub const DEFAULT_STREAM: &str = "notifications";

/// Exponential backoff settings for broker reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
    /// Upper bound for a single delay.
    pub max_interval: Duration,
    /// Total time budget; no retry is scheduled past it.
    pub max_elapsed: Duration,
    /// Maximum jitter applied to each delay (as fraction 0.0-1.0).
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(15),
            max_elapsed: Duration::from_secs(60),
            jitter_fraction: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Builder: set jitter fraction.
    #[must_use]
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Builder: set the total time budget.
    #[must_use]
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Builder: set the interval bounds.
    #[must_use]
    pub fn with_intervals(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_interval = initial;
        self.max_interval = max;
        self.multiplier = multiplier;
        self
    }

    /// Returns the delay before retry number `retry` (0-based), capped at
    /// `max_interval` and then jittered.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.initial_interval.as_secs_f64();
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let capped = (base * self.multiplier.powi(exp)).min(self.max_interval.as_secs_f64());
        let jitter = rand_jitter(capped * self.jitter_fraction);
        Duration::try_from_secs_f64((capped + jitter).max(0.0)).unwrap_or(self.max_interval)
    }

    /// Starts a fresh retry sequence.
    pub fn start(&self) -> Backoff {
        Backoff {
            config: self.clone(),
            retries: 0,
            started: Instant::now(),
        }
    }
}

/// One running retry sequence.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    retries: u32,
    started: Instant,
}

impl Backoff {
    /// Returns the next delay, or `None` once sleeping it would exceed the
    /// time budget.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.config.delay(self.retries);
        if self.started.elapsed().saturating_add(delay) > self.config.max_elapsed {
            return None;
        }
        self.retries += 1;
        Some(delay)
    }

    /// Number of retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Simple pseudo-random jitter generator.
/// Uses the current time to generate a value in [-range, range].
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    if range <= 0.0 {
        return 0.0;
    }
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let fraction = f64::from(nanos) / 1_000_000_000.0;
    (fraction * 2.0 - 1.0) * range
}

/// Broker settings shared by producers and consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Logical stream name; exchange and binding key derive from it.
    pub stream: String,
    /// Queue consumed by the sender. Defaults to the stream name.
    pub listen_queue: Option<String>,
    /// Consumer tag announced to the broker.
    pub consumer_tag: String,
    pub backoff: BackoffConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            listen_queue: None,
            consumer_tag: "calremind-sender".to_string(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            ..Default::default()
        }
    }

    /// Builder: set the consumed queue name.
    #[must_use]
    pub fn with_listen_queue(mut self, queue: impl Into<String>) -> Self {
        self.listen_queue = Some(queue.into());
        self
    }

    #[must_use]
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the broker topology for this stream.
    pub fn topology(&self) -> Topology {
        let topology = Topology::for_stream(&self.stream);
        match &self.listen_queue {
            Some(queue) => topology.with_queue(queue),
            None => topology,
        }
    }
}

/// Notifier settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Maximum number of due events handled per tick. Events past the limit
    /// stay due and are picked up by the next tick.
    pub max_batch: Option<usize>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_batch: Some(500),
        }
    }
}

/// Sender settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Address notifications are sent from.
    pub from: String,
    /// Template used to render the mail body.
    pub template: String,
    /// Prefix prepended to the event title to form the subject.
    pub subject_prefix: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            from: "calremind <noreply@localhost>".to_string(),
            template: crate::mail::NOTIFICATION_TEMPLATE.to_string(),
            subject_prefix: "Reminder: ".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(delays: &[Duration]) -> Vec<f64> {
        delays.iter().map(Duration::as_secs_f64).collect()
    }

    #[test]
    fn backoff_default() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_interval, Duration::from_secs(1));
        assert_eq!(config.max_interval, Duration::from_secs(15));
        assert_eq!(config.max_elapsed, Duration::from_secs(60));
    }

    #[test]
    fn backoff_schedule_doubles_then_caps() {
        let config = BackoffConfig::default().with_jitter(0.0);
        let delays: Vec<_> = (0..7).map(|n| config.delay(n)).collect();
        assert_eq!(
            secs(&delays),
            vec![1.0, 2.0, 4.0, 8.0, 15.0, 15.0, 15.0]
        );
    }

    #[test]
    fn backoff_jitter_stays_in_range() {
        let config = BackoffConfig::default().with_jitter(0.1);
        for retry in 0..6 {
            let exact = BackoffConfig::default().with_jitter(0.0).delay(retry);
            let jittered = config.delay(retry);
            assert!(jittered.as_secs_f64() >= exact.as_secs_f64() * 0.9 - 1e-9);
            assert!(jittered.as_secs_f64() <= exact.as_secs_f64() * 1.1 + 1e-9);
        }
    }

    #[test]
    fn huge_retry_count_does_not_overflow() {
        let config = BackoffConfig::default().with_jitter(0.0);
        assert_eq!(config.delay(u32::MAX), Duration::from_secs(15));
    }

    #[test]
    fn largest_intervals_stay_representable() {
        let max = Duration::from_secs(u64::MAX);
        let config = BackoffConfig::default()
            .with_intervals(max, max, 2.0)
            .with_max_elapsed(Duration::from_secs(60))
            .with_jitter(1.0);
        assert!(config.delay(3) <= max);
        assert_eq!(config.start().next_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_stops_at_budget() {
        let mut backoff = BackoffConfig::default().with_jitter(0.0).start();
        let mut slept = Vec::new();
        while let Some(delay) = backoff.next_delay() {
            tokio::time::sleep(delay).await;
            slept.push(delay);
        }
        // 1 + 2 + 4 + 8 + 15 + 15 + 15 = 60
        assert_eq!(
            secs(&slept),
            vec![1.0, 2.0, 4.0, 8.0, 15.0, 15.0, 15.0]
        );
        assert_eq!(backoff.retries(), 7);
        assert_eq!(backoff.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn queue_topology_defaults_to_stream() {
        let config = QueueConfig::new("reminders");
        let topology = config.topology();
        assert_eq!(topology.exchange, "reminders_ex");
        assert_eq!(topology.binding_key, "reminders_key");
        assert_eq!(topology.queue, "reminders");

        let custom = config.with_listen_queue("mailer").topology();
        assert_eq!(custom.queue, "mailer");
        assert_eq!(custom.exchange, "reminders_ex");
    }
}
