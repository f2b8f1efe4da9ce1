//! Background scheduler driving channel renewal.
//!
//! Fires on a fixed cadence kept well under the source's seven-day channel
//! expiry, with jitter to avoid synchronized re-registration across
//! deployments and exponential backoff when a run fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

/// Renewal scheduler configuration.
#[derive(Debug, Clone)]
pub struct RenewSchedulerConfig {
    /// Base interval between renewal runs.
    pub interval: Duration,
    /// Maximum jitter added to the interval, as a fraction 0.0-1.0.
    pub jitter_fraction: f64,
    /// Initial backoff after a failed run.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// Consecutive failures after which runs are skipped until a manual
    /// trigger resets the counter's clock.
    pub max_consecutive_failures: u32,
}

impl Default for RenewSchedulerConfig {
    fn default() -> Self {
        Self {
            // 6 days against the 7-day channel expiry.
            interval: Duration::from_secs(6 * 24 * 60 * 60),
            jitter_fraction: 0.05,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(6 * 60 * 60),
            backoff_multiplier: 2.0,
            max_consecutive_failures: 10,
        }
    }
}

impl RenewSchedulerConfig {
    /// Creates a config with the given base interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Builder: set jitter fraction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Next delay with jitter applied.
    pub fn next_delay(&self) -> Duration {
        let base = self.interval.as_secs_f64();
        let jitter = rand_jitter(base * self.jitter_fraction);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    /// Backoff delay for the given consecutive failure count.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_backoff.as_secs_f64();
        let delay = base * self.backoff_multiplier.powi(consecutive_failures as i32 - 1);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

/// Pseudo-random jitter in [-range, range], seeded from the clock.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let fraction = (nanos as f64) / 1_000_000_000.0;
    (fraction * 2.0 - 1.0) * range
}

/// Commands accepted by a running scheduler.
#[derive(Debug, Clone)]
pub enum RenewCommand {
    /// Trigger an immediate renewal run.
    RenewNow,
    /// Stop the scheduler loop.
    Stop,
}

/// Observable scheduler state.
#[derive(Debug, Clone, Default)]
pub struct RenewSchedulerState {
    pub consecutive_failures: u32,
    /// Last successful run.
    pub last_success: Option<DateTime<Utc>>,
    /// Last attempt, successful or not.
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RenewSchedulerState {
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.last_attempt = self.last_success;
        self.last_error = None;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.consecutive_failures += 1;
        self.last_attempt = Some(Utc::now());
        self.last_error = Some(error.into());
    }
}

pub type SharedRenewState = Arc<RwLock<RenewSchedulerState>>;

/// Drives renewal runs on a timer.
pub struct RenewScheduler {
    config: RenewSchedulerConfig,
    state: SharedRenewState,
    command_tx: mpsc::Sender<RenewCommand>,
    command_rx: Option<mpsc::Receiver<RenewCommand>>,
}

impl RenewScheduler {
    pub fn new(config: RenewSchedulerConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        Self {
            config,
            state: Arc::new(RwLock::new(RenewSchedulerState::default())),
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    /// Returns a handle for sending commands to the scheduler.
    pub fn handle(&self) -> RenewSchedulerHandle {
        RenewSchedulerHandle {
            command_tx: self.command_tx.clone(),
            state: self.state.clone(),
        }
    }

    pub fn state(&self) -> SharedRenewState {
        self.state.clone()
    }

    /// Runs the scheduler loop with the given renewal function.
    ///
    /// An initial run fires immediately so freshly started daemons register
    /// channels without waiting a full interval.
    pub async fn run<F, Fut>(mut self, renew_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send,
    {
        let mut command_rx = self.command_rx.take().expect("run called twice");

        info!(
            interval_secs = self.config.interval.as_secs(),
            "renewal scheduler started"
        );

        self.do_renew(&renew_fn).await;

        loop {
            let delay = self.next_delay().await;
            debug!(delay_secs = delay.as_secs(), "scheduling next renewal run");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.do_renew(&renew_fn).await;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(RenewCommand::RenewNow) => {
                            debug!("received RenewNow command");
                            self.do_renew(&renew_fn).await;
                        }
                        Some(RenewCommand::Stop) | None => {
                            info!("renewal scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn next_delay(&self) -> Duration {
        let state = self.state.read().await;
        if state.consecutive_failures > 0 {
            let backoff = self.config.backoff_delay(state.consecutive_failures);
            debug!(
                failures = state.consecutive_failures,
                backoff_secs = backoff.as_secs(),
                "using backoff delay"
            );
            return backoff;
        }
        self.config.next_delay()
    }

    async fn do_renew<F, Fut>(&self, renew_fn: &F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), String>>,
    {
        let state = self.state.read().await;
        if state.consecutive_failures >= self.config.max_consecutive_failures {
            error!(
                failures = state.consecutive_failures,
                max = self.config.max_consecutive_failures,
                "max consecutive renewal failures reached, skipping run"
            );
            return;
        }
        drop(state);

        debug!("starting renewal run");
        match renew_fn().await {
            Ok(()) => {
                self.state.write().await.record_success();
            }
            Err(e) => {
                warn!(error = %e, "renewal run failed");
                self.state.write().await.record_failure(e);
            }
        }
    }
}

/// Handle for a running [`RenewScheduler`].
#[derive(Clone, Debug)]
pub struct RenewSchedulerHandle {
    command_tx: mpsc::Sender<RenewCommand>,
    state: SharedRenewState,
}

impl RenewSchedulerHandle {
    /// Triggers an immediate renewal run.
    pub async fn renew_now(&self) -> Result<(), mpsc::error::SendError<RenewCommand>> {
        self.command_tx.send(RenewCommand::RenewNow).await
    }

    /// Stops the scheduler.
    pub async fn stop(&self) -> Result<(), mpsc::error::SendError<RenewCommand>> {
        self.command_tx.send(RenewCommand::Stop).await
    }

    /// Returns a snapshot of the scheduler state.
    pub async fn state(&self) -> RenewSchedulerState {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn config_default() {
        let config = RenewSchedulerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(518_400));
        assert!(config.jitter_fraction > 0.0);
    }

    #[test]
    fn next_delay_stays_within_jitter() {
        let config = RenewSchedulerConfig::new(Duration::from_secs(60)).with_jitter(0.1);
        let delay = config.next_delay();
        assert!(delay.as_secs_f64() >= 54.0);
        assert!(delay.as_secs_f64() <= 66.0);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = RenewSchedulerConfig::default().with_backoff(
            Duration::from_secs(5),
            Duration::from_secs(300),
            2.0,
        );

        assert_eq!(config.backoff_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_delay(1), Duration::from_secs(5));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(10));
        assert_eq!(config.backoff_delay(10), Duration::from_secs(300));
    }

    #[test]
    fn state_records_outcomes() {
        let mut state = RenewSchedulerState::default();
        state.record_failure("watch denied");
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.last_error.as_deref(), Some("watch denied"));

        state.record_success();
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_success.is_some());
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn scheduler_runs_initially_and_on_command() {
        let scheduler = RenewScheduler::new(RenewSchedulerConfig::new(Duration::from_secs(60)));
        let handle = scheduler.handle();

        let runs = Arc::new(AtomicU32::new(0));
        let runs_clone = runs.clone();
        let task = tokio::spawn(async move {
            scheduler
                .run(move || {
                    let runs = runs_clone.clone();
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runs.load(Ordering::SeqCst) >= 1);

        handle.renew_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn scheduler_recovers_after_failures() {
        let config = RenewSchedulerConfig::new(Duration::from_secs(60)).with_backoff(
            Duration::from_millis(10),
            Duration::from_millis(100),
            2.0,
        );
        let scheduler = RenewScheduler::new(config);
        let state = scheduler.state();
        let handle = scheduler.handle();

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let task = tokio::spawn(async move {
            scheduler
                .run(move || {
                    let attempts = attempts_clone.clone();
                    async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        if n < 2 {
                            Err(format!("failure {n}"))
                        } else {
                            Ok(())
                        }
                    }
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 3);
        assert_eq!(state.read().await.consecutive_failures, 0);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }
}
