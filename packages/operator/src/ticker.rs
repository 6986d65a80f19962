//! Named periodic tasks
//!
//! A [`Ticker`] runs one task on an interval read fresh before every sleep,
//! backs off with jitter while the task keeps failing, and stops when its
//! shutdown channel flips to true.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::retry::RetryConfig;

/// Source of the current tick interval
pub type IntervalFn = Arc<dyn Fn() -> Duration + Send + Sync>;

pub struct Ticker {
    name: String,
    interval: IntervalFn,
    backoff: RetryConfig,
    shutdown: watch::Receiver<bool>,
}

impl Ticker {
    pub fn new(
        name: impl Into<String>,
        interval: impl Fn() -> Duration + Send + Sync + 'static,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: name.into(),
            interval: Arc::new(interval),
            backoff: RetryConfig {
                initial_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(60),
                ..RetryConfig::default()
            },
            shutdown,
        }
    }

    /// Fixed interval
    pub fn every(
        name: impl Into<String>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self::new(name, move || interval, shutdown)
    }

    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delay before the next run after `failures` consecutive failures
    pub fn next_delay(&self, failures: u32) -> Duration {
        let base = (self.interval)();
        if failures == 0 {
            base
        } else {
            base + self.backoff.delay_for_attempt(failures - 1)
        }
    }

    /// Run `task` until shutdown
    pub async fn run<F, Fut>(mut self, mut task: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = eyre::Result<()>>,
    {
        info!(ticker = %self.name, "Ticker started");
        let mut failures = 0u32;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match task().await {
                Ok(()) => {
                    if failures > 0 {
                        debug!(ticker = %self.name, failures, "Ticker recovered");
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(ticker = %self.name, failures, error = %e, "Ticker task failed");
                }
            }

            let delay = self.next_delay(failures);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(ticker = %self.name, "Ticker stopped");
    }
}

/// Resolves once `stop` flips to true or its sender is gone, like a
/// [`Ticker`] does; never resolves without a stop channel
pub async fn stop_signal(stop: Option<watch::Receiver<bool>>) {
    match stop {
        Some(mut stop) => {
            let _ = stop.wait_for(|stopped| *stopped).await;
        }
        None => std::future::pending::<()>().await,
    }
}
