//! Backoff helpers for retryable request failures.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use rand::Rng;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::warn;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Initial backoff.
    pub init_backoff: Duration,

    /// Maximum backoff.
    pub max_backoff: Duration,

    /// Multiplier for each backoff round.
    pub base: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(15),
            base: 3.0,
        }
    }
}

/// Produces backoff durations with decorrelated jitter: each wait is drawn
/// uniformly from `[init_backoff, prev * base]`, capped at `max_backoff`.
#[derive(Debug)]
pub struct Backoff {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
}

impl Backoff {
    /// Create a new [`Backoff`] from `config`.
    pub fn new(config: &BackoffConfig) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();
        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
        }
    }

    /// Return the next backoff duration to wait for.
    pub fn next(&mut self) -> Duration {
        let range = self.init_backoff..(self.next_backoff_secs * self.base);

        let rand_backoff = if range.is_empty() {
            self.init_backoff
        } else {
            rand::thread_rng().gen_range(range)
        };

        let next_backoff = self.max_backoff_secs.min(rand_backoff);
        Duration::from_secs_f64(std::mem::replace(&mut self.next_backoff_secs, next_backoff))
    }

    /// Sleep for the next backoff duration.
    pub async fn wait(&mut self) {
        tokio::time::sleep(self.next()).await
    }

    /// Retry `f` until it breaks, backing off between attempts.
    ///
    /// `f` returns [`ControlFlow::Break`] with the final result, or
    /// [`ControlFlow::Continue`] with the error to be retried.
    pub async fn retry_with_backoff<F, F1, B, E>(&mut self, task_name: &str, mut f: F) -> B
    where
        F: (FnMut() -> F1) + Send,
        F1: std::future::Future<Output = ControlFlow<B, E>> + Send,
        E: std::fmt::Display,
    {
        loop {
            match f().await {
                ControlFlow::Break(b) => return b,
                ControlFlow::Continue(e) => {
                    let backoff = self.next();
                    warn!(
                        error = %e,
                        task_name,
                        backoff_secs = backoff.as_secs_f64(),
                        "request failed, backing off",
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
