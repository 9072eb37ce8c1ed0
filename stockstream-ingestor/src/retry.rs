use std::{future::Future, time::Duration};

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::Deserialize;

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Give up once this much time has passed since the first attempt
    pub max_elapsed_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 200,
            max_interval_ms: 5_000,
            max_elapsed_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Only ever tries once
    pub fn none() -> Self {
        Self {
            initial_interval_ms: 0,
            max_interval_ms: 0,
            max_elapsed_ms: 0,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_max_elapsed_time(Some(Duration::from_millis(self.max_elapsed_ms)))
            .build()
    }

    /// Run `op` until it succeeds, fails permanently per `is_transient`, or the
    /// policy runs out of time.
    pub async fn retry<T, E, F, Fut>(
        &self,
        what: &str,
        is_transient: fn(&E) -> bool,
        mut op: F,
    ) -> core::result::Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = core::result::Result<T, E>>,
    {
        backoff::future::retry_notify(
            self.backoff(),
            || {
                let attempt = op();
                async move {
                    attempt.await.map_err(|err| {
                        if is_transient(&err) {
                            backoff::Error::transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        }
                    })
                }
            },
            |err: E, wait: Duration| {
                tracing::warn!("{what} failed ({err}), retrying in {wait:?}");
            },
        )
        .await
    }
}
