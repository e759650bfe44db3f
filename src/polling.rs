// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Polling loop that waits for a query to reach a terminal state.
//!
//! [`PollingStrategy::poll_until_completed`] calls a caller-supplied check
//! until it reports completion or failure, sleeping between checks according
//! to a [`DelayPolicy`]:
//!
//! | Policy | Delay before check `n + 1` |
//! |---|---|
//! | `Fixed(d)` | `d` |
//! | `Backoff { initial, factor, max }` | `min(initial * factor^n, max)` |
//!
//! Only "not yet complete" is retried. An error returned by the check itself
//! is propagated unchanged.
//!
//! ## Interruption
//!
//! The strategy holds a [`CancellationToken`]. If it is cancelled while the
//! strategy sleeps, polling stops and `Ok(None)` is returned. The token stays
//! cancelled so the caller can observe why polling ended.

use crate::error::{Result, ResultsErrorHelper};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Default backoff multiplier.
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;

/// Delay between consecutive checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayPolicy {
    /// Constant delay.
    Fixed(Duration),
    /// Multiplicative backoff capped at `max`.
    Backoff {
        initial: Duration,
        factor: u32,
        max: Duration,
    },
}

impl Default for DelayPolicy {
    fn default() -> Self {
        DelayPolicy::Backoff {
            initial: Duration::from_millis(100),
            factor: DEFAULT_BACKOFF_FACTOR,
            max: Duration::from_secs(5),
        }
    }
}

impl DelayPolicy {
    pub fn fixed(delay: Duration) -> Self {
        DelayPolicy::Fixed(delay)
    }

    /// Backoff with the default factor of 2.
    pub fn backoff(initial: Duration, max: Duration) -> Self {
        DelayPolicy::Backoff {
            initial,
            factor: DEFAULT_BACKOFF_FACTOR,
            max,
        }
    }

    /// Delay to sleep after the `attempt`-th unfinished check (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            DelayPolicy::Fixed(delay) => delay,
            DelayPolicy::Backoff {
                initial,
                factor,
                max,
            } => {
                let multiplier = factor.max(1).checked_pow(attempt).unwrap_or(u32::MAX);
                initial
                    .checked_mul(multiplier)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// Not finished yet; sleep and check again.
    Pending,
    /// Finished successfully.
    Completed(T),
    /// Finished in a failed state, with the service-provided reason.
    Failed(String),
    /// Cancelled by someone, with the service-provided reason.
    Canceled(String),
}

/// Repeatedly checks until a terminal outcome, sleeping per a [`DelayPolicy`].
#[derive(Debug, Clone)]
pub struct PollingStrategy {
    policy: DelayPolicy,
    interrupt: CancellationToken,
}

impl PollingStrategy {
    pub fn new(policy: DelayPolicy) -> Self {
        Self {
            policy,
            interrupt: CancellationToken::new(),
        }
    }

    /// Use `interrupt` to stop polling from another task.
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn policy(&self) -> &DelayPolicy {
        &self.policy
    }

    pub fn interrupt_token(&self) -> &CancellationToken {
        &self.interrupt
    }

    /// Check until completion.
    ///
    /// Returns `Ok(Some(value))` on completion, `Ok(None)` if interrupted
    /// while sleeping, and an error of kind `QueryFailed` / `QueryCanceled`
    /// whose message is exactly the reason the check reported.
    pub async fn poll_until_completed<T, F, Fut>(&self, mut check: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollOutcome<T>>>,
    {
        let mut attempt: u32 = 0;

        loop {
            match check().await? {
                PollOutcome::Completed(value) => {
                    debug!("Polling completed after {} checks", attempt + 1);
                    return Ok(Some(value));
                }
                PollOutcome::Failed(reason) => {
                    debug!("Polling ended in failure: {}", reason);
                    return Err(ResultsErrorHelper::query_failed().message(reason));
                }
                PollOutcome::Canceled(reason) => {
                    debug!("Polling ended in cancellation: {}", reason);
                    return Err(ResultsErrorHelper::query_canceled().message(reason));
                }
                PollOutcome::Pending => {}
            }

            let delay = self.policy.delay(attempt);
            attempt = attempt.saturating_add(1);
            trace!("Check {} not complete, sleeping {:?}", attempt, delay);

            tokio::select! {
                biased;
                _ = self.interrupt.cancelled() => {
                    debug!("Polling interrupted after {} checks", attempt);
                    return Ok(None);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for PollingStrategy {
    fn default() -> Self {
        Self::new(DelayPolicy::default())
    }
}
