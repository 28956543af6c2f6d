//! Polling of asynchronous provider jobs with exponential backoff.

use super::models::{GenerationResult, MusicProvider};
use super::router::MusicRouter;
use crate::providers::ProviderError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// How often, and for how long, to ask a provider about a job.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    /// Cap for the exponential growth of the interval.
    pub max_interval: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
    /// Retryable provider errors tolerated in a row before giving up.
    pub max_consecutive_errors: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
            max_attempts: 120,
            max_consecutive_errors: 5,
        }
    }
}

impl PollPolicy {
    /// Wait before the check following attempt number `attempt` (0 based):
    /// `initial * multiplier^attempt`, capped at `max_interval`.
    pub fn interval_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_interval.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.initial_interval.min(self.max_interval)
        }
    }

    /// Upper bound of the total time spent sleeping between checks.
    pub fn max_total_wait(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.interval_for(attempt))
            .sum()
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("gave up after {attempts} status checks")]
    Exhausted { attempts: u32 },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Call `check` until `is_done` accepts its value.
///
/// Retryable errors are swallowed until `max_consecutive_errors` of them
/// happen in a row; a permanent error stops polling right away.
pub async fn poll_until<T, F, Fut, D>(
    policy: &PollPolicy,
    mut check: F,
    is_done: D,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
    D: Fn(&T) -> bool,
{
    let mut consecutive_errors = 0;

    for attempt in 0..policy.max_attempts {
        match check().await {
            Ok(value) => {
                consecutive_errors = 0;
                if is_done(&value) {
                    return Ok(value);
                }
            }
            Err(e) if e.is_retryable() => {
                consecutive_errors += 1;
                if consecutive_errors >= policy.max_consecutive_errors {
                    return Err(PollError::Provider(e));
                }
                warn!(attempt, consecutive_errors, error = %e, "Transient polling error");
            }
            Err(e) => return Err(PollError::Provider(e)),
        }

        if attempt + 1 < policy.max_attempts {
            let wait = policy.interval_for(attempt);
            debug!(attempt, wait_ms = wait.as_millis() as u64, "Job not finished yet");
            tokio::time::sleep(wait).await;
        }
    }

    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
    })
}

/// Poll the router until the job is terminal. Giving up yields a `failed`
/// result describing why; the provider job itself may still complete.
pub async fn poll_until_terminal(
    router: &MusicRouter,
    job_id: &str,
    provider: MusicProvider,
    policy: &PollPolicy,
) -> GenerationResult {
    let outcome = poll_until(
        policy,
        move || router.try_check_status(job_id, provider),
        |result: &GenerationResult| result.status.is_terminal(),
    )
    .await;

    match outcome {
        Ok(result) => result,
        Err(e) => GenerationResult::failed(Some(provider), Some(job_id.to_string()), e.to_string()),
    }
}
