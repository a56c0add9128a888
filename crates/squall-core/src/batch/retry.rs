//! Bounded retry of a single batch submission.
//!
//! Errors are split into two classes by [`Transient`]. A transient error is
//! retried after a fixed delay while attempts remain; anything else fails the
//! job on the spot. `max_attempts` is the total number of tries, so a budget
//! of three means at most three calls to the submission function.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Default total attempts per batch.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Classifies submission errors as retry-eligible or not.
pub trait Transient {
    /// True when another attempt may succeed.
    fn is_transient(&self) -> bool;
}

/// Retry budget and pacing for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first try.
    pub max_attempts: u32,
    /// Fixed delay slept after each transient failure.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// The budget actually applied; a zero budget still makes one attempt.
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Classification of a single attempt.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    TransientFailure(E),
    FatalFailure(E),
}

impl<T, E: Transient> RetryOutcome<T, E> {
    pub fn classify(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => RetryOutcome::Success(value),
            Err(e) if e.is_transient() => RetryOutcome::TransientFailure(e),
            Err(e) => RetryOutcome::FatalFailure(e),
        }
    }
}

/// A successful value and the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Terminal failure of a retried operation.
#[derive(Debug)]
pub enum RetryError<E> {
    /// A non-transient error; no further attempts were made.
    Fatal { source: E, attempts: u32 },
    /// Every attempt in the budget failed transiently.
    Exhausted { source: E, attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The error returned by the last attempt.
    pub fn last_error(&self) -> &E {
        match self {
            Self::Fatal { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            Self::Fatal { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal { source, attempts } => {
                write!(f, "failed on attempt {attempts}: {source}")
            }
            Self::Exhausted { source, attempts } => {
                write!(f, "retries exhausted after {attempts} attempts: {source}")
            }
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.last_error())
    }
}

/// Run `attempt` until it succeeds, fails fatally, or the budget runs out.
///
/// `attempt` receives the zero-based attempt number. `on_retry` is called
/// once per transient failure that will be retried, before the delay.
pub async fn retry_with<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    mut attempt: F,
    mut on_retry: R,
) -> Result<Retried<T>, RetryError<E>>
where
    E: Transient + fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, &E),
{
    let budget = policy.attempt_budget();
    let mut current = 0u32;

    loop {
        match RetryOutcome::classify(attempt(current).await) {
            RetryOutcome::Success(value) => {
                return Ok(Retried {
                    value,
                    attempts: current + 1,
                });
            }
            RetryOutcome::FatalFailure(source) => {
                debug!(attempt = current, error = %source, "Fatal error, not retrying");
                return Err(RetryError::Fatal {
                    source,
                    attempts: current + 1,
                });
            }
            RetryOutcome::TransientFailure(source) => {
                current += 1;
                if current >= budget {
                    warn!(attempts = current, error = %source, "Retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        source,
                        attempts: current,
                    });
                }

                warn!(
                    attempt = current,
                    max_attempts = budget,
                    delay_ms = policy.delay.as_millis(),
                    error = %source,
                    "Transient error, retrying"
                );
                on_retry(current, &source);
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

/// [`retry_with`] without a retry hook.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, attempt: F) -> Result<Retried<T>, RetryError<E>>
where
    E: Transient + fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with(policy, attempt, |_, _| {}).await
}
