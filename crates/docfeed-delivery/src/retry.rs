//! Exponential backoff retries as an explicit state machine.
//!
//! [`RetryState`] turns each classified outcome into a [`Transition`];
//! [`RetryController`] drives the client until a transition is terminal.
//!
//! ```text
//!            ┌──────────────┐  retryable, attempt < max
//!            │  Attempting  │ ◀────────────────────────┐
//!            │ (attempt n)  │ ─── sleep 2^(n+1) units ─┘
//!            └──────────────┘
//!              │         │
//!         200  │         │ permanent, or retryable at attempt == max
//!              ▼         ▼
//!        ┌─────────┐ ┌──────────────┐
//!        │ Success │ │ DeadLettered │
//!        └─────────┘ └──────────────┘
//! ```

use std::{sync::Arc, time::Duration};

use docfeed_core::Clock;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    circuit::CircuitBreaker,
    client::{DeliveryClient, DeliveryOutcome},
    error::{DeliveryError, ErrorCategory},
    request::WriteRequest,
};

/// Statuses that indicate a transient store condition.
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Whether `status_code` is worth retrying.
pub fn is_retryable_status(status_code: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status_code)
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Backoff policy for retryable failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Time unit the exponential schedule is expressed in.
    pub backoff_unit: Duration,

    /// Upper bound on a single delay. Unset means uncapped.
    pub max_backoff: Option<Duration>,

    /// Jitter fraction (0.0 to 1.0) applied to each delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::DEFAULT_MAX_RETRIES,
            backoff_unit: Duration::from_secs(1),
            max_backoff: None,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (0-based): `2^(attempt+1)`
    /// units, capped and jittered.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_add(1);
        let multiplier = 1_u128.checked_shl(exponent).unwrap_or(u128::MAX);
        let base = saturating_duration(self.backoff_unit.as_nanos().saturating_mul(multiplier));

        let capped = self.cap(base);
        self.cap(apply_jitter(capped, self.jitter_factor))
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_backoff {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

fn saturating_duration(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    let subsec = u32::try_from(nanos % NANOS_PER_SEC).unwrap_or(0);
    Duration::new(secs, subsec)
}

/// Randomizes `duration` by up to ±`jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = (duration.as_secs_f64() + jitter_offset).max(0.0);

    Duration::try_from_secs_f64(jittered_secs).unwrap_or(Duration::MAX)
}

/// Next step of the retry state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Store acknowledged the write.
    Succeeded,
    /// Sleep for `delay`, then attempt again.
    RetryAfter {
        /// Backoff before the next attempt
        delay: Duration,
        /// Failure that triggered the retry
        error: DeliveryError,
    },
    /// Give up and dead-letter the event.
    DeadLetter {
        /// Final failure, used as the dead-letter reason
        error: DeliveryError,
    },
}

/// Per-event attempt counter.
///
/// The attempt counter never exceeds `max_retries` when a new attempt starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    max_retries: u32,
}

impl RetryState {
    /// Starts at attempt 0.
    pub fn new(max_retries: u32) -> Self {
        Self { attempt: 0, max_retries }
    }

    /// Current attempt, 0-based.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempts made once the current one has resolved.
    pub fn attempts_made(&self) -> u32 {
        self.attempt.saturating_add(1)
    }

    /// Whether another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    /// Applies the outcome of the current attempt.
    pub fn on_outcome(&mut self, outcome: DeliveryOutcome, policy: &RetryPolicy) -> Transition {
        match outcome {
            DeliveryOutcome::Success => Transition::Succeeded,
            DeliveryOutcome::PermanentFailure(error) => Transition::DeadLetter { error },
            DeliveryOutcome::RetryableFailure(error) if self.can_retry() => {
                let delay = policy.delay_after(self.attempt);
                self.attempt += 1;
                Transition::RetryAfter { delay, error }
            },
            DeliveryOutcome::RetryableFailure(error) => Transition::DeadLetter {
                error: DeliveryError::retries_exhausted(self.attempt, error),
            },
        }
    }
}

/// Terminal result of a retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryResolution {
    /// Store answered 200.
    Delivered {
        /// Attempts made, including the successful one
        attempts: u32,
    },
    /// The event must be dead-lettered.
    Failed {
        /// Attempts made
        attempts: u32,
        /// Final failure
        error: DeliveryError,
    },
}

/// Drives a [`WriteRequest`] to a terminal state.
#[derive(Debug, Clone)]
pub struct RetryController {
    client: DeliveryClient,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    circuit: Option<Arc<CircuitBreaker>>,
}

impl RetryController {
    /// Creates a controller without a circuit breaker.
    pub fn new(client: DeliveryClient, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { client, policy, clock, circuit: None }
    }

    /// Gates every attempt through `circuit`.
    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit: Arc<CircuitBreaker>) -> Self {
        self.circuit = Some(circuit);
        self
    }

    /// Retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempts `request` until it succeeds, fails permanently, or runs out
    /// of retries. The same request is sent on every attempt.
    pub async fn run(&self, request: &WriteRequest) -> RetryResolution {
        let mut state = RetryState::new(self.policy.max_retries);

        loop {
            let outcome = self.attempt(request, state.attempt()).await;

            match state.on_outcome(outcome, &self.policy) {
                Transition::Succeeded => {
                    return RetryResolution::Delivered { attempts: state.attempts_made() };
                },
                Transition::RetryAfter { delay, error } => {
                    tracing::warn!(
                        document_id = request.document_id(),
                        path = %request.path(),
                        retry = state.attempt(),
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis(),
                        category = %ErrorCategory::from(&error),
                        error = %error,
                        "retryable failure, backing off before next attempt"
                    );
                    self.clock.sleep(delay).await;
                },
                Transition::DeadLetter { error } => {
                    return RetryResolution::Failed { attempts: state.attempts_made(), error };
                },
            }
        }
    }

    async fn attempt(&self, request: &WriteRequest, attempt: u32) -> DeliveryOutcome {
        let Some(circuit) = &self.circuit else {
            return self.client.send(request, attempt).await;
        };

        if !circuit.allow_request().await {
            return DeliveryOutcome::RetryableFailure(DeliveryError::CircuitOpen);
        }

        let outcome = self.client.send(request, attempt).await;
        match &outcome {
            DeliveryOutcome::RetryableFailure(_) => circuit.record_failure().await,
            DeliveryOutcome::Success | DeliveryOutcome::PermanentFailure(_) => {
                circuit.record_success().await;
            },
        }
        outcome
    }
}
