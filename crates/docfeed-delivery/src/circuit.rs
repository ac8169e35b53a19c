//! Grace-period circuit breaker for the document store.
//!
//! One breaker is shared by every delivery of an engine. It measures how long
//! retryable failures have been going on without a single success, rather
//! than counting them.
//!
//! ```text
//!   ┌──────────┐  failure streak ≥ grace   ┌──────────┐
//!   │  CLOSED  │ ────────────────────────▶ │ HALF-OPEN│
//!   │          │ ◀──────────────────────── │ (probing)│
//!   └──────────┘          success          └──────────┘
//!                                            │      ▲
//!                    failure, streak ≥ doom  │      │ grace elapsed
//!                                            ▼      │ since opening
//!                                          ┌──────────┐
//!                                          │   OPEN   │
//!                                          │ (reject) │
//!                                          └──────────┘
//! ```

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use docfeed_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Breaker timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Failure streak length after which the breaker starts probing.
    pub grace_period: Duration,
    /// Failure streak length after which the breaker rejects attempts.
    pub doom_period: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { grace_period: Duration::from_secs(10), doom_period: Duration::from_secs(60) }
    }
}

/// Current state of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failures have outlasted the grace period; attempts still allowed.
    HalfOpen,
    /// Store considered down; attempts rejected.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug)]
struct CircuitStats {
    state: CircuitState,
    failing_since: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Thread-safe breaker gating attempts against the document store.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    stats: Mutex<CircuitStats>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            stats: Mutex::new(CircuitStats {
                state: CircuitState::Closed,
                failing_since: None,
                opened_at: None,
            }),
        }
    }

    /// Current state.
    pub async fn state(&self) -> CircuitState {
        self.stats.lock().await.state
    }

    /// Whether an attempt may go out now.
    ///
    /// An open breaker whose grace period has elapsed moves to half-open and
    /// lets the attempt through as a probe.
    pub async fn allow_request(&self) -> bool {
        let now = self.clock.now();
        let mut stats = self.stats.lock().await;

        match stats.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = stats.opened_at.unwrap_or(now);
                if now.saturating_duration_since(opened_at) >= self.config.grace_period {
                    stats.state = CircuitState::HalfOpen;
                    tracing::info!("circuit breaker half-open, probing document store");
                    true
                } else {
                    false
                }
            },
        }
    }

    /// Records an attempt that reached the store.
    pub async fn record_success(&self) {
        let mut stats = self.stats.lock().await;

        if stats.state != CircuitState::Closed {
            tracing::info!(previous = %stats.state, "circuit breaker closed");
        }
        stats.state = CircuitState::Closed;
        stats.failing_since = None;
        stats.opened_at = None;
    }

    /// Records a retryable failure.
    pub async fn record_failure(&self) {
        let now = self.clock.now();
        let mut stats = self.stats.lock().await;

        let failing_since = *stats.failing_since.get_or_insert(now);
        let streak = now.saturating_duration_since(failing_since);

        match stats.state {
            CircuitState::Closed if streak >= self.config.grace_period => {
                stats.state = CircuitState::HalfOpen;
                tracing::warn!(
                    streak_secs = streak.as_secs(),
                    "document store failing past grace period, circuit breaker half-open"
                );
            },
            CircuitState::HalfOpen if streak >= self.config.doom_period => {
                stats.state = CircuitState::Open;
                stats.opened_at = Some(now);
                tracing::warn!(
                    streak_secs = streak.as_secs(),
                    "document store failing past doom period, circuit breaker open"
                );
            },
            CircuitState::Open => stats.opened_at = Some(now),
            CircuitState::Closed | CircuitState::HalfOpen => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use docfeed_core::TestClock;

    use super::*;

    fn breaker() -> (CircuitBreaker, TestClock) {
        let clock = TestClock::new();
        (CircuitBreaker::new(CircuitConfig::default(), Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn short_failure_streak_stays_closed() {
        let (breaker, clock) = breaker();

        breaker.record_failure().await;
        clock.advance(Duration::from_secs(9));
        breaker.record_failure().await;

        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.allow_request().await);
    }

    #[tokio::test]
    async fn full_state_cycle() {
        let (breaker, clock) = breaker();

        breaker.record_failure().await;
        clock.advance(Duration::from_secs(10));
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        assert!(breaker.allow_request().await);

        clock.advance(Duration::from_secs(50));
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.allow_request().await);

        clock.advance(Duration::from_secs(10));
        assert!(breaker.allow_request().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let (breaker, clock) = breaker();

        breaker.record_failure().await;
        clock.advance(Duration::from_secs(10));
        breaker.record_failure().await;
        clock.advance(Duration::from_secs(50));
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        clock.advance(Duration::from_secs(10));
        assert!(breaker.allow_request().await);
        breaker.record_failure().await;

        assert_eq!(breaker.state().await, CircuitState::Open);
        clock.advance(Duration::from_secs(5));
        assert!(!breaker.allow_request().await);
    }

    #[tokio::test]
    async fn success_resets_streak() {
        let (breaker, clock) = breaker();

        breaker.record_failure().await;
        clock.advance(Duration::from_secs(8));
        breaker.record_success().await;
        breaker.record_failure().await;
        clock.advance(Duration::from_secs(8));
        breaker.record_failure().await;

        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
