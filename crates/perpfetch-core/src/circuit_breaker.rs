use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::{ExchangeId, SourceError};

/// Upstream health as seen by one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// One trial request is let through after the cool-down.
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Adapter-local circuit breaker. Only transient upstream failures count;
/// rejected queries say nothing about exchange health.
#[derive(Debug)]
pub struct CircuitBreaker {
    exchange: ExchangeId,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(exchange: ExchangeId, config: CircuitBreakerConfig) -> Self {
        Self {
            exchange,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Fails fast with a transient `Unavailable` error while the circuit is open.
    pub fn check(&self) -> Result<(), SourceError> {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_some_and(|opened_at| opened_at.elapsed() >= self.config.open_timeout);

                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.opened_at = None;
                    Ok(())
                } else {
                    Err(SourceError::unavailable(format!(
                        "circuit open after {} consecutive upstream failures",
                        inner.consecutive_failures
                    ))
                    .with_exchange(self.exchange))
                }
            }
        }
    }

    /// Feeds the outcome of an upstream call back into the breaker.
    pub fn observe<T>(&self, result: &Result<T, SourceError>) {
        match result {
            Ok(_) => self.record_success(),
            Err(error) if error.retryable() => self.record_failure(),
            Err(_) => self.record_success(),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let should_open = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold;
        if should_open && inner.state != CircuitState::Open {
            warn!(
                exchange = %self.exchange,
                failures = inner.consecutive_failures,
                "opening circuit for upstream"
            );
        }
        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .expect("circuit breaker lock is not poisoned")
            .state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("circuit breaker lock is not poisoned")
            .consecutive_failures
    }
}
