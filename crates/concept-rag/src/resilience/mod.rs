//! Resilient execution for outbound calls (LLM, embedding service, store).
//!
//! Every call runs through the same composition: circuit breaker per
//! endpoint, bulkhead (bounded concurrent slots), per-call timeout, and a
//! retry policy with exponential backoff. Validation errors never retry;
//! rate-limit errors honour Retry-After.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ResilienceProfile {
    pub endpoint: String,
    pub max_concurrent: usize,
    pub call_timeout: Duration,
    /// Consecutive failures before the circuit trips open.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a half-open probe.
    pub open_cooldown: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl ResilienceProfile {
    fn endpoint_defaults(endpoint: &str, max_concurrent: usize, call_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            max_concurrent,
            call_timeout,
            failure_threshold: 5,
            open_cooldown: Duration::from_secs(30),
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn llm() -> Self {
        Self::endpoint_defaults("llm", 10, Duration::from_secs(60))
    }

    pub fn embedding() -> Self {
        Self::endpoint_defaults("embedding", 20, Duration::from_secs(10))
    }

    pub fn store() -> Self {
        Self::endpoint_defaults("store", 50, Duration::from_secs(5))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker: closed → open after N consecutive failures; open →
/// half-open after the cooldown; half-open admits exactly one probe.
pub struct CircuitBreaker {
    endpoint: String,
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: &str, threshold: u32, cooldown: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            threshold,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Gate a call. Fails fast with `CIRCUIT_OPEN` while the circuit is open
    /// or while another half-open probe is in flight.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!(endpoint = %self.endpoint, "circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(Error::CircuitOpen { endpoint: self.endpoint.clone() })
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(Error::CircuitOpen { endpoint: self.endpoint.clone() })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            tracing::info!(endpoint = %self.endpoint, "circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                tracing::warn!(endpoint = %self.endpoint, "half-open probe failed, circuit re-opened");
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    #[cfg(test)]
    fn state(&self) -> BreakerState {
        self.inner.lock().state
    }
}

/// Composition of circuit breaker, bulkhead, timeout, and retry.
pub struct ResilientExecutor {
    profile: ResilienceProfile,
    breaker: CircuitBreaker,
    bulkhead: Arc<Semaphore>,
}

impl ResilientExecutor {
    pub fn new(profile: ResilienceProfile) -> Self {
        let breaker = CircuitBreaker::new(
            &profile.endpoint,
            profile.failure_threshold,
            profile.open_cooldown,
        );
        let bulkhead = Arc::new(Semaphore::new(profile.max_concurrent));
        Self { profile, breaker, bulkhead }
    }

    pub fn endpoint(&self) -> &str {
        &self.profile.endpoint
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .profile
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.profile.max_backoff)
    }

    /// Run `op` under the full resilience composition. `op` is invoked once
    /// per attempt; cancellation of the returned future aborts the in-flight
    /// call at its next suspension point and releases the bulkhead slot.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            self.breaker.try_acquire()?;

            let result = {
                let _permit = self
                    .bulkhead
                    .acquire()
                    .await
                    .map_err(|_| Error::CircuitOpen { endpoint: self.profile.endpoint.clone() })?;
                match tokio::time::timeout(self.profile.call_timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout { deadline: self.profile.call_timeout }),
                }
            };

            match result {
                Ok(value) => {
                    self.breaker.on_success();
                    return Ok(value);
                }
                Err(err) => {
                    if err.is_retryable()
                        || matches!(err, Error::Upstream { .. } | Error::DatabaseOperation { .. })
                    {
                        self.breaker.on_failure();
                    }
                    attempt += 1;
                    if !err.is_retryable() || attempt >= self.profile.max_attempts {
                        return Err(err);
                    }
                    let delay = match &err {
                        Error::RateLimit { retry_after: Some(after) } => *after,
                        _ => self.backoff(attempt - 1),
                    };
                    tracing::warn!(
                        endpoint = %self.profile.endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_profile(endpoint: &str) -> ResilienceProfile {
        ResilienceProfile {
            endpoint: endpoint.to_string(),
            max_concurrent: 4,
            call_timeout: Duration::from_millis(50),
            failure_threshold: 5,
            open_cooldown: Duration::from_millis(30),
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(8),
        }
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures_and_fails_fast() {
        let exec = ResilientExecutor::new(ResilienceProfile {
            max_attempts: 1,
            ..fast_profile("llm-test")
        });
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let result: Result<()> = exec
                .run(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Timeout { deadline: Duration::from_millis(1) })
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(exec.breaker.state(), BreakerState::Open);

        // Sixth call must not reach the operation.
        let result: Result<()> = exec
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        match result {
            Err(Error::CircuitOpen { endpoint }) => assert_eq!(endpoint, "llm-test"),
            other => panic!("expected CIRCUIT_OPEN, got {:?}", other.map(|_| ())),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_circuit() {
        let exec = ResilientExecutor::new(ResilienceProfile {
            max_attempts: 1,
            ..fast_profile("probe-test")
        });
        for _ in 0..5 {
            let _: Result<()> = exec
                .run(|| async { Err(Error::Timeout { deadline: Duration::from_millis(1) }) })
                .await;
        }
        assert_eq!(exec.breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let result: Result<u32> = exec.run(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(exec.breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let exec = ResilientExecutor::new(fast_profile("validate-test"));
        let calls = AtomicU32::new(0);
        let result: Result<()> = exec
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidQuery { reason: "empty".into() })
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidQuery { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_up_to_max_attempts() {
        let exec = ResilientExecutor::new(fast_profile("retry-test"));
        let calls = AtomicU32::new(0);
        let result: Result<()> = exec
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::RateLimit { retry_after: Some(Duration::from_millis(1)) })
            })
            .await;
        assert!(matches!(result, Err(Error::RateLimit { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let exec = ResilientExecutor::new(ResilienceProfile {
            max_attempts: 1,
            ..fast_profile("timeout-test")
        });
        let result: Result<()> = exec
            .run(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }
}
