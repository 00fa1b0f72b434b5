use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::errors::ProviderError;
use crate::infrastructure::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState,
};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Tuning for one provider's access guard.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Token-bucket refill rate bounding requests per minute
    pub requests_per_minute: u32,
    /// Bounded retry count for retryable errors
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt up to `max_backoff`
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Point-in-time view of a guard, for run reports and logs.
#[derive(Debug, Clone)]
pub struct GuardStats {
    pub provider_id: String,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
}

/// Shared access wrapper every ingestor uses to reach an external provider.
///
/// Wraps each call with a per-provider token bucket, exponential backoff
/// with jitter on retryable errors, and a circuit breaker. At most one call
/// per provider is in flight at any time: unsynchronized concurrent callers
/// multiply the request rate and trip provider-side throttling, which then
/// starves every caller.
pub struct ProviderAccessGuard {
    provider_id: String,
    limiter: DirectLimiter,
    breaker: CircuitBreaker,
    flight: Mutex<()>,
    config: GuardConfig,
}

impl ProviderAccessGuard {
    pub fn new(provider_id: impl Into<String>, config: GuardConfig) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(config.requests_per_minute)
                .expect("Requests per minute must be non-zero"),
        );
        ProviderAccessGuard {
            provider_id: provider_id.into(),
            limiter: RateLimiter::direct(quota),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            flight: Mutex::new(()),
            config,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Execute `op` under the guard, deferring behind any call already in
    /// flight for this provider. `op` is re-invoked on each retry attempt.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let _flight = self.flight.lock().await;
        self.call_locked(op).await
    }

    /// Like [`call`](Self::call) but rejects instead of deferring when a
    /// call is already in flight.
    pub async fn try_call<T, F, Fut>(&self, op: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let _flight = self.flight.try_lock().map_err(|_| ProviderError::Busy {
            provider: self.provider_id.clone(),
        })?;
        self.call_locked(op).await
    }

    async fn call_locked<T, F, Fut>(&self, op: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut delay = self.config.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.call_permitted().await {
                return Err(ProviderError::CircuitOpen {
                    provider: self.provider_id.clone(),
                });
            }

            self.limiter.until_ready().await;

            match op().await {
                Ok(value) => {
                    self.breaker.record_success().await;
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    self.breaker.record_failure().await;
                    attempt += 1;
                    let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
                    let jitter = Duration::from_millis(jitter_ms);
                    warn!(
                        provider = %self.provider_id,
                        attempt = attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = (delay + jitter).as_millis() as u64,
                        error = %e,
                        "Provider call failed, backing off"
                    );
                    sleep(delay + jitter).await;
                    delay = std::cmp::min(delay * 2, self.config.max_backoff);
                }
                Err(e) => {
                    if e.is_retryable() {
                        self.breaker.record_failure().await;
                    }
                    debug!(
                        provider = %self.provider_id,
                        attempts = attempt + 1,
                        error = %e,
                        "Provider call failed terminally"
                    );
                    return Err(e);
                }
            }
        }
    }

    pub async fn stats(&self) -> GuardStats {
        GuardStats {
            provider_id: self.provider_id.clone(),
            circuit_state: self.breaker.state().await,
            consecutive_failures: self.breaker.consecutive_failures().await,
        }
    }
}
