use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Provider is suspended; calls fail immediately until the cool-down
    /// elapses
    Open,
    /// Cool-down elapsed; exactly one probe call is allowed through
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long an open circuit suspends calls before allowing a probe
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_issued: bool,
}

/// Circuit breaker guarding one external provider.
///
/// Opens after a run of consecutive failures, suspends calls for a
/// cool-down window, then admits a single half-open probe: probe success
/// closes the circuit, probe failure re-opens it for another cool-down.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_issued: false,
            })),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Whether a call may proceed right now. Transitions Open -> HalfOpen
    /// once the cool-down has elapsed and hands out the single probe slot.
    pub async fn call_permitted(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(false);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_issued = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_issued {
                    false
                } else {
                    inner.probe_issued = true;
                    true
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        inner.probe_issued = false;
        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed: back to a full cool-down.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_issued = false;
                inner.consecutive_failures += 1;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.lock().await.consecutive_failures
    }
}
