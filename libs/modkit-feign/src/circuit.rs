//! Circuit breaker state machine and registry.
//!
//! ```text
//!            failures >= threshold
//!            (after minimum_calls)
//!   CLOSED ─────────────────────────▶ OPEN
//!     ▲                                 │ sleep_window elapsed
//!     │ trial success                   ▼
//!     └──────────────────────────── HALF_OPEN
//!                                       │ trial failure
//!                                       └──────▶ OPEN
//! ```

use crate::config::CircuitBreakerConfig;
use crate::error::FeignError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

/// Breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls fail fast
    Open,
    /// A limited number of trial calls are admitted
    HalfOpen,
}

#[derive(Debug)]
struct Stats {
    state: CircuitState,
    window_start: Instant,
    calls: u32,
    failures: u32,
    opened_at: Instant,
    trials_in_flight: u32,
}

impl Stats {
    fn roll_window(&mut self, now: Instant, window: std::time::Duration) {
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.calls = 0;
            self.failures = 0;
        }
    }

    fn close(&mut self, now: Instant) {
        self.state = CircuitState::Closed;
        self.window_start = now;
        self.calls = 0;
        self.failures = 0;
        self.trials_in_flight = 0;
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = now;
        self.trials_in_flight = 0;
    }
}

/// Per-key breaker. All transitions happen under one short-lived lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    stats: Mutex<Stats>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            config,
            stats: Mutex::new(Stats {
                state: CircuitState::Closed,
                window_start: now,
                calls: 0,
                failures: 0,
                opened_at: now,
                trials_in_flight: 0,
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state as last recorded.
    ///
    /// An OPEN breaker whose sleep window elapsed reports OPEN until the next
    /// call moves it to HALF_OPEN.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.stats.lock().state
    }

    /// Ask permission for one call.
    ///
    /// # Errors
    /// Returns `FeignError::CircuitOpen` when the call must fail fast.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, FeignError> {
        let now = Instant::now();
        let mut stats = self.stats.lock();

        if stats.state == CircuitState::Open
            && now.duration_since(stats.opened_at) >= self.config.sleep_window
        {
            tracing::debug!(breaker = %self.key, "circuit half-open, admitting trial calls");
            stats.state = CircuitState::HalfOpen;
            stats.trials_in_flight = 0;
        }

        let trial = match stats.state {
            CircuitState::Closed => {
                stats.roll_window(now, self.config.rolling_window);
                false
            }
            CircuitState::HalfOpen if stats.trials_in_flight < self.config.half_open_max_calls.max(1) => {
                stats.trials_in_flight += 1;
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                return Err(FeignError::CircuitOpen {
                    breaker_key: self.key.clone(),
                });
            }
        };

        Ok(CallPermit {
            breaker: Arc::clone(self),
            trial,
            recorded: false,
        })
    }

    fn record_success(&self, trial: bool) {
        let now = Instant::now();
        let mut stats = self.stats.lock();
        match stats.state {
            CircuitState::HalfOpen if trial => {
                tracing::info!(breaker = %self.key, "circuit closed after successful trial");
                stats.close(now);
            }
            CircuitState::Closed => {
                stats.roll_window(now, self.config.rolling_window);
                stats.calls += 1;
            }
            _ => {}
        }
    }

    fn record_failure(&self, trial: bool) {
        let now = Instant::now();
        let mut stats = self.stats.lock();
        match stats.state {
            CircuitState::HalfOpen if trial => {
                tracing::warn!(breaker = %self.key, "trial call failed, circuit re-opened");
                stats.open(now);
            }
            CircuitState::Closed => {
                stats.roll_window(now, self.config.rolling_window);
                stats.calls += 1;
                stats.failures += 1;
                if stats.calls >= self.config.minimum_calls
                    && stats.failures >= self.config.failure_threshold
                {
                    tracing::warn!(
                        breaker = %self.key,
                        failures = stats.failures,
                        calls = stats.calls,
                        "circuit opened"
                    );
                    stats.open(now);
                }
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut stats = self.stats.lock();
        if stats.state == CircuitState::HalfOpen {
            stats.trials_in_flight = stats.trials_in_flight.saturating_sub(1);
        }
    }
}

/// Admission for one call; report its outcome exactly once.
///
/// Dropping a permit without reporting (the call was cancelled) counts as
/// neither success nor failure.
#[must_use = "report the outcome with on_success/on_failure/on_ignored"]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    recorded: bool,
}

impl CallPermit {
    pub fn on_success(mut self) {
        self.recorded = true;
        self.breaker.record_success(self.trial);
    }

    pub fn on_failure(mut self) {
        self.recorded = true;
        self.breaker.record_failure(self.trial);
    }

    /// The outcome says nothing about service health.
    pub fn on_ignored(self) {}
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.recorded && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// Supplies the breaker for a key.
///
/// Breakers are fetched once, when the method pipeline is built.
pub trait CircuitBreakerFactory: Send + Sync {
    fn for_key(&self, key: &str) -> Arc<CircuitBreaker>;
}

/// Registry creating one breaker per key with a shared config.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker already registered under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|b| Arc::clone(b.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl CircuitBreakerFactory for CircuitBreakerRegistry {
    fn for_key(&self, key: &str) -> Arc<CircuitBreaker> {
        Arc::clone(
            self.breakers
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone())))
                .value(),
        )
    }
}

/// Breaker key: method key, then `#uniquifier`, then `@target`.
#[must_use]
pub fn breaker_key(method_key: &str, uniquifier: Option<&str>, target: Option<&str>) -> String {
    let mut key = method_key.to_owned();
    if let Some(u) = uniquifier {
        key.push('#');
        key.push_str(u);
    }
    if let Some(t) = target {
        key.push('@');
        key.push_str(t);
    }
    key
}
