use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Externally visible circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    pub trial_in_flight: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    /// Alias for with_cooldown for API consistency
    pub fn with_reset_timeout(self, timeout: Duration) -> Self {
        self.with_cooldown(timeout)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Three-state circuit breaker.
///
/// - `Closed`: calls pass; consecutive terminal failures are counted
/// - `Open`: calls fail fast until the cooldown since the last failure elapses
/// - `HalfOpen`: exactly one trial is admitted; its outcome closes or re-opens
///
/// Callers obtain a [`CircuitPermit`] from [`CircuitBreaker::allow`] and resolve
/// it with `success()` or `failure()`. A trial permit dropped unresolved frees
/// the trial slot for the next caller.
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    /// Ask for permission to call upstream.
    pub fn allow(&self) -> Result<CircuitPermit<'_>> {
        let cooldown = self.cfg.cooldown();
        let mut st = self.lock();
        match st.state {
            CircuitState::Closed => Ok(CircuitPermit::new(self, false)),
            CircuitState::Open => {
                let elapsed = st
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(cooldown);
                if elapsed < cooldown {
                    return Err(Error::CircuitOpen {
                        retry_in: Some(cooldown - elapsed),
                    });
                }
                st.state = CircuitState::HalfOpen;
                st.trial_in_flight = true;
                info!(
                    consecutive_failures = st.consecutive_failures,
                    "circuit half-open, admitting trial"
                );
                Ok(CircuitPermit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if st.trial_in_flight {
                    return Err(Error::CircuitOpen { retry_in: None });
                }
                st.trial_in_flight = true;
                Ok(CircuitPermit::new(self, true))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn on_success(&self, trial: bool) {
        let mut st = self.lock();
        st.consecutive_failures = 0;
        if trial && st.state == CircuitState::HalfOpen {
            st.state = CircuitState::Closed;
            st.trial_in_flight = false;
            info!("circuit closed after successful trial");
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut st = self.lock();
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        st.last_failure = Some(Instant::now());
        match st.state {
            CircuitState::HalfOpen if trial => {
                st.state = CircuitState::Open;
                st.trial_in_flight = false;
                warn!(
                    cooldown_ms = self.cfg.cooldown_ms,
                    "circuit re-opened after failed trial"
                );
            }
            CircuitState::Closed if st.consecutive_failures >= self.cfg.failure_threshold => {
                st.state = CircuitState::Open;
                warn!(
                    consecutive_failures = st.consecutive_failures,
                    cooldown_ms = self.cfg.cooldown_ms,
                    "circuit opened"
                );
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut st = self.lock();
        if st.state == CircuitState::HalfOpen {
            st.trial_in_flight = false;
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let cooldown = self.cfg.cooldown();
        let st = self.lock();
        let open_remaining_ms = match (st.state, st.last_failure) {
            (CircuitState::Open, Some(at)) => {
                let elapsed = at.elapsed();
                (elapsed < cooldown).then(|| (cooldown - elapsed).as_millis() as u64)
            }
            _ => None,
        };
        CircuitBreakerSnapshot {
            state: st.state,
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown_ms,
            consecutive_failures: st.consecutive_failures,
            open_remaining_ms,
            trial_in_flight: st.trial_in_flight,
        }
    }
}

/// Admission ticket returned by [`CircuitBreaker::allow`].
#[must_use = "resolve the permit with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    /// Whether this permit is the single half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.release_trial();
        }
    }
}
