use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterSnapshot {
    pub rps: f64,
    pub burst: f64,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

/// Client-side throttling applied before every upstream attempt.
///
/// `rps = 0` disables the token bucket; `max_inflight = 0` disables the
/// concurrency cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Tokens per second.
    pub rps: f64,
    /// Maximum burst size (tokens).
    pub burst: f64,
    /// Upper bound on concurrently running upstream attempts.
    pub max_inflight: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rps: 0.0,
            burst: 1.0,
            max_inflight: 0,
        }
    }
}

impl RateLimiterConfig {
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps < 0.0 {
            return None;
        }
        Some(Self {
            rps,
            burst: rps.max(1.0), // one second worth, at least 1
            max_inflight: 0,
        })
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum tokens (burst size)
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.burst = tokens as f64;
        self
    }

    /// Set the refill rate (tokens per second)
    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.rps = rate;
        self
    }

    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight;
        self
    }

    pub fn is_throttling(&self) -> bool {
        self.rps > 0.0
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
    /// Set when the provider told us to back off; applies to every caller.
    paused_until: Option<Instant>,
}

/// Token-bucket rate limiter shared by all keys.
///
/// Besides the local bucket it honours provider back-off hints: after
/// [`RateLimiter::pause_for`] every `acquire` waits until the pause ends.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let state = Mutex::new(State {
            tokens: cfg.burst,
            last: Instant::now(),
            paused_until: None,
        });
        Self { cfg, state }
    }

    fn refill_locked(cfg: &RateLimiterConfig, st: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.rps).min(cfg.burst);
            st.last = now;
        }
    }

    /// Acquire one token (may sleep).
    pub async fn acquire(&self) {
        let cfg = &self.cfg;

        loop {
            let wait = {
                let mut st = self.state.lock().await;
                let now = Instant::now();

                let paused_until = st.paused_until;
                match paused_until {
                    Some(until) if until > now => until.duration_since(now),
                    _ => {
                        st.paused_until = None;
                        if cfg.rps <= 0.0 {
                            return;
                        }
                        Self::refill_locked(cfg, &mut st);
                        if st.tokens >= 1.0 {
                            st.tokens -= 1.0;
                            return;
                        }
                        Duration::from_secs_f64((1.0 - st.tokens) / cfg.rps)
                            .max(Duration::from_millis(1))
                    }
                }
            };

            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis() as u64, "rate limiter waiting");
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Try to acquire a token without waiting, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        let cfg = &self.cfg;
        let mut st = self.state.lock().await;
        if st.paused_until.map(|u| u > Instant::now()).unwrap_or(false) {
            return false;
        }
        if cfg.rps <= 0.0 {
            return true;
        }
        Self::refill_locked(cfg, &mut st);
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Hold every caller back for `after`; never shortens an existing pause.
    pub async fn pause_for(&self, after: Duration) {
        let until = Instant::now() + after;
        let mut st = self.state.lock().await;
        if st.paused_until.map(|cur| cur < until).unwrap_or(true) {
            st.paused_until = Some(until);
        }
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.cfg;
        let mut st = self.state.lock().await;
        let now = Instant::now();

        let mut wait_ms = st
            .paused_until
            .filter(|until| *until > now)
            .map(|until| until.duration_since(now).as_millis() as u64);

        if cfg.rps > 0.0 {
            Self::refill_locked(cfg, &mut st);
            if st.tokens < 1.0 {
                let local_wait_ms = ((1.0 - st.tokens) / cfg.rps * 1000.0) as u64;
                wait_ms = Some(wait_ms.unwrap_or(0).max(local_wait_ms));
            }
        }

        RateLimiterSnapshot {
            rps: cfg.rps,
            burst: cfg.burst,
            tokens: st.tokens,
            estimated_wait_ms: wait_ms,
        }
    }
}
