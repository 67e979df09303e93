use crate::cache::CacheStats;
use crate::resilience::{CircuitBreakerSnapshot, RateLimiterSnapshot};
use serde::Serialize;

/// A lightweight snapshot of runtime "signals" for dashboards and health checks.
///
/// Facts only (no policy); callers decide what counts as unhealthy.
#[derive(Debug, Clone, Serialize)]
pub struct SignalsSnapshot {
    pub cache: CacheStats,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub rate_limiter: Option<RateLimiterSnapshot>,
    pub inflight: Option<InflightSnapshot>,
    /// Distinct keys with an upstream call in flight.
    pub pending_calls: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InflightSnapshot {
    pub max: usize,
    pub available: usize,
    pub in_use: usize,
}
