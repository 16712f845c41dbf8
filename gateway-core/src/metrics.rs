//! Prometheus counters/gauges for the tenant cache and synchronizer,
//! exposed for external scraping alongside the typed [`crate::tenant::Stats`]
//! snapshot the Monitor consumes for alert thresholds — grounded on
//! `pageserver::metrics`'s `once_cell::sync::Lazy` + `register_*!` pattern,
//! scaled down to the handful of gauges this crate actually owns.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

pub static CACHE_HITS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gateway_cache_hits_total",
        "Tenant cache hits (token or userId already resolved to a loaded instance)."
    )
    .expect("metric registration is infallible outside of name collisions")
});

pub static CACHE_MISSES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gateway_cache_misses_total",
        "Tenant cache misses requiring a disk read or remote verify call."
    )
    .expect("metric registration is infallible outside of name collisions")
});

/// Gauge, not a counter: this tracks the synchronizer's *current*
/// consecutive-failure count, which resets to zero on a successful sync
/// rather than only ever increasing.
pub static SYNC_FAILURES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "gateway_sync_failures",
        "Current consecutive failed config-synchronizer fetch attempts."
    )
    .expect("metric registration is infallible outside of name collisions")
});

pub static ACTIVE_INSTANCES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "gateway_active_instances",
        "Number of tenant instances currently resident in the cache."
    )
    .expect("metric registration is infallible outside of name collisions")
});

pub static PENDING_REQUESTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "gateway_pending_requests",
        "Sum of in-flight request counts across all cached tenant instances."
    )
    .expect("metric registration is infallible outside of name collisions")
});

/// Push a [`crate::tenant::Stats`] snapshot onto the process-wide Prometheus
/// registry. Call this once per [`crate::monitor::Monitor`] tick; it does
/// not itself schedule anything.
pub fn observe_stats(stats: &crate::tenant::Stats, pending_requests_sum: i64) {
    ACTIVE_INSTANCES.set(stats.cached_instances as i64);
    PENDING_REQUESTS.set(pending_requests_sum);
    SYNC_FAILURES.set(stats.sync_failures as i64);
}

/// Call on every cache hit/miss so the gauges track the same counters the
/// in-process [`crate::tenant::Stats`] struct already holds.
pub fn record_cache_hit() {
    CACHE_HITS_TOTAL.inc();
}

pub fn record_cache_miss() {
    CACHE_MISSES_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_panicking() {
        record_cache_hit();
        record_cache_miss();
        let stats = crate::tenant::Stats::default();
        observe_stats(&stats, 0);
    }
}
