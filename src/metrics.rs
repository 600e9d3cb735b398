//! Metrics instrumentation for the cache engine.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the host
//! chooses the exporter.
//!
//! # Metric Naming Convention
//! - `tag_cache_` prefix for all metrics
//! - `_total` suffix for counters
//!
//! # Labels
//! - `outcome`: fresh, grace, miss
//! - `reason`: absent, expired, invalidated
//! - `status`: success, error, recovered

use metrics::counter;

/// Record a query outcome: served fresh, served stale from grace, or a
/// miss that went to the loader.
pub fn record_query(outcome: &'static str) {
    counter!("tag_cache_queries_total", "outcome" => outcome).increment(1);
}

/// Record why a query missed.
pub fn record_miss(reason: &'static str) {
    counter!("tag_cache_misses_total", "reason" => reason).increment(1);
}

/// Record a synchronous loader run.
pub fn record_load(status: &'static str) {
    counter!("tag_cache_loads_total", "status" => status).increment(1);
}

/// Record a coalesced join (a caller that waited on another's load).
pub fn record_coalesced_join() {
    counter!("tag_cache_coalesced_joins_total").increment(1);
}

/// Record a background stale-while-revalidate refresh.
pub fn record_refresh(status: &'static str) {
    counter!("tag_cache_refreshes_total", "status" => status).increment(1);
}

/// Record a sampled verification run.
pub fn record_verification(is_stale: bool) {
    let verdict = if is_stale { "stale" } else { "clean" };
    counter!("tag_cache_verifications_total", "verdict" => verdict).increment(1);
}

/// Record tag invalidation writes.
pub fn record_invalidation(tags: usize) {
    counter!("tag_cache_invalidations_total").increment(tags as u64);
}
