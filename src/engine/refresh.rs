// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background refresher.
//!
//! Two fire-and-forget spawners: the stale-while-revalidate refresh that
//! replaces an in-grace entry, and the sampled verification that compares
//! a cached value against a fresh load and reports the result. Both are
//! detached from the caller and swallow every failure; neither holds a
//! coalescer slot, since the request that spawned them has already
//! released.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::hash::stable_hash;
use crate::metrics;
use crate::storage::{Storage, VerificationReport};
use crate::tag::TagPath;

use super::query::{fetch_and_cache, BoxedLoader, FetchError};

/// Re-run the loader and replace the entry. Success replaces; failure
/// leaves the current stale entry for the next synchronous reader.
pub(crate) fn spawn_refresh(
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    cache_key: String,
    tags: Vec<TagPath>,
    loader: BoxedLoader,
    ttl_ms: u64,
    grace_ms: Option<u64>,
) {
    tokio::spawn(async move {
        match fetch_and_cache(
            storage.as_ref(),
            clock.as_ref(),
            &cache_key,
            &tags,
            &loader,
            ttl_ms,
            grace_ms,
        )
        .await
        {
            Ok(_) => {
                metrics::record_refresh("success");
                debug!(key = %cache_key, "background refresh replaced entry");
            }
            Err(FetchError::Load(err)) => {
                metrics::record_refresh("error");
                warn!(key = %cache_key, error = %err, "background refresh loader failed");
            }
            Err(FetchError::Store(err)) => {
                metrics::record_refresh("error");
                warn!(key = %cache_key, error = %err, "background refresh write failed");
            }
        }
    });
}

/// Load a fresh value, hash it against the cached one, and report the
/// comparison to the backend. The returned value is never used; reports
/// and failures alike leave the cache untouched.
pub(crate) fn spawn_verification(
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    cache_key: String,
    cached: Value,
    loader: BoxedLoader,
) {
    tokio::spawn(async move {
        let fresh = match loader().await {
            Ok(value) => value,
            Err(err) => {
                debug!(key = %cache_key, error = %err, "verification loader failed");
                return;
            }
        };

        let cached_hash = stable_hash(&cached);
        let fresh_hash = stable_hash(&fresh);
        let is_stale = cached_hash != fresh_hash;
        metrics::record_verification(is_stale);

        let report = VerificationReport {
            key: cache_key.clone(),
            is_stale,
            cached_hash,
            fresh_hash,
            timestamp: clock.now_ms(),
        };
        if let Err(err) = storage.report_verification(&report).await {
            debug!(key = %cache_key, error = %err, "verification report dropped");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entry::CacheEntry;
    use crate::error::CacheError;
    use crate::storage::InMemoryStorage;
    use serde_json::json;
    use std::time::Duration;

    fn tag(segments: &[&str]) -> TagPath {
        TagPath::new(segments.iter().copied()).unwrap()
    }

    fn loader_returning(value: Value) -> BoxedLoader {
        Arc::new(move || {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        })
    }

    fn failing_loader() -> BoxedLoader {
        Arc::new(|| Box::pin(async { Err(CacheError::Loader("boom".to_string())) }))
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("background task did not complete");
    }

    async fn wait_for_entry_value(storage: &InMemoryStorage, key: &str, expected: &Value) -> CacheEntry {
        for _ in 0..200 {
            if let Some(entry) = storage.get(key).await.unwrap() {
                if &entry.value == expected {
                    return entry;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("background refresh did not land");
    }

    #[tokio::test]
    async fn test_refresh_replaces_entry() {
        let clock = Arc::new(ManualClock::new(0));
        let storage = Arc::new(InMemoryStorage::with_clock(clock.clone()));
        let stale = CacheEntry::new(json!({"count": 1}), vec![tag(&["k"])], 0, 1, Some(10_000))
            .unwrap();
        storage.set("qc:k", &stale).await.unwrap();

        clock.set(10);
        spawn_refresh(
            storage.clone(),
            clock.clone(),
            "qc:k".to_string(),
            vec![tag(&["k"])],
            loader_returning(json!({"count": 2})),
            1,
            Some(10_000),
        );

        let replaced = wait_for_entry_value(&storage, "qc:k", &json!({"count": 2})).await;
        assert_eq!(replaced.created_at, 10);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_entry() {
        let clock = Arc::new(ManualClock::new(0));
        let storage = Arc::new(InMemoryStorage::with_clock(clock.clone()));
        let stale = CacheEntry::new(json!({"count": 1}), vec![tag(&["k"])], 0, 1, Some(10_000))
            .unwrap();
        storage.set("qc:k", &stale).await.unwrap();

        clock.set(10);
        spawn_refresh(
            storage.clone(),
            clock.clone(),
            "qc:k".to_string(),
            vec![tag(&["k"])],
            failing_loader(),
            1,
            Some(10_000),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let kept = storage.get("qc:k").await.unwrap().unwrap();
        assert_eq!(kept.value, json!({"count": 1}));
        assert_eq!(kept.created_at, 0);
    }

    #[tokio::test]
    async fn test_verification_reports_match() {
        let clock = Arc::new(ManualClock::new(42));
        let storage = Arc::new(InMemoryStorage::with_clock(clock.clone()).with_verification_log());

        spawn_verification(
            storage.clone(),
            clock.clone(),
            "qc:k".to_string(),
            json!({"n": 1}),
            loader_returning(json!({"n": 1})),
        );

        let probe = storage.clone();
        wait_for(move || !probe.verification_reports().is_empty()).await;

        let reports = storage.verification_reports();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].is_stale);
        assert_eq!(reports[0].cached_hash, reports[0].fresh_hash);
        assert_eq!(reports[0].key, "qc:k");
        assert_eq!(reports[0].timestamp, 42);
    }

    #[tokio::test]
    async fn test_verification_flags_divergence() {
        let clock = Arc::new(ManualClock::new(0));
        let storage = Arc::new(InMemoryStorage::with_clock(clock.clone()).with_verification_log());

        spawn_verification(
            storage.clone(),
            clock.clone(),
            "qc:k".to_string(),
            json!({"n": 1}),
            loader_returning(json!({"n": 2})),
        );

        let probe = storage.clone();
        wait_for(move || !probe.verification_reports().is_empty()).await;

        let reports = storage.verification_reports();
        assert!(reports[0].is_stale);
        assert_ne!(reports[0].cached_hash, reports[0].fresh_hash);
    }

    #[tokio::test]
    async fn test_verification_loader_failure_is_swallowed() {
        let clock = Arc::new(ManualClock::new(0));
        let storage = Arc::new(InMemoryStorage::with_clock(clock.clone()).with_verification_log());

        spawn_verification(
            storage.clone(),
            clock.clone(),
            "qc:k".to_string(),
            json!(1),
            failing_loader(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(storage.verification_reports().is_empty());
    }
}
