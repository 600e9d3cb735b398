//! Failure-injection tests for the cache engine.
//!
//! A wrapper storage flips individual operations into errors so each
//! branch of the failure semantics is exercised precisely: synchronous
//! paths propagate backend errors, background paths swallow them, and
//! the grace fallback only ever suppresses loader errors.
//!
//! Run with: `cargo test --test chaos`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tagcache::{
    CacheConfig, CacheEngine, CacheEntry, CacheError, InMemoryStorage, ManualClock, QueryOptions,
    Storage, TagPath, VerificationReport,
};

// =============================================================================
// FailingStorage - precise error injection
// =============================================================================

/// Wraps a real backend and fails selected operations on demand.
struct FailingStorage {
    inner: InMemoryStorage,
    fail_get: AtomicBool,
    fail_set: AtomicBool,
    fail_tag_read: AtomicBool,
    fail_tag_write: AtomicBool,
    fail_report: AtomicBool,
    set_attempts: AtomicUsize,
}

impl FailingStorage {
    fn new(inner: InMemoryStorage) -> Self {
        Self {
            inner,
            fail_get: AtomicBool::new(false),
            fail_set: AtomicBool::new(false),
            fail_tag_read: AtomicBool::new(false),
            fail_tag_write: AtomicBool::new(false),
            fail_report: AtomicBool::new(false),
            set_attempts: AtomicUsize::new(0),
        }
    }

    fn injected() -> CacheError {
        CacheError::Backend("injected fault".to_string())
    }

    fn check(flag: &AtomicBool) -> Result<(), CacheError> {
        if flag.load(Ordering::SeqCst) {
            Err(Self::injected())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Self::check(&self.fail_get)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        self.set_attempts.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_set)?;
        self.inner.set(key, entry).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn get_tag_invalidation(&self, serialized_tag: &str) -> Result<Option<u64>, CacheError> {
        Self::check(&self.fail_tag_read)?;
        self.inner.get_tag_invalidation(serialized_tag).await
    }

    async fn set_tag_invalidation(
        &self,
        serialized_tag: &str,
        at_ms: u64,
    ) -> Result<(), CacheError> {
        Self::check(&self.fail_tag_write)?;
        self.inner.set_tag_invalidation(serialized_tag, at_ms).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.clear().await
    }

    async fn disconnect(&self) -> Result<(), CacheError> {
        self.inner.disconnect().await
    }

    fn supports_verification(&self) -> bool {
        self.inner.supports_verification()
    }

    async fn report_verification(&self, report: &VerificationReport) -> Result<(), CacheError> {
        Self::check(&self.fail_report)?;
        self.inner.report_verification(report).await
    }
}

fn tag(segments: &[&str]) -> TagPath {
    TagPath::new(segments.iter().copied()).unwrap()
}

type LoaderFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, CacheError>> + Send>>;

fn counting_loader(
    calls: &Arc<AtomicUsize>,
) -> impl Fn() -> LoaderFuture + Send + Sync + 'static + Clone {
    let calls = calls.clone();
    move || -> LoaderFuture {
        let calls = calls.clone();
        Box::pin(async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({"count": n}))
        })
    }
}

fn faulty_engine(
    verification: bool,
) -> (Arc<CacheEngine>, Arc<FailingStorage>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let mut inner = InMemoryStorage::with_clock(clock.clone());
    if verification {
        inner = inner.with_verification_log();
    }
    let storage = Arc::new(FailingStorage::new(inner));
    let config = CacheConfig {
        verify_percent: if verification { 1.0 } else { 0.1 },
        ..Default::default()
    };
    let engine =
        Arc::new(CacheEngine::with_clock(storage.clone(), config, clock.clone()).unwrap());
    (engine, storage, clock)
}

// =============================================================================
// Synchronous paths propagate backend errors
// =============================================================================

#[tokio::test]
async fn storage_read_failure_propagates() {
    let (engine, storage, _) = faulty_engine(false);
    storage.fail_get.store(true, Ordering::SeqCst);

    let calls = Arc::new(AtomicUsize::new(0));
    let result: Result<Value, _> = engine
        .query("k", vec![tag(&["k"])], counting_loader(&calls))
        .await;

    assert_eq!(result.unwrap_err(), FailingStorage::injected());
    assert_eq!(calls.load(Ordering::SeqCst), 0, "loader must not run when the read fails");
}

#[tokio::test]
async fn storage_write_failure_propagates_after_loader() {
    let (engine, storage, _) = faulty_engine(false);
    storage.fail_set.store(true, Ordering::SeqCst);

    let calls = Arc::new(AtomicUsize::new(0));
    let result: Result<Value, _> = engine
        .query("k", vec![tag(&["k"])], counting_loader(&calls))
        .await;

    // The loader's value was computed, but it is only returned after a
    // successful write.
    assert_eq!(result.unwrap_err(), FailingStorage::injected());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn write_failure_is_not_recovered_by_grace() {
    let (engine, storage, clock) = faulty_engine(false);
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::new().ttl(1u64).grace(60_000u64);

    let _: Value = engine
        .query_with("k", vec![tag(&["k"])], counting_loader(&calls), options)
        .await
        .unwrap();

    // Invalidate so the next query reloads synchronously while the prior
    // entry is still within grace.
    clock.set(5);
    engine.invalidate(&[tag(&["k"])]).await.unwrap();

    // The reload's WRITE fails: must propagate, not fall back to the
    // stale value. Grace only suppresses loader failures.
    clock.set(10);
    storage.fail_set.store(true, Ordering::SeqCst);
    let result: Result<Value, _> = engine
        .query_with("k", vec![tag(&["k"])], counting_loader(&calls), options)
        .await;

    assert_eq!(result.unwrap_err(), FailingStorage::injected());
    assert_eq!(calls.load(Ordering::SeqCst), 2, "the loader did run before the failed write");
}

#[tokio::test]
async fn tag_read_failure_propagates_from_query() {
    let (engine, storage, clock) = faulty_engine(false);
    let calls = Arc::new(AtomicUsize::new(0));

    let _: Value = engine
        .query("k", vec![tag(&["k"])], counting_loader(&calls))
        .await
        .unwrap();

    clock.set(10);
    storage.fail_tag_read.store(true, Ordering::SeqCst);
    let result: Result<Value, _> = engine
        .query("k", vec![tag(&["k"])], counting_loader(&calls))
        .await;
    assert_eq!(result.unwrap_err(), FailingStorage::injected());

    // The primitives facade propagates the same way.
    let result = engine.get::<Value>("k").await;
    assert_eq!(result.unwrap_err(), FailingStorage::injected());
}

#[tokio::test]
async fn invalidate_failure_propagates() {
    let (engine, storage, _) = faulty_engine(false);
    storage.fail_tag_write.store(true, Ordering::SeqCst);

    let result = engine.invalidate(&[tag(&["k"])]).await;
    assert_eq!(result.unwrap_err(), FailingStorage::injected());
}

#[tokio::test]
async fn coalesced_joiners_observe_backend_error() {
    let (engine, storage, _) = faulty_engine(false);
    storage.fail_set.store(true, Ordering::SeqCst);

    let calls = Arc::new(AtomicUsize::new(0));
    let slow = |calls: Arc<AtomicUsize>| {
        move || {
            let calls = calls.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!(1))
            }
        }
    };

    let (a, b) = tokio::join!(
        engine.query::<Value, _, _>("k", vec![tag(&["k"])], slow(calls.clone())),
        engine.query::<Value, _, _>("k", vec![tag(&["k"])], slow(calls.clone())),
    );

    assert_eq!(a.unwrap_err(), FailingStorage::injected());
    assert_eq!(b.unwrap_err(), FailingStorage::injected());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Background paths swallow backend errors
// =============================================================================

#[tokio::test]
async fn background_refresh_write_failure_is_swallowed() {
    let (engine, storage, clock) = faulty_engine(false);
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::new().ttl(1u64).grace(60_000u64);

    let _: Value = engine
        .query_with("k", vec![tag(&["k"])], counting_loader(&calls), options)
        .await
        .unwrap();

    // In-grace read spawns a refresh whose write fails; the caller still
    // gets the stale value and the old entry survives.
    clock.set(10);
    storage.fail_set.store(true, Ordering::SeqCst);
    let stale: Value = engine
        .query_with("k", vec![tag(&["k"])], counting_loader(&calls), options)
        .await
        .unwrap();
    assert_eq!(stale, json!({"count": 1}));

    // Wait for the refresh attempt, then confirm nothing replaced the entry.
    for _ in 0..200 {
        if storage.set_attempts.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    storage.fail_set.store(false, Ordering::SeqCst);
    let kept: Value = engine
        .query_with("k", vec![tag(&["k"])], counting_loader(&calls), options)
        .await
        .unwrap();
    assert_eq!(kept, json!({"count": 1}), "failed refresh must leave the stale entry");
}

#[tokio::test]
async fn verification_report_failure_is_swallowed() {
    let (engine, storage, clock) = faulty_engine(true);
    storage.fail_report.store(true, Ordering::SeqCst);

    let calls = Arc::new(AtomicUsize::new(0));
    let _: Value = engine
        .query("k", vec![tag(&["k"])], counting_loader(&calls))
        .await
        .unwrap();

    // Fresh hit schedules verification; the report write fails silently.
    clock.set(1_000);
    let hit: Value = engine
        .query("k", vec![tag(&["k"])], counting_loader(&calls))
        .await
        .unwrap();
    assert_eq!(hit, json!({"count": 1}));

    // Give the verification task time to run and fail.
    for _ in 0..100 {
        if calls.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    // No report landed, and the cached entry is untouched.
    assert!(storage.inner.verification_reports().is_empty());
    let unchanged: Value = engine
        .query("k", vec![tag(&["k"])], counting_loader(&calls))
        .await
        .unwrap();
    assert_eq!(unchanged, json!({"count": 1}));
}
