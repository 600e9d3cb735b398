// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The query path.
//!
//! `query` is the named-query façade: coalesce, read, classify, then
//! serve fresh, serve stale with a background refresh, or load
//! synchronously. Within one call, the storage read precedes the loader,
//! the loader precedes the storage write, and the write precedes the
//! return.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::coalescer::{self, LoadOutcome, Ticket};
use crate::config::QueryOptions;
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::freshness::{classify, Freshness};
use crate::metrics;
use crate::storage::Storage;
use crate::tag::TagPath;

use super::refresh;
use super::CacheEngine;

/// A boxed future producing the opaque stored value.
pub(crate) type LoaderFuture = Pin<Box<dyn Future<Output = Result<Value, CacheError>> + Send>>;

/// The loader as the engine carries it: callable repeatedly (background
/// refresh and verification re-run it), shareable across tasks.
pub(crate) type BoxedLoader = Arc<dyn Fn() -> LoaderFuture + Send + Sync>;

/// Why a fetch failed: in the loader, or in the write that follows it.
/// Only loader failures are candidates for the grace fallback.
pub(crate) enum FetchError {
    Load(CacheError),
    Store(CacheError),
}

/// Run the loader and store its value under `cache_key`.
///
/// The entry's windows start at the write-time clock reading. Used by
/// the synchronous miss path and the background refresher.
pub(crate) async fn fetch_and_cache(
    storage: &dyn Storage,
    clock: &dyn Clock,
    cache_key: &str,
    tags: &[TagPath],
    loader: &BoxedLoader,
    ttl_ms: u64,
    grace_ms: Option<u64>,
) -> Result<Value, FetchError> {
    let value = loader().await.map_err(FetchError::Load)?;
    let now = clock.now_ms();
    let entry = CacheEntry::new(value.clone(), tags.to_vec(), now, ttl_ms, grace_ms)
        .map_err(FetchError::Store)?;
    storage.set(cache_key, &entry).await.map_err(FetchError::Store)?;
    Ok(value)
}

impl CacheEngine {
    /// Run a named query with the engine's default TTL and grace.
    ///
    /// On a hit the cached value is returned without invoking `loader`;
    /// on a miss `loader` runs once, its value is stored under the tags,
    /// and concurrent callers for the same key share that single run.
    pub async fn query<T, F, Fut>(
        &self,
        key: &str,
        tags: Vec<TagPath>,
        loader: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        self.query_with(key, tags, loader, QueryOptions::default()).await
    }

    /// Run a named query with per-query TTL/grace overrides.
    pub async fn query_with<T, F, Fut>(
        &self,
        key: &str,
        tags: Vec<TagPath>,
        loader: F,
        options: QueryOptions,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let boxed: BoxedLoader = Arc::new(move || {
            let fut = loader();
            Box::pin(async move {
                let value = fut.await?;
                serde_json::to_value(value).map_err(|err| CacheError::Codec(err.to_string()))
            }) as LoaderFuture
        });
        let value = self.query_value(key, tags, boxed, options).await?;
        serde_json::from_value(value).map_err(|err| CacheError::Codec(err.to_string()))
    }

    /// The untyped query path over opaque JSON values.
    #[tracing::instrument(level = "debug", skip(self, tags, loader, options), fields(key = %key))]
    pub(crate) async fn query_value(
        &self,
        key: &str,
        tags: Vec<TagPath>,
        loader: BoxedLoader,
        options: QueryOptions,
    ) -> LoadOutcome {
        if tags.is_empty() {
            return Err(CacheError::Config(
                "query needs at least one tag".to_string(),
            ));
        }
        let cache_key = self.cache_key(key);
        let (ttl_ms, grace_ms) = self.resolve_windows(&options);

        match self.coalescer().enter(&cache_key) {
            Ticket::Joiner(slot) => {
                metrics::record_coalesced_join();
                debug!("joined in-flight load");
                coalescer::await_outcome(slot).await
            }
            Ticket::Leader(guard) => {
                let outcome = self
                    .lead_load(&cache_key, &tags, &loader, ttl_ms, grace_ms)
                    .await;
                guard.complete(&outcome);
                outcome
            }
        }
    }

    /// The leader's side of a query: read, classify, and serve or load.
    async fn lead_load(
        &self,
        cache_key: &str,
        tags: &[TagPath],
        loader: &BoxedLoader,
        ttl_ms: u64,
        grace_ms: Option<u64>,
    ) -> LoadOutcome {
        let prior = self.storage().get(cache_key).await?;
        let now = self.clock().now_ms();

        if let Some(entry) = &prior {
            let class = classify(self.storage().as_ref(), entry, now).await?;
            match class.freshness {
                Freshness::Fresh => {
                    metrics::record_query("fresh");
                    debug!("fresh hit");
                    if self.verification_capable() && self.sample_verification() {
                        refresh::spawn_verification(
                            self.storage().clone(),
                            self.clock().clone(),
                            cache_key.to_string(),
                            entry.value.clone(),
                            loader.clone(),
                        );
                    }
                    return Ok(entry.value.clone());
                }
                Freshness::InGrace => {
                    metrics::record_query("grace");
                    debug!("serving stale, refreshing in background");
                    refresh::spawn_refresh(
                        self.storage().clone(),
                        self.clock().clone(),
                        cache_key.to_string(),
                        tags.to_vec(),
                        loader.clone(),
                        ttl_ms,
                        grace_ms,
                    );
                    return Ok(entry.value.clone());
                }
                Freshness::Expired => {
                    metrics::record_miss(if class.tag_invalidated {
                        "invalidated"
                    } else {
                        "expired"
                    });
                }
            }
        } else {
            metrics::record_miss("absent");
        }

        metrics::record_query("miss");
        match fetch_and_cache(
            self.storage().as_ref(),
            self.clock().as_ref(),
            cache_key,
            tags,
            loader,
            ttl_ms,
            grace_ms,
        )
        .await
        {
            Ok(value) => {
                metrics::record_load("success");
                Ok(value)
            }
            Err(FetchError::Store(err)) => {
                metrics::record_load("error");
                Err(err)
            }
            Err(FetchError::Load(err)) => {
                // Loader failure with a still-usable prior entry: serve
                // the stale value, suppressing the error.
                if let Some(entry) = prior {
                    if entry.is_within_grace(self.clock().now_ms()) {
                        metrics::record_load("recovered");
                        warn!(error = %err, "loader failed, serving stale value within grace");
                        return Ok(entry.value);
                    }
                }
                metrics::record_load("error");
                Err(err)
            }
        }
    }

    fn sample_verification(&self) -> bool {
        let percent = self.config().verify_percent;
        percent > 0.0 && rand::random::<f64>() < percent
    }
}
