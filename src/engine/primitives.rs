// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Raw cache operations.
//!
//! `get`, `set`, and `del` share the freshness evaluator and invalidation
//! semantics with the query path but bypass the coalescer and the loader.
//! `get` never deletes: an entry it refuses to return is left for the
//! backend to expire.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::QueryOptions;
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::freshness::{classify, Freshness};
use crate::tag::TagPath;

use super::CacheEngine;

impl CacheEngine {
    /// Read a raw key.
    ///
    /// Returns the stored value iff the entry is fresh or in-grace and
    /// not tag-invalidated; otherwise `None`.
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        let cache_key = self.cache_key(key);
        let Some(entry) = self.storage().get(&cache_key).await? else {
            return Ok(None);
        };
        let class = classify(self.storage().as_ref(), &entry, self.clock().now_ms()).await?;
        if class.freshness == Freshness::Expired {
            debug!(key = %cache_key, invalidated = class.tag_invalidated, "get refused dead entry");
            return Ok(None);
        }
        serde_json::from_value(entry.value)
            .map(Some)
            .map_err(|err| CacheError::Codec(err.to_string()))
    }

    /// Write a raw key with the given tags, using the engine's default
    /// TTL and grace.
    pub async fn set<T>(&self, key: &str, value: &T, tags: Vec<TagPath>) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        self.set_with(key, value, tags, QueryOptions::default()).await
    }

    /// Write a raw key with per-call TTL/grace overrides.
    pub async fn set_with<T>(
        &self,
        key: &str,
        value: &T,
        tags: Vec<TagPath>,
        options: QueryOptions,
    ) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        let cache_key = self.cache_key(key);
        let (ttl_ms, grace_ms) = self.resolve_windows(&options);
        let value =
            serde_json::to_value(value).map_err(|err| CacheError::Codec(err.to_string()))?;
        let entry = CacheEntry::new(value, tags, self.clock().now_ms(), ttl_ms, grace_ms)?;
        self.storage().set(&cache_key, &entry).await
    }

    /// Delete a raw key. Deleting a missing key succeeds.
    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        let cache_key = self.cache_key(key);
        self.storage().delete(&cache_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CacheConfig, DurationMs};
    use crate::storage::InMemoryStorage;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn tag(segments: &[&str]) -> TagPath {
        TagPath::new(segments.iter().copied()).unwrap()
    }

    fn manual_engine(config: CacheConfig) -> (CacheEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let storage = Arc::new(InMemoryStorage::with_clock(clock.clone()));
        let engine = CacheEngine::with_clock(storage, config, clock.clone()).unwrap();
        (engine, clock)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (engine, _) = manual_engine(CacheConfig::default());
        engine.set("k", &json!({"n": 1}), vec![tag(&["k"])]).await.unwrap();

        let read: Option<Value> = engine.get("k").await.unwrap();
        assert_eq!(read, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (engine, _) = manual_engine(CacheConfig::default());
        let read: Option<Value> = engine.get("absent").await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_get_refuses_expired() {
        let (engine, clock) = manual_engine(CacheConfig {
            default_ttl: DurationMs::from_millis(1_000),
            ..Default::default()
        });
        engine.set("k", &json!(1), vec![tag(&["k"])]).await.unwrap();

        clock.set(999);
        assert_eq!(engine.get::<Value>("k").await.unwrap(), Some(json!(1)));

        clock.set(1_000);
        assert!(engine.get::<Value>("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_returns_in_grace_value() {
        let (engine, clock) = manual_engine(CacheConfig {
            default_ttl: DurationMs::from_millis(1_000),
            default_grace: Some(DurationMs::from_millis(5_000)),
            ..Default::default()
        });
        engine.set("k", &json!(1), vec![tag(&["k"])]).await.unwrap();

        clock.set(3_000);
        assert_eq!(engine.get::<Value>("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_get_refuses_tag_invalidated() {
        let (engine, clock) = manual_engine(CacheConfig::default());
        engine
            .set("k", &json!(1), vec![tag(&["posts", "1", "comments"])])
            .await
            .unwrap();

        clock.set(100);
        engine.invalidate(&[tag(&["posts", "1"])]).await.unwrap();
        assert!(engine.get::<Value>("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exact_invalidation_spares_extensions_on_get() {
        let (engine, clock) = manual_engine(CacheConfig::default());
        engine
            .set("k", &json!(1), vec![tag(&["posts", "1", "comments"])])
            .await
            .unwrap();

        clock.set(100);
        engine.invalidate_exact(&[tag(&["posts", "1"])]).await.unwrap();
        assert_eq!(engine.get::<Value>("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_del() {
        let (engine, _) = manual_engine(CacheConfig::default());
        engine.set("k", &json!(1), vec![tag(&["k"])]).await.unwrap();
        engine.del("k").await.unwrap();
        assert!(engine.get::<Value>("k").await.unwrap().is_none());

        // Deleting again is fine.
        engine.del("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_set_rejects_empty_tags() {
        let (engine, _) = manual_engine(CacheConfig::default());
        let result = engine.set("k", &json!(1), vec![]).await;
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}
