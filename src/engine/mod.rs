//! Cache engine.
//!
//! The [`CacheEngine`] orchestrates everything: it owns the stampede
//! coalescer and the policy knobs, talks to storage through the
//! [`Storage`](crate::storage::Storage) contract, classifies entries with
//! the freshness evaluator, and spawns background refresh and
//! verification work.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tagcache::{CacheConfig, CacheEngine, InMemoryStorage, TagPath};
//!
//! # async fn example() -> Result<(), tagcache::CacheError> {
//! let engine = CacheEngine::new(Arc::new(InMemoryStorage::new()), CacheConfig::default())?;
//!
//! let user: serde_json::Value = engine
//!     .query("getUser:1", vec![TagPath::new(["users", "1"])?], || async {
//!         // load from the database here
//!         Ok(serde_json::json!({"id": "1", "name": "Alice"}))
//!     })
//!     .await?;
//!
//! // A write to users/1 makes the entry stale for the next reader.
//! engine.invalidate(&[TagPath::new(["users", "1"])?]).await?;
//! # Ok(())
//! # }
//! ```

mod primitives;
mod query;
mod refresh;

use std::sync::Arc;

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::coalescer::Coalescer;
use crate::config::{CacheConfig, QueryOptions};
use crate::error::CacheError;
use crate::storage::Storage;
use crate::tag::TagPath;

/// The cache engine.
///
/// Re-entrant and shareable: all methods take `&self`, internal state is
/// the coalescer map plus immutable configuration. Engines sharing a
/// backend share entries and invalidation state but nothing else.
pub struct CacheEngine {
    config: CacheConfig,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    coalescer: Coalescer,
    /// Probed once at construction.
    verification_capable: bool,
}

impl CacheEngine {
    /// Create an engine over `storage` with the wall clock.
    ///
    /// Fails when the configuration is out of range.
    pub fn new(storage: Arc<dyn Storage>, config: CacheConfig) -> Result<Self, CacheError> {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    /// Create an engine with an injected clock.
    pub fn with_clock(
        storage: Arc<dyn Storage>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let verification_capable = storage.supports_verification();
        Ok(Self {
            config,
            storage,
            clock,
            coalescer: Coalescer::new(),
            verification_capable,
        })
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether the backend accepts verification reports.
    #[must_use]
    pub fn verification_capable(&self) -> bool {
        self.verification_capable
    }

    /// Mark the given tags invalidated as of now.
    ///
    /// Hierarchical: entries tagged with any extension of a given path
    /// become stale. One storage write per tag; affected entries are
    /// never enumerated.
    pub async fn invalidate(&self, tags: &[TagPath]) -> Result<(), CacheError> {
        self.invalidate_at(tags, false).await
    }

    /// Mark the given tags invalidated, confined to exactly those paths.
    ///
    /// Entries tagged with extensions of the paths are unaffected.
    pub async fn invalidate_exact(&self, tags: &[TagPath]) -> Result<(), CacheError> {
        self.invalidate_at(tags, true).await
    }

    async fn invalidate_at(&self, tags: &[TagPath], exact: bool) -> Result<(), CacheError> {
        let now = self.clock.now_ms();
        for tag in tags {
            let serialized = if exact {
                tag.with_exact_sentinel().serialize()
            } else {
                tag.serialize()
            };
            self.storage.set_tag_invalidation(&serialized, now).await?;
            debug!(tag = %serialized, at = now, exact, "tag invalidated");
        }
        crate::metrics::record_invalidation(tags.len());
        Ok(())
    }

    /// Purge all entries and tag timestamps under the engine's namespace.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.storage.clear().await
    }

    /// Release the storage backend.
    pub async fn disconnect(&self) -> Result<(), CacheError> {
        self.storage.disconnect().await
    }

    /// The fully-prefixed storage key for a user key.
    pub(crate) fn cache_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.prefix, key)
    }

    /// Resolve per-query TTL/grace against the engine defaults. A zero
    /// grace disables the window.
    pub(crate) fn resolve_windows(&self, options: &QueryOptions) -> (u64, Option<u64>) {
        let ttl_ms = options.ttl.unwrap_or(self.config.default_ttl).as_millis();
        let grace_ms = options
            .grace
            .or(self.config.default_grace)
            .map(crate::config::DurationMs::as_millis)
            .filter(|g| *g > 0);
        (ttl_ms, grace_ms)
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn coalescer(&self) -> &Coalescer {
        &self.coalescer
    }
}
