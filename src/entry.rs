//! Cache entry record.
//!
//! A [`CacheEntry`] carries the loader's value (stored opaquely as JSON),
//! the tag paths the value depends on, and the three timestamps of the
//! TTL/grace state machine. Entries are never mutated in place; updates
//! are whole-entry writes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CacheError;
use crate::tag::TagPath;

/// A stored cache entry.
///
/// Invariant: `created_at <= expires_at`, and when `grace_until` is
/// present, `expires_at <= grace_until`. Timestamps are wall-clock
/// milliseconds from the engine's clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The loader's return value, stored opaquely.
    pub value: Value,
    /// Tag paths the value depends on. Non-empty, deduplicated.
    pub tags: Vec<TagPath>,
    /// When the value was computed (ms).
    pub created_at: u64,
    /// End of the freshness window (ms).
    pub expires_at: u64,
    /// End of the grace window (ms). Absent when grace is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_until: Option<u64>,
}

impl CacheEntry {
    /// Build an entry from a freshly loaded value.
    ///
    /// `expires_at` is `created_at + ttl_ms`; `grace_until` is
    /// `expires_at + grace_ms` when a non-zero grace is given. Duplicate
    /// tags are dropped, preserving first occurrence order. An empty tag
    /// set is rejected.
    pub fn new(
        value: Value,
        tags: Vec<TagPath>,
        created_at: u64,
        ttl_ms: u64,
        grace_ms: Option<u64>,
    ) -> Result<Self, CacheError> {
        if tags.is_empty() {
            return Err(CacheError::Config(
                "a cache entry needs at least one tag".to_string(),
            ));
        }
        let mut deduped: Vec<TagPath> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !deduped.contains(&tag) {
                deduped.push(tag);
            }
        }
        let expires_at = created_at.saturating_add(ttl_ms);
        let grace_until = grace_ms
            .filter(|g| *g > 0)
            .map(|g| expires_at.saturating_add(g));
        Ok(Self {
            value,
            tags: deduped,
            created_at,
            expires_at,
            grace_until,
        })
    }

    /// True when the grace window is set and still open at `now_ms`.
    #[must_use]
    pub fn is_within_grace(&self, now_ms: u64) -> bool {
        self.grace_until.map_or(false, |g| g > now_ms)
    }

    /// The moment past which no reader will ever return this entry:
    /// `grace_until` when grace is set, `expires_at` otherwise. Backends
    /// may use this to expire entries passively.
    #[must_use]
    pub fn retention_deadline(&self) -> u64 {
        self.grace_until.unwrap_or(self.expires_at)
    }
}
