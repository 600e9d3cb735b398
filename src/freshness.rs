// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Freshness evaluation.
//!
//! Given an entry and "now", an entry classifies as fresh, in-grace, or
//! expired. Tag invalidation is consulted first: a timestamp at the
//! entry's exact-sentinel channel or at any prefix of any of its tags,
//! written at or after the entry's creation, forces the entry to
//! expired regardless of its TTL window.
//!
//! The query path and the primitives façade share this one
//! implementation, so the two can never disagree on what "stale" means.

use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::storage::Storage;

/// TTL/grace state of an entry at a point in time.
///
/// Absent writes, a given entry only moves forward through these states
/// as time increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Freshness {
    /// Within the TTL window and not tag-invalidated.
    Fresh,
    /// Past TTL but within the grace window; serve stale, refresh behind.
    InGrace,
    /// Unusable: past grace, or tag-invalidated.
    Expired,
}

/// Full classification of an entry: its state plus whether a tag write
/// forced it there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub freshness: Freshness,
    /// True when a tag invalidation (not the clock) expired the entry.
    /// Such an entry is still a candidate for the loader-failure grace
    /// fallback.
    pub tag_invalidated: bool,
}

/// Classify an entry at `now_ms`, consulting the backend's per-tag
/// invalidation timestamps.
pub async fn classify(
    storage: &dyn Storage,
    entry: &CacheEntry,
    now_ms: u64,
) -> Result<Classification, CacheError> {
    if is_tag_invalidated(storage, entry).await? {
        return Ok(Classification {
            freshness: Freshness::Expired,
            tag_invalidated: true,
        });
    }
    Ok(Classification {
        freshness: freshness_at(entry, now_ms),
        tag_invalidated: false,
    })
}

/// Pure TTL/grace classification, ignoring tags.
#[must_use]
pub fn freshness_at(entry: &CacheEntry, now_ms: u64) -> Freshness {
    if entry.expires_at > now_ms {
        Freshness::Fresh
    } else if entry.is_within_grace(now_ms) {
        Freshness::InGrace
    } else {
        Freshness::Expired
    }
}

/// Whether any tag write has invalidated the entry.
///
/// For each tag `T`: the exact-sentinel channel `T ++ ["__exact__"]` is
/// checked first, then every non-empty prefix of `T` (including `T`
/// itself). A timestamp equal to `created_at` invalidates; same-
/// millisecond writes must not be missed.
pub async fn is_tag_invalidated(
    storage: &dyn Storage,
    entry: &CacheEntry,
) -> Result<bool, CacheError> {
    for tag in &entry.tags {
        let exact = tag.with_exact_sentinel();
        if stamped_since(storage, &exact.serialize(), entry.created_at).await? {
            return Ok(true);
        }
        for len in 1..=tag.len() {
            if let Some(prefix) = tag.prefix(len) {
                if stamped_since(storage, &prefix.serialize(), entry.created_at).await? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

async fn stamped_since(
    storage: &dyn Storage,
    serialized_tag: &str,
    created_at: u64,
) -> Result<bool, CacheError> {
    Ok(storage
        .get_tag_invalidation(serialized_tag)
        .await?
        .map_or(false, |stamp| stamp >= created_at))
}
