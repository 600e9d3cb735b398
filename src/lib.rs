//! # tagcache
//!
//! A declarative, tag-indexed result cache. Callers register named
//! queries; each query maps to a deterministic cache key, a set of
//! hierarchical *tags* naming the data the result depends on, and a
//! loader that produces the value on miss. Invalidation is declared
//! against tag paths; the cache decides which stored entries go stale.
//!
//! ## Control flow
//!
//! ```text
//!                          query(key, tags, loader)
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Stampede Coalescer                      │
//! │  • One in-flight load per cache key, per process            │
//! │  • Joiners share the leader's value or error                │
//! └─────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Freshness Evaluator                      │
//! │  • Tag invalidation timestamps consulted first              │
//! │  • Then TTL window, then grace window                       │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                      │
//!        FRESH             IN_GRACE            EXPIRED/absent
//!          │                  │                      │
//!          ▼                  ▼                      ▼
//!   return value     return stale value      run loader, store,
//!   (maybe sample    + background refresh    return (stale value
//!    verification)                            if loader fails
//!                                             within grace)
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tagcache::{CacheConfig, CacheEngine, InMemoryStorage, TagPath};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tagcache::CacheError> {
//!     let engine = CacheEngine::new(
//!         Arc::new(InMemoryStorage::new()),
//!         CacheConfig::default(),
//!     )?;
//!
//!     let comments: serde_json::Value = engine
//!         .query(
//!             "getComments:42",
//!             vec![TagPath::new(["posts", "42", "comments"])?],
//!             || async { Ok(serde_json::json!([{"id": 7, "body": "hi"}])) },
//!         )
//!         .await?;
//!     println!("{comments}");
//!
//!     // A post was edited: every entry under posts/42 goes stale.
//!     engine.invalidate(&[TagPath::new(["posts", "42"])?]).await?;
//!
//!     engine.disconnect().await
//! }
//! ```
//!
//! ## Features
//!
//! - **Hierarchical invalidation**: invalidating `posts/1` hits every
//!   entry tagged under it; the exact sentinel confines a write to one
//!   path.
//! - **Stale-while-revalidate**: entries past TTL but within grace are
//!   served immediately while a detached refresh replaces them.
//! - **Stampede protection**: concurrent identical queries collapse to a
//!   single loader run per process.
//! - **Grace fallback**: a failing loader is suppressed while a usable
//!   stale entry exists.
//! - **Sampled verification**: a fraction of fresh hits re-runs the
//!   loader in the background and reports hash divergence to the backend.
//! - **Pluggable storage**: in-memory and Redis backends included;
//!   anything implementing [`Storage`] works.
//!
//! ## Modules
//!
//! - [`engine`]: the [`CacheEngine`] orchestrator
//! - [`storage`]: the [`Storage`] contract and backends
//! - [`schema`]: declarative tag-tree construction
//! - [`tag`], [`entry`], [`freshness`]: the value types and the TTL/grace
//!   state machine

pub mod clock;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod freshness;
pub mod hash;
pub mod metrics;
pub mod named;
pub mod schema;
pub mod storage;
pub mod tag;

mod coalescer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, DurationMs, QueryOptions};
pub use engine::CacheEngine;
pub use entry::CacheEntry;
pub use error::CacheError;
pub use freshness::{Classification, Freshness};
pub use hash::stable_hash;
pub use named::NamedQuery;
pub use schema::{at, wild, TagTree};
pub use storage::{InMemoryStorage, RedisStorage, RemoteStorage, Storage, VerificationReport};
pub use tag::{TagPath, EXACT_SENTINEL};
