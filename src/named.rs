// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Named query definitions.
//!
//! A [`NamedQuery`] packages what a query means, once: how its arguments
//! map to a cache key, which tags the result depends on, the loader that
//! produces it, and its TTL/grace policy. Call sites then just
//! [`run`](crate::CacheEngine::run) it with arguments, so key and tag
//! derivation cannot drift between callers.
//!
//! # Example
//!
//! ```rust,no_run
//! use tagcache::{CacheError, NamedQuery, TagPath};
//!
//! # fn demo() -> Result<(), CacheError> {
//! let get_user: NamedQuery<u32, serde_json::Value> = NamedQuery::new(
//!     "getUser",
//!     |id: &u32| id.to_string(),
//!     |id| vec![TagPath::new(["users", &id.to_string()]).unwrap()],
//!     |id| async move { Ok(serde_json::json!({"id": id})) },
//! );
//!
//! assert_eq!(get_user.cache_key(&42), "getUser:42");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::QueryOptions;
use crate::engine::CacheEngine;
use crate::error::CacheError;
use crate::tag::TagPath;

type NamedFuture<T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send>>;

/// A registered query: argument-to-key mapping, argument-to-tags mapping,
/// loader, and policy, under one name.
///
/// The name becomes the leading component of every cache key the query
/// produces, so two definitions with different names never collide.
pub struct NamedQuery<A, T> {
    name: String,
    key_fn: Arc<dyn Fn(&A) -> String + Send + Sync>,
    tags_fn: Arc<dyn Fn(&A) -> Vec<TagPath> + Send + Sync>,
    loader: Arc<dyn Fn(A) -> NamedFuture<T> + Send + Sync>,
    options: QueryOptions,
}

impl<A, T> NamedQuery<A, T> {
    pub fn new<K, G, L, Fut>(name: impl Into<String>, key_fn: K, tags_fn: G, loader: L) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
        G: Fn(&A) -> Vec<TagPath> + Send + Sync + 'static,
        L: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            key_fn: Arc::new(key_fn),
            tags_fn: Arc::new(tags_fn),
            loader: Arc::new(move |args| Box::pin(loader(args)) as NamedFuture<T>),
            options: QueryOptions::default(),
        }
    }

    /// Override the engine-default TTL/grace for this query.
    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The user-level cache key for `args`: `"{name}:{key_fn(args)}"`.
    /// The engine prepends its own prefix on top.
    #[must_use]
    pub fn cache_key(&self, args: &A) -> String {
        format!("{}:{}", self.name, (self.key_fn)(args))
    }

    /// The tags this query's result depends on, for `args`.
    #[must_use]
    pub fn tags(&self, args: &A) -> Vec<TagPath> {
        (self.tags_fn)(args)
    }
}

impl<A, T> Clone for NamedQuery<A, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            key_fn: self.key_fn.clone(),
            tags_fn: self.tags_fn.clone(),
            loader: self.loader.clone(),
            options: self.options,
        }
    }
}

impl CacheEngine {
    /// Run a named query for the given arguments.
    ///
    /// Equivalent to [`query_with`](CacheEngine::query_with) with the
    /// definition's derived key, tags, loader, and options.
    pub async fn run<A, T>(&self, query: &NamedQuery<A, T>, args: A) -> Result<T, CacheError>
    where
        A: Clone + Send + Sync + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let key = query.cache_key(&args);
        let tags = query.tags(&args);
        let loader = query.loader.clone();
        self.query_with(&key, tags, move || loader(args.clone()), query.options)
            .await
    }
}
