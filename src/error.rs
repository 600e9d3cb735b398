//! Error types for the cache engine.
//!
//! Errors are grouped by cause, not by the component that raised them:
//! configuration problems, storage backend failures, user loader failures,
//! and value encode/decode failures. The engine never converts one kind
//! into another and never retries; coalesced joiners observe the
//! completer's error unchanged, which is why every variant is `Clone`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Invalid configuration: `verify_percent` out of range, malformed
    /// duration string, empty tag set. Raised at construction or first use.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Storage backend failure (read, write, connection). Propagated from
    /// synchronous paths, swallowed from background paths.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The user-supplied loader failed. Recoverable via grace, otherwise
    /// propagated to the caller and all coalesced joiners.
    #[error("loader error: {0}")]
    Loader(String),

    /// A value or tag failed to encode or decode.
    #[error("serialization error: {0}")]
    Codec(String),
}

impl CacheError {
    /// Wrap an arbitrary loader failure.
    pub fn loader(err: impl std::fmt::Display) -> Self {
        Self::Loader(err.to_string())
    }

    /// Wrap an arbitrary backend failure.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}
