//! Tag paths.
//!
//! A [`TagPath`] is an ordered sequence of string segments naming a data
//! dependency, e.g. `["posts", "42", "comments"]`. Invalidation is
//! hierarchical: writing a timestamp at a path invalidates every entry
//! tagged with any extension of it, unless the write is confined with the
//! exact sentinel.
//!
//! # Example
//!
//! ```
//! use tagcache::TagPath;
//!
//! let post = TagPath::new(["posts", "42"]).unwrap();
//! let comments = TagPath::new(["posts", "42", "comments"]).unwrap();
//!
//! assert!(post.is_prefix_of(&comments));
//! assert_eq!(TagPath::deserialize(&post.serialize()).unwrap(), post);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Segment appended to a path to confine an invalidation to exactly that
/// path. Fixed for wire compatibility with existing stored timestamps.
pub const EXACT_SENTINEL: &str = "__exact__";

/// An ordered sequence of string segments naming a data dependency.
///
/// Two equal sequences are the same tag. Paths always have at least one
/// segment; individual segments may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagPath {
    segments: Vec<String>,
}

impl TagPath {
    /// Build a path from its segments. Rejects zero-segment paths, which
    /// would break the injectivity of [`serialize`](Self::serialize).
    pub fn new<I, S>(segments: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(CacheError::Config(
                "a tag path needs at least one segment".to_string(),
            ));
        }
        Ok(Self { segments })
    }

    /// The path's segments, in order.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments. Always at least 1.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false: zero-segment paths are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True iff `self` is a prefix of `other` (including `self == other`).
    #[must_use]
    pub fn is_prefix_of(&self, other: &TagPath) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// The path truncated to its first `len` segments (`1 ..= self.len()`).
    ///
    /// Returns `None` when `len` is 0 or exceeds the path length.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Option<TagPath> {
        if len == 0 || len > self.segments.len() {
            return None;
        }
        Some(Self {
            segments: self.segments[..len].to_vec(),
        })
    }

    /// The path extended by one segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> TagPath {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// The path with [`EXACT_SENTINEL`] appended, addressing the
    /// exact-only invalidation channel for this path.
    #[must_use]
    pub fn with_exact_sentinel(&self) -> TagPath {
        self.child(EXACT_SENTINEL)
    }

    /// Canonical string form used as the storage side-channel key.
    ///
    /// Segments are joined with `:` after backslash-escaping `\` and `:`
    /// within each segment, which keeps the encoding injective over paths.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.segments.iter().map(|s| s.len() + 1).sum());
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push(':');
            }
            for ch in segment.chars() {
                if ch == '\\' || ch == ':' {
                    out.push('\\');
                }
                out.push(ch);
            }
        }
        out
    }

    /// Inverse of [`serialize`](Self::serialize).
    ///
    /// Rejects a dangling escape (a trailing `\` with nothing after it);
    /// any other input decodes to the unique path that serializes to it.
    pub fn deserialize(raw: &str) -> Result<TagPath, CacheError> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(CacheError::Codec(format!(
                            "malformed serialized tag (dangling escape): {raw:?}"
                        )))
                    }
                },
                ':' => segments.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            }
        }
        segments.push(current);
        Ok(Self { segments })
    }
}

impl std::fmt::Display for TagPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serialize())
    }
}
