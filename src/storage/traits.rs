use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::error::CacheError;

/// Outcome of a sampled verification, reported to backends that support
/// the optional reporting channel.
///
/// Backends shipping this over HTTP POST it to `/v1/verify` as JSON with
/// camelCase field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// The fully-prefixed cache key, as used for `get`/`set`.
    pub key: String,
    /// Whether the cached and fresh hashes differ.
    pub is_stale: bool,
    /// Stable hash of the cached value (8 hex digits).
    pub cached_hash: String,
    /// Stable hash of the freshly loaded value (8 hex digits).
    pub fresh_hash: String,
    /// When the verification ran (ms).
    pub timestamp: u64,
}

/// Abstract key/value store with a side channel for per-tag invalidation
/// timestamps.
///
/// All calls are fallible; the engine's failure semantics decide which
/// errors are swallowed (background paths) and which propagate
/// (synchronous paths). Implementations must be thread-safe; the engine
/// does not lock around them.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read an entry by its prefixed cache key.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Write an entry, replacing any previous one under the key.
    ///
    /// Implementations may use the entry's retention deadline
    /// (`grace_until`, or `expires_at` when grace is absent) as a backend
    /// TTL so dead entries drop out passively.
    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Delete an entry. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Read the invalidation timestamp for a serialized tag. Absence
    /// means "never invalidated".
    async fn get_tag_invalidation(&self, serialized_tag: &str) -> Result<Option<u64>, CacheError>;

    /// Write the invalidation timestamp for a serialized tag. Later
    /// writes win. Tag keys are not additionally prefixed by the engine;
    /// any further namespacing is the backend's business.
    async fn set_tag_invalidation(&self, serialized_tag: &str, at_ms: u64)
        -> Result<(), CacheError>;

    /// Remove all entries and all tag timestamps under this backend's
    /// namespace.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Release backend resources. The engine makes no further calls after
    /// a successful disconnect.
    async fn disconnect(&self) -> Result<(), CacheError>;

    /// Whether this backend accepts verification reports. Probed once at
    /// engine construction.
    fn supports_verification(&self) -> bool {
        false
    }

    /// Deliver a verification report. Only called when
    /// [`supports_verification`](Self::supports_verification) is true.
    async fn report_verification(&self, report: &VerificationReport) -> Result<(), CacheError> {
        let _ = report;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_wire_format_is_camel_case() {
        let report = VerificationReport {
            key: "qc:getUser".to_string(),
            is_stale: true,
            cached_hash: "7c9b6140".to_string(),
            fresh_hash: "00000000".to_string(),
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["key"], "qc:getUser");
        assert_eq!(json["isStale"], true);
        assert_eq!(json["cachedHash"], "7c9b6140");
        assert_eq!(json["freshHash"], "00000000");
        assert_eq!(json["timestamp"], 1_700_000_000_000u64);
    }
}
