use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::entry::CacheEntry;
use crate::error::CacheError;

use super::traits::{Storage, VerificationReport};

/// In-process storage backend.
///
/// Entries and tag timestamps live in concurrent maps. Entries past their
/// retention deadline are dropped passively when a reader observes them.
/// Eviction beyond that is not this backend's concern.
pub struct InMemoryStorage {
    entries: DashMap<String, CacheEntry>,
    tag_stamps: DashMap<String, u64>,
    clock: Arc<dyn Clock>,
    verification_log: Option<Mutex<Vec<VerificationReport>>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use an injected clock for passive expiry. Pass the same clock as
    /// the engine when driving time manually.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            tag_stamps: DashMap::new(),
            clock,
            verification_log: None,
        }
    }

    /// Turn on the verification reporting channel. Reports are kept
    /// in-process and readable via
    /// [`verification_reports`](Self::verification_reports).
    #[must_use]
    pub fn with_verification_log(mut self) -> Self {
        self.verification_log = Some(Mutex::new(Vec::new()));
        self
    }

    /// Reports received so far, oldest first. Empty when the reporting
    /// channel is off.
    #[must_use]
    pub fn verification_reports(&self) -> Vec<VerificationReport> {
        self.verification_log
            .as_ref()
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }

    /// Current entry count (live and not-yet-observed dead entries).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let now = self.clock.now_ms();
        if let Some(entry) = self.entries.get(key) {
            if entry.retention_deadline() > now {
                return Ok(Some(entry.value().clone()));
            }
        } else {
            return Ok(None);
        }
        // Observed past retention: drop it.
        self.entries
            .remove_if(key, |_, entry| entry.retention_deadline() <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn get_tag_invalidation(&self, serialized_tag: &str) -> Result<Option<u64>, CacheError> {
        Ok(self.tag_stamps.get(serialized_tag).map(|stamp| *stamp))
    }

    async fn set_tag_invalidation(
        &self,
        serialized_tag: &str,
        at_ms: u64,
    ) -> Result<(), CacheError> {
        self.tag_stamps.insert(serialized_tag.to_string(), at_ms);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        self.tag_stamps.clear();
        if let Some(log) = &self.verification_log {
            log.lock().clear();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn supports_verification(&self) -> bool {
        self.verification_log.is_some()
    }

    async fn report_verification(&self, report: &VerificationReport) -> Result<(), CacheError> {
        if let Some(log) = &self.verification_log {
            log.lock().push(report.clone());
        }
        Ok(())
    }
}
