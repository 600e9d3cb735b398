//! Remote KV storage backend over HTTP.
//!
//! Talks to a cache server exposing a small JSON API: entries and tag
//! timestamps as resources addressed by query parameter, plus the
//! verification reporting channel at `POST /v1/verify`. The server owns
//! entry lifetime; this client never interprets TTLs.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | entry read | `GET /v1/entry?key=...` (404 on absence) |
//! | entry write | `PUT /v1/entry?key=...` JSON body |
//! | entry delete | `DELETE /v1/entry?key=...` |
//! | tag read | `GET /v1/tag?tag=...` (404 on absence) |
//! | tag write | `PUT /v1/tag?tag=...` JSON `{"timestamp": ms}` |
//! | clear | `POST /v1/clear` |
//! | verification | `POST /v1/verify` JSON report |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::error::CacheError;

use super::traits::{Storage, VerificationReport};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tag timestamp wire form.
#[derive(Debug, Serialize, Deserialize)]
struct TagStamp {
    timestamp: u64,
}

pub struct RemoteStorage {
    client: Client,
    base_url: String,
}

impl RemoteStorage {
    /// Point the backend at a cache server, e.g. `http://cache.internal:7700`.
    pub fn new(base_url: &str) -> Result<Self, CacheError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use a preconfigured HTTP client (custom timeouts, TLS, headers).
    #[must_use]
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let response = self
            .client
            .get(self.url("/v1/entry"))
            .query(&[("key", key)])
            .send()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        response
            .json::<CacheEntry>()
            .await
            .map(Some)
            .map_err(|e| CacheError::Codec(e.to_string()))
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        self.client
            .put(self.url("/v1/entry"))
            .query(&[("key", key)])
            .json(entry)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let response = self
            .client
            .delete(self.url("/v1/entry"))
            .query(&[("key", key)])
            .send()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        // Deleting a missing key is not an error.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_tag_invalidation(&self, serialized_tag: &str) -> Result<Option<u64>, CacheError> {
        let response = self
            .client
            .get(self.url("/v1/tag"))
            .query(&[("tag", serialized_tag)])
            .send()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        response
            .json::<TagStamp>()
            .await
            .map(|stamp| Some(stamp.timestamp))
            .map_err(|e| CacheError::Codec(e.to_string()))
    }

    async fn set_tag_invalidation(
        &self,
        serialized_tag: &str,
        at_ms: u64,
    ) -> Result<(), CacheError> {
        self.client
            .put(self.url("/v1/tag"))
            .query(&[("tag", serialized_tag)])
            .json(&TagStamp { timestamp: at_ms })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.client
            .post(self.url("/v1/clear"))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn supports_verification(&self) -> bool {
        true
    }

    async fn report_verification(&self, report: &VerificationReport) -> Result<(), CacheError> {
        self.client
            .post(self.url("/v1/verify"))
            .json(report)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_trimmed() {
        let storage = RemoteStorage::new("http://cache.internal:7700/").unwrap();
        assert_eq!(storage.url("/v1/verify"), "http://cache.internal:7700/v1/verify");

        let storage = RemoteStorage::new("http://cache.internal:7700").unwrap();
        assert_eq!(storage.url("/v1/entry"), "http://cache.internal:7700/v1/entry");
    }

    #[test]
    fn test_remote_backend_reports_verification_capability() {
        let storage = RemoteStorage::new("http://localhost:7700").unwrap();
        assert!(storage.supports_verification());
    }

    #[test]
    fn test_tag_stamp_wire_form() {
        let stamp = TagStamp { timestamp: 1_700_000_000_000 };
        let json = serde_json::to_value(&stamp).unwrap();
        assert_eq!(json, serde_json::json!({"timestamp": 1_700_000_000_000u64}));
    }
}
