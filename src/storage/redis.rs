//! Redis storage backend.
//!
//! Entries are stored as JSON strings under the engine's prefixed cache
//! key, inside a backend namespace. The retention deadline (`grace_until`,
//! or `expires_at` when grace is absent) becomes a `PX` TTL so dead
//! entries drop out passively. Tag timestamps are plain integer keys in a
//! `tag:` sub-namespace, never expired by this backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::warn;

use crate::entry::CacheEntry;
use crate::error::CacheError;

use super::traits::Storage;

/// Default key namespace. Keeps `clear` from touching keys owned by
/// other applications sharing the instance.
const DEFAULT_NAMESPACE: &str = "tagcache:";

const CONNECT_ATTEMPTS: usize = 5;
const CONNECT_INITIAL_DELAY: Duration = Duration::from_millis(200);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(2);

pub struct RedisStorage {
    connection: ConnectionManager,
    namespace: String,
}

impl RedisStorage {
    /// Connect with the default namespace.
    pub async fn new(connection_string: &str) -> Result<Self, CacheError> {
        Self::with_namespace(connection_string, DEFAULT_NAMESPACE).await
    }

    /// Connect with a custom namespace prepended to every key this
    /// backend writes.
    pub async fn with_namespace(
        connection_string: &str,
        namespace: &str,
    ) -> Result<Self, CacheError> {
        let client =
            Client::open(connection_string).map_err(|e| CacheError::Backend(e.to_string()))?;
        let connection = Self::connect(&client).await?;
        Ok(Self {
            connection,
            namespace: namespace.to_string(),
        })
    }

    /// Fail-fast connect: a handful of attempts with exponential backoff,
    /// so a bad URL surfaces in seconds instead of hanging.
    async fn connect(client: &Client) -> Result<ConnectionManager, CacheError> {
        let mut delay = CONNECT_INITIAL_DELAY;
        let mut last_err = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match ConnectionManager::new(client.clone()).await {
                Ok(connection) => return Ok(connection),
                Err(err) => {
                    warn!(attempt, error = %err, "redis connect failed");
                    last_err = Some(err);
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(CONNECT_MAX_DELAY);
                    }
                }
            }
        }
        Err(CacheError::Backend(
            last_err.map_or_else(|| "redis connect failed".to_string(), |e| e.to_string()),
        ))
    }

    fn entry_key(&self, key: &str) -> String {
        entry_key(&self.namespace, key)
    }

    fn tag_key(&self, serialized_tag: &str) -> String {
        tag_key(&self.namespace, serialized_tag)
    }

    fn wall_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut con = self.connection.clone();
        let raw: Option<String> = con
            .get(self.entry_key(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CacheError::Codec(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let payload =
            serde_json::to_string(entry).map_err(|e| CacheError::Codec(e.to_string()))?;
        let ttl_ms = entry.retention_deadline().saturating_sub(Self::wall_ms());

        let mut con = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.entry_key(key)).arg(payload);
        if ttl_ms > 0 {
            cmd.arg("PX").arg(ttl_ms);
        }
        let _: () = cmd
            .query_async(&mut con)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        let _: () = con
            .del(self.entry_key(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_tag_invalidation(&self, serialized_tag: &str) -> Result<Option<u64>, CacheError> {
        let mut con = self.connection.clone();
        con.get(self.tag_key(serialized_tag))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set_tag_invalidation(
        &self,
        serialized_tag: &str,
        at_ms: u64,
    ) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        let _: () = con
            .set(self.tag_key(serialized_tag), at_ms)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut scan_con = self.connection.clone();
        let pattern = format!("{}*", self.namespace);
        let keys: Vec<String> = {
            let mut iter: redis::AsyncIter<String> = scan_con
                .scan_match(pattern)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if !keys.is_empty() {
            let mut con = self.connection.clone();
            let _: () = con
                .del(keys)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CacheError> {
        // ConnectionManager closes with its last clone; nothing to tear
        // down eagerly.
        Ok(())
    }
}

fn entry_key(namespace: &str, key: &str) -> String {
    format!("{namespace}{key}")
}

fn tag_key(namespace: &str, serialized_tag: &str) -> String {
    format!("{namespace}tag:{serialized_tag}")
}
