//! Redis-backed cache store.

use crate::cache::{CacheError, CacheStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info};

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 200;

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            Self::Connection {
                message: err.to_string(),
            }
        } else {
            Self::Backend {
                message: err.to_string(),
            }
        }
    }
}

/// [`CacheStore`] on top of a Redis server
///
/// Values are written with `SET .. EX`, so expiry is enforced by Redis itself.
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore").finish_non_exhaustive()
    }
}

impl RedisCacheStore {
    /// Connect to a Redis server
    ///
    /// # Errors
    /// Returns `CacheError::Connection` if the URL is invalid or the server is unreachable
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Connection {
            message: e.to_string(),
        })?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Connection {
                message: e.to_string(),
            })?;
        info!("Connected to Redis cache");
        Ok(Self { connection })
    }

    /// Check connectivity
    ///
    /// # Errors
    /// Returns the Redis error if PING fails
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Escape glob metacharacters so a literal prefix can be used in `SCAN MATCH`
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut conn = self.connection.clone();
        let pattern = escape_glob(prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: usize = conn.del(&keys).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix, removed, "Removed cache keys by prefix");
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
