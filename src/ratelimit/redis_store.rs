//! Redis-backed counter store.
//!
//! Lets any number of service instances share one consistent view of counts
//! and blocks. Counter keys live under `rate_limit:` and block flags under
//! `blocked:`, both with native Redis expiry.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::store::CounterStore;
use crate::error::{BouncerError, Result};

const COUNTER_PREFIX: &str = "rate_limit";
const BLOCK_PREFIX: &str = "blocked";

/// Increments the counter and refreshes its expiry in one server-side step,
/// so no client can observe the key without a TTL.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return count
";

/// Counter store that talks to a Redis server.
pub struct RedisStore {
    /// `None` once the store has been closed
    connection: RwLock<Option<ConnectionManager>>,
    increment_script: redis::Script,
    /// Upper bound for every round trip
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("open", &self.connection.read().is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis at `url` and verify the connection with `PING`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!(error = %e, "Failed to create Redis client");
            BouncerError::StorageUnavailable(format!("failed to create Redis client: {}", e))
        })?;

        let mut connection = bounded(timeout, ConnectionManager::new(client)).await?;

        bounded(
            timeout,
            redis::cmd("PING").query_async::<String>(&mut connection),
        )
        .await?;

        info!(timeout_ms = timeout.as_millis() as u64, "Connected to Redis");

        Ok(Self {
            connection: RwLock::new(Some(connection)),
            increment_script: redis::Script::new(INCREMENT_SCRIPT),
            timeout,
        })
    }

    /// Build a connection URL from discrete settings.
    pub fn url(host: &str, port: u16, password: &str, db: i64) -> String {
        if password.is_empty() {
            format!("redis://{}:{}/{}", host, port, db)
        } else {
            format!("redis://:{}@{}:{}/{}", password, host, port, db)
        }
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| BouncerError::StorageUnavailable("redis store is closed".to_string()))
    }
}

/// Run a Redis future, failing with `StorageUnavailable` if it outlives `timeout`.
async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(BouncerError::from),
        Err(_) => Err(BouncerError::StorageUnavailable(format!(
            "redis call timed out after {:?}",
            timeout
        ))),
    }
}

fn counter_key(key: &str) -> String {
    format!("{}:{}", COUNTER_PREFIX, key)
}

fn block_key(key: &str) -> String {
    format!("{}:{}", BLOCK_PREFIX, key)
}

/// Expiry argument for `PEXPIRE`/`PX`, which accept 1..=i64::MAX.
fn millis(duration: Duration) -> u64 {
    const MAX_MILLIS: u64 = i64::MAX as u64;
    u64::try_from(duration.as_millis())
        .unwrap_or(MAX_MILLIS)
        .clamp(1, MAX_MILLIS)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        let mut conn = self.connection()?;
        let mut invocation = self.increment_script.key(counter_key(key));
        invocation.arg(millis(window));

        let count: u64 = bounded(self.timeout, invocation.invoke_async(&mut conn)).await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection()?;

        let value: Option<String> = bounded(
            self.timeout,
            redis::cmd("GET")
                .arg(counter_key(key))
                .query_async(&mut conn),
        )
        .await?;

        match value {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                BouncerError::StorageUnavailable(format!(
                    "failed to parse rate limit count {:?}: {}",
                    raw, e
                ))
            }),
            None => Ok(0),
        }
    }

    async fn set_block(&self, key: &str, duration: Duration) -> Result<()> {
        let mut conn = self.connection()?;

        bounded(
            self.timeout,
            redis::cmd("SET")
                .arg(block_key(key))
                .arg(1)
                .arg("PX")
                .arg(millis(duration))
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn is_blocked(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection()?;

        let exists: u64 = bounded(
            self.timeout,
            redis::cmd("EXISTS")
                .arg(block_key(key))
                .query_async(&mut conn),
        )
        .await?;

        Ok(exists > 0)
    }

    async fn close(&self) -> Result<()> {
        if self.connection.write().take().is_some() {
            debug!("Redis store closed");
        }
        Ok(())
    }
}
