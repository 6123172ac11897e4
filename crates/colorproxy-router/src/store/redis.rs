use super::{KvStore, StoreError, StoreResult};
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Longest lease handed to Redis; larger `PX` values overflow its clock
const MAX_EXPIRY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `PX` argument for `ttl`: at least 1 ms, at most [`MAX_EXPIRY`]
fn expiry_millis(ttl: Duration) -> u64 {
    // PX rejects zero
    ttl.min(MAX_EXPIRY).as_millis().max(1) as u64
}

/// Redis-backed store shared by every proxy instance pointing at the same server
///
/// Entry expiry is delegated to Redis (`SET .. PX`).
pub struct RedisKvStore {
    conn: ConnectionManager,
    closed: AtomicBool,
}

impl RedisKvStore {
    /// Connect and verify the server answers `PING`
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = ::redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;

        let pong: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        debug!(reply = %pong, "Redis ping");
        info!("Connected to Redis route store");

        Ok(Self {
            conn,
            closed: AtomicBool::new(false),
        })
    }

    fn connection(&self) -> StoreResult<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.conn.clone())
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let millis = expiry_millis(ttl);

        let _: () = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection()?;
        let value: Option<String> = ::redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.connection()?;
        let keys: Vec<String> = ::redis::cmd("KEYS")
            .arg(format!("{}*", prefix))
            .query_async(&mut conn)
            .await?;
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let _: i64 = ::redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        // The connection manager closes once the last clone is dropped
        self.closed.store(true, Ordering::Release);
        info!("Redis route store closed");
        Ok(())
    }
}
