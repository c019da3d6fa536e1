//! Redis-backed persistent store.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

use super::PersistentStore;
use crate::error::StoreError;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Store over a multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Opens a multiplexed connection to `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis persistent tier");
        Ok(Self { conn })
    }
}

#[async_trait]
impl PersistentStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_seconds).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn dbsize(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let size: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
