use std::time::Duration;

use super::{CacheError, CorrelationStore};
use crate::models::OrderEnvelope;

/// Correlation store shared across instances. Expiry is delegated to Redis.
#[derive(Clone)]
pub struct RedisCorrelationStore {
    client: redis::Client,
    namespace: String,
    ttl: Duration,
}

impl RedisCorrelationStore {
    pub fn new(redis_url: &str, namespace: String, ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            namespace,
            ttl,
        })
    }

    fn key(&self, session_key: &str) -> String {
        format!("{}:{}", self.namespace, session_key)
    }
}

#[async_trait::async_trait]
impl CorrelationStore for RedisCorrelationStore {
    async fn put(&self, session_key: &str, envelope: &OrderEnvelope) -> Result<(), CacheError> {
        let value = serde_json::to_string(envelope)?;
        let mut conn = self.client.get_async_connection().await?;
        redis::cmd("SET")
            .arg(self.key(session_key))
            .arg(value)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, session_key: &str) -> Result<Option<OrderEnvelope>, CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(session_key))
            .query_async(&mut conn)
            .await?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(CacheError::from)
    }

    async fn delete(&self, session_key: &str) -> Result<(), CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        redis::cmd("DEL")
            .arg(self.key(session_key))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn sweep(&self) -> Result<usize, CacheError> {
        Ok(0)
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
