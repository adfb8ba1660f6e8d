// Correlation store: short-lived order data keyed by checkout session id

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::models::OrderEnvelope;

pub mod correlation_store;
pub mod redis_store;

pub use correlation_store::InMemoryCorrelationStore;
pub use redis_store::RedisCorrelationStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
}

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Out-of-band channel for order data that cannot ride in processor metadata.
///
/// Entries are logically invisible once older than the store's TTL, whether or
/// not they have been physically evicted yet.
#[async_trait::async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Overwrites any entry for `session_key` and restarts its TTL.
    async fn put(&self, session_key: &str, envelope: &OrderEnvelope) -> Result<(), CacheError>;
    async fn get(&self, session_key: &str) -> Result<Option<OrderEnvelope>, CacheError>;
    async fn delete(&self, session_key: &str) -> Result<(), CacheError>;
    /// Drops expired entries; returns how many were removed.
    async fn sweep(&self) -> Result<usize, CacheError>;
    fn ttl(&self) -> Duration;
    fn backend_name(&self) -> &'static str;
}

/// Builds the configured correlation store backend, falling back to in-memory.
pub fn build_correlation_store(config: &AppConfig) -> Arc<dyn CorrelationStore> {
    let ttl = config.correlation_ttl();
    match config.correlation_store_backend.to_ascii_lowercase().as_str() {
        "redis" => match RedisCorrelationStore::new(
            &config.redis_url,
            config.correlation_namespace.clone(),
            ttl,
        ) {
            Ok(store) => {
                info!(namespace = %config.correlation_namespace, "Using Redis correlation store");
                Arc::new(store)
            }
            Err(e) => {
                error!(
                    "Failed to initialise Redis correlation store, falling back to in-memory: {}",
                    e
                );
                Arc::new(InMemoryCorrelationStore::new(ttl))
            }
        },
        _ => {
            info!(ttl_secs = ttl.as_secs(), "Using in-memory correlation store");
            Arc::new(InMemoryCorrelationStore::new(ttl))
        }
    }
}

/// Spawns the periodic expiry sweep.
pub fn spawn_sweeper(store: Arc<dyn CorrelationStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.sweep().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Swept expired correlation entries"),
                Err(e) => warn!("Correlation sweep failed: {}", e),
            }
        }
    })
}
