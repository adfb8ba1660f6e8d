use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{CacheError, Clock, CorrelationStore, SystemClock};
use crate::models::OrderEnvelope;

#[derive(Clone)]
struct CorrelationEntry {
    envelope: OrderEnvelope,
    created_at: DateTime<Utc>,
}

/// Process-local correlation store. Lost on restart; one copy per instance.
#[derive(Clone)]
pub struct InMemoryCorrelationStore {
    entries: Arc<DashMap<String, CorrelationEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryCorrelationStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            clock,
        }
    }

    /// Physically present entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // Clock skew backwards counts as age zero.
        let age = now
            .signed_duration_since(created_at)
            .to_std()
            .unwrap_or_default();
        age < self.ttl
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| self.is_live(entry.created_at, now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait::async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn put(&self, session_key: &str, envelope: &OrderEnvelope) -> Result<(), CacheError> {
        self.purge_expired();
        self.entries.insert(
            session_key.to_string(),
            CorrelationEntry {
                envelope: envelope.clone(),
                created_at: self.clock.now(),
            },
        );
        Ok(())
    }

    async fn get(&self, session_key: &str) -> Result<Option<OrderEnvelope>, CacheError> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(session_key) {
            if self.is_live(entry.created_at, now) {
                return Ok(Some(entry.envelope.clone()));
            }
        }
        self.entries
            .remove_if(session_key, |_, entry| !self.is_live(entry.created_at, now));
        Ok(None)
    }

    async fn delete(&self, session_key: &str) -> Result<(), CacheError> {
        self.entries.remove(session_key);
        Ok(())
    }

    async fn sweep(&self) -> Result<usize, CacheError> {
        Ok(self.purge_expired())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderFormData;
    use std::sync::Mutex;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, by: chrono::Duration) {
            let mut now = self.0.lock().unwrap();
            *now = *now + by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn envelope(user: &str) -> OrderEnvelope {
        OrderEnvelope::new(
            OrderFormData {
                total_price: 15.0,
                ..Default::default()
            },
            user,
            "buyer@example.com",
        )
    }

    fn store() -> (InMemoryCorrelationStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
        let store = InMemoryCorrelationStore::with_clock(Duration::from_secs(30 * 60), clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn put_overwrites_existing_entry() {
        let (store, _) = store();
        store.put("cs_1", &envelope("first")).await.unwrap();
        store.put("cs_1", &envelope("second")).await.unwrap();
        let found = store.get("cs_1").await.unwrap().unwrap();
        assert_eq!(found.user_id, "second");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_invisible_before_sweep() {
        let (store, clock) = store();
        store.put("cs_1", &envelope("u")).await.unwrap();
        clock.advance(chrono::Duration::minutes(30));
        assert!(store.get("cs_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let (store, clock) = store();
        store.put("old", &envelope("u")).await.unwrap();
        clock.advance(chrono::Duration::minutes(20));
        store.put("fresh", &envelope("u")).await.unwrap();
        clock.advance(chrono::Duration::minutes(15));

        assert_eq!(store.sweep().await.unwrap(), 1);
        assert!(store.get("fresh").await.unwrap().is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn put_sweeps_opportunistically() {
        let (store, clock) = store();
        store.put("old", &envelope("u")).await.unwrap();
        clock.advance(chrono::Duration::minutes(31));
        store.put("new", &envelope("u")).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let (store, _) = store();
        store.put("cs_1", &envelope("u")).await.unwrap();
        store.delete("cs_1").await.unwrap();
        assert!(store.get("cs_1").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
