use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Stable key for a (database, question) pair. Questions differing only in
/// case or surrounding whitespace share a key.
pub fn cache_key(question: &str, database: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(database.as_bytes());
    hasher.update(b":");
    hasher.update(question.trim().to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Short-lived memo of first-page responses, so a repeated question does not
/// go back to the LLM.
pub struct ResultCache<V> {
    entries: Cache<String, V>,
}

impl<V> ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { entries }
    }

    pub fn get_cached(&self, question: &str, database: &str) -> Option<V> {
        self.entries.get(&cache_key(question, database))
    }

    pub fn put_cached(&self, question: &str, database: &str, response: V) {
        self.entries.insert(cache_key(question, database), response);
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}
