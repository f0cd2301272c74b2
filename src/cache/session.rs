use crate::query::pager::normalize_sql;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// A previously accepted base statement, reused verbatim for every page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySession {
    pub session_id: String,
    pub database: String,
    pub sql: String,
    pub question: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Session id -> session, with a fixed time-to-live and bounded size.
/// Sessions are immutable once created; the store only inserts and reads.
pub struct SessionStore {
    sessions: Cache<String, Arc<QuerySession>>,
}

impl SessionStore {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let sessions = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { sessions }
    }

    /// Stores the statement under a fresh random 128-bit id.
    pub fn create_session(&self, database: &str, sql: &str, question: Option<&str>) -> String {
        let session_id = Uuid::new_v4().simple().to_string();
        let session = QuerySession {
            session_id: session_id.clone(),
            database: database.to_string(),
            sql: normalize_sql(sql),
            question: question.map(str::to_string),
            created_at: chrono::Utc::now(),
        };

        debug!("Created session {} for database '{}'", session_id, database);
        self.sessions.insert(session_id.clone(), Arc::new(session));
        session_id
    }

    /// `None` when the id is unknown, expired or evicted.
    pub fn get_session(&self, session_id: &str) -> Option<Arc<QuerySession>> {
        self.sessions.get(session_id)
    }

    pub fn len(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }
}
