pub mod result;
pub mod session;

use crate::config::CacheConfig;
use crate::query::service::QueryResponse;
use result::ResultCache;
use session::SessionStore;
use std::sync::Arc;
use tracing::info;

/// The process-wide caches, built once at start-up and handed to request
/// handlers through the application state. Tests build their own.
pub struct CacheRegistry {
    pub sessions: SessionStore,
    pub results: ResultCache<Arc<QueryResponse>>,
}

impl CacheRegistry {
    pub fn new(config: &CacheConfig) -> Self {
        info!(
            "Initializing caches: sessions ttl={}s cap={}, results ttl={}s cap={}",
            config.session_ttl_secs,
            config.session_capacity,
            config.result_ttl_secs,
            config.result_capacity
        );
        Self {
            sessions: SessionStore::new(config.session_ttl(), config.session_capacity),
            results: ResultCache::new(config.result_ttl(), config.result_capacity),
        }
    }
}
