use crate::cache::CacheRegistry;
use crate::config::AppConfig;
use crate::db::multi_db_pool::MultiDbPool;
use crate::llm::LlmManager;
use crate::query::service::QueryService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub query_service: QueryService,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, llm_manager: LlmManager) -> Self {
        let data_dir = PathBuf::from(&config.database.data_dir);
        info!(
            "Serving databases from {} (pool size {})",
            data_dir.display(),
            config.database.pool_size
        );

        let pools = Arc::new(MultiDbPool::new(data_dir, config.database.pool_size));
        let caches = CacheRegistry::new(&config.cache);
        let query_service = QueryService::new(
            pools,
            llm_manager,
            caches,
            config.paging.clone(),
            config.database.default_database.clone(),
        );

        Self::with_service(config, query_service)
    }

    pub fn with_service(config: AppConfig, query_service: QueryService) -> Self {
        Self {
            config,
            query_service,
            startup_time: chrono::Utc::now(),
        }
    }
}
