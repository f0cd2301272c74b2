use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

mod cache;
mod config;
mod db;
mod llm;
mod query;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::llm::LlmManager;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_tracing(&config.logging);

    let data_dir = PathBuf::from(&config.database.data_dir);
    if !data_dir.is_dir() {
        warn!(
            "Data directory {} does not exist; no databases will be available",
            data_dir.display()
        );
    }

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = match LlmManager::new(&config.llm) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to initialize LLM backend: {}", e);
            return Err(e.into());
        }
    };

    let app_state = Arc::new(AppState::new(config.clone(), llm_manager));

    match app_state.query_service.pools.list_databases() {
        Ok(databases) => info!("Found {} databases: {:?}", databases.len(), databases),
        Err(e) => warn!("Failed to scan data directory: {}", e),
    }

    // Start the web server
    info!("Starting text2sql server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
