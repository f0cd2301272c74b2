use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Natural-language query, first page or follow-up pages
            .route("/query", post(handlers::api::query))
            // Databases and their schemas
            .route("/databases", get(handlers::api::list_databases))
            .route("/databases/{database}/schema", get(handlers::api::get_schema))
            .route("/schema/refresh", post(handlers::api::refresh_schema))
            // Sessions
            .route("/sessions/{session_id}", get(handlers::api::get_session))
            .route("/sessions/{session_id}/export", get(handlers::api::export_session))
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
