use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::session::QuerySession;
use crate::db::schema_manager::TableCatalog;
use crate::query::guard::GuardViolation;
use crate::query::service::{QueryRequest, QueryResponse};
use crate::query::QueryError;
use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct SchemaInfo {
    pub database: String,
    pub tables: TableCatalog,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub database_count: usize,
    pub live_sessions: u64,
    pub cached_results: u64,
    pub schema_refreshed_at: chrono::DateTime<chrono::Utc>,
    pub default_database: Option<String>,
    pub llm_backend: String,
    pub llm_model: String,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

fn error_kind(err: &QueryError) -> &'static str {
    match err {
        QueryError::GuardRejected(GuardViolation::UnknownTables(_)) => "UnknownTables",
        QueryError::GuardRejected(GuardViolation::ForbiddenOperation(_)) => "ForbiddenOperation",
        QueryError::GuardRejected(_) => "GuardRejected",
        QueryError::SessionNotFound(_) => "SessionNotFound",
        QueryError::PagingWithoutSession => "PagingWithoutSession",
        QueryError::InvalidPagingParameters(_) => "InvalidPagingParameters",
        QueryError::MissingQuestion => "MissingQuestion",
        QueryError::InvalidRequest(_) => "InvalidRequest",
        QueryError::Execution(_) => "ExecutionError",
        QueryError::DatabaseNotFound(_) => "DatabaseNotFound",
        QueryError::ContextMissing(_) => "ContextMissing",
        QueryError::GenerationFailed(_) => "GenerationFailed",
        QueryError::GenerationTimeout(_) => "GenerationTimeout",
        QueryError::Internal(_) => "InternalError",
    }
}

pub fn status_for(err: &QueryError) -> StatusCode {
    match err {
        QueryError::GuardRejected(_)
        | QueryError::PagingWithoutSession
        | QueryError::InvalidPagingParameters(_)
        | QueryError::MissingQuestion
        | QueryError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        QueryError::SessionNotFound(_) | QueryError::DatabaseNotFound(_) => StatusCode::NOT_FOUND,
        QueryError::Execution(_) => StatusCode::UNPROCESSABLE_ENTITY,
        QueryError::ContextMissing(_) => StatusCode::FAILED_DEPENDENCY,
        QueryError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
        QueryError::GenerationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected ({}): {}", status, self);
        }

        let body = json!({
            "error": self.to_string(),
            "kind": error_kind(&self),
        });
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for QueryError {
    fn from(rejection: JsonRejection) -> Self {
        QueryError::InvalidRequest(rejection.body_text())
    }
}

// Natural language query
pub async fn query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, QueryError> {
    let Json(request) = payload?;
    debug!(
        "Query: page={:?} session={:?} question='{}'",
        request.page, request.session_id, request.question
    );
    let response = state.query_service.answer(&request).await?;
    Ok(Json(response))
}

pub async fn list_databases(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, QueryError> {
    let databases = state.query_service.pools.list_databases()?;
    Ok(Json(databases))
}

pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    Path(database): Path<String>,
) -> Result<Json<SchemaInfo>, QueryError> {
    if !state.query_service.pools.exists(&database) {
        return Err(QueryError::DatabaseNotFound(database));
    }
    let catalog = state.query_service.schema_manager.catalog(&database).await?;
    Ok(Json(SchemaInfo {
        database,
        tables: TableCatalog::clone(&catalog),
    }))
}

pub async fn refresh_schema(State(state): State<Arc<AppState>>) -> StatusCode {
    state.query_service.schema_manager.refresh_cache().await;
    StatusCode::NO_CONTENT
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<QuerySession>, QueryError> {
    let session = state.query_service.session(&session_id)?;
    Ok(Json(QuerySession::clone(&session)))
}

pub async fn export_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Response, QueryError> {
    let csv = state.query_service.export_session_csv(&session_id).await?;
    info!("Serving CSV export for session {} ({} bytes)", session_id, csv.len());

    let disposition = format!("attachment; filename=\"query-{}.csv\"", session_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

// System status
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds();

    let service = &state.query_service;
    let database_count = match service.pools.list_databases() {
        Ok(databases) => databases.len(),
        Err(e) => {
            warn!("Failed to list databases for status: {}", e);
            0
        }
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        database_count,
        live_sessions: service.caches.sessions.len(),
        cached_results: service.caches.results.len(),
        schema_refreshed_at: service.schema_manager.last_refresh().await,
        default_database: state.config.database.default_database.clone(),
        llm_backend: state.config.llm.backend.clone(),
        llm_model: state.config.llm.model.clone(),
        default_page_size: state.config.paging.default_page_size,
        max_page_size: state.config.paging.max_page_size,
    })
}
