pub mod guard;
pub mod pager;
pub mod plan;
pub mod service;

use crate::db::DbError;
use crate::llm::LlmError;
use guard::GuardViolation;
use std::error::Error;
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum QueryError {
    GuardRejected(GuardViolation),
    SessionNotFound(String),
    PagingWithoutSession,
    InvalidPagingParameters(String),
    MissingQuestion,
    InvalidRequest(String),
    Execution(String),
    DatabaseNotFound(String),
    ContextMissing(String),
    GenerationFailed(String),
    GenerationTimeout(Duration),
    Internal(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::GuardRejected(reason) => write!(f, "SQL rejected: {}", reason),
            QueryError::SessionNotFound(id) => write!(
                f,
                "Query session '{}' not found or expired; please restart from page 1",
                id
            ),
            QueryError::PagingWithoutSession => {
                write!(f, "session_id is required to request pages beyond the first")
            }
            QueryError::InvalidPagingParameters(msg) => write!(f, "Invalid paging parameters: {}", msg),
            QueryError::MissingQuestion => write!(f, "A question is required to start a new query"),
            QueryError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            QueryError::Execution(msg) => write!(f, "SQL execution failed: {}", msg),
            QueryError::DatabaseNotFound(name) => write!(f, "Database '{}' not found", name),
            QueryError::ContextMissing(msg) => write!(f, "Context files missing: {}", msg),
            QueryError::GenerationFailed(msg) => write!(f, "SQL generation failed: {}", msg),
            QueryError::GenerationTimeout(after) => {
                write!(f, "SQL generation timed out after {}s", after.as_secs())
            }
            QueryError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl Error for QueryError {}

impl From<GuardViolation> for QueryError {
    fn from(reason: GuardViolation) -> Self {
        QueryError::GuardRejected(reason)
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::Execution(err.to_string())
    }
}

impl From<DbError> for QueryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UnknownDatabase(name) | DbError::InvalidName(name) => {
                QueryError::DatabaseNotFound(name)
            }
            DbError::Sqlite(err) => QueryError::Execution(err.to_string()),
            other => QueryError::Internal(other.to_string()),
        }
    }
}

impl From<LlmError> for QueryError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(after) => QueryError::GenerationTimeout(after),
            LlmError::ContextError(msg) => QueryError::ContextMissing(msg),
            other => QueryError::GenerationFailed(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for QueryError {
    fn from(err: tokio::task::JoinError) -> Self {
        QueryError::Internal(format!("background task failed: {}", err))
    }
}
