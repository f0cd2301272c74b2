use crate::cache::session::QuerySession;
use crate::cache::CacheRegistry;
use crate::config::PagingConfig;
use crate::db::db_utils::{column_names, value_to_text, JsonRow};
use crate::db::multi_db_pool::MultiDbPool;
use crate::db::schema_manager::SchemaManager;
use crate::llm::context::load_context_files;
use crate::llm::models::{AmbiguityCheck, GenerationContext, ResultDigest};
use crate::llm::LlmManager;
use crate::query::guard::{enforce_known_tables, enforce_safety};
use crate::query::pager::{execute_paginated, normalize_sql, windowed_statement, PageResult, PagingWindow};
use crate::query::plan::analyze_query_plan;
use crate::query::QueryError;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub question: String,
    pub database: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub question: String,
    pub database: String,
    pub generated_sql: String,
    pub columns: Vec<String>,
    pub results: Vec<JsonRow>,
    pub row_count: usize,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub total_rows: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub session_id: String,
    pub notice: String,
    pub explanation: String,
    pub confidence: f64,
    pub ambiguity_check: Option<AmbiguityCheck>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl QueryResponse {
    fn new(question: &str, session: &QuerySession, page: PageResult) -> Self {
        Self {
            question: question.to_string(),
            database: session.database.clone(),
            generated_sql: session.sql.clone(),
            notice: page.notice(),
            row_count: page.rows.len(),
            columns: page.columns,
            results: page.rows,
            page: page.page,
            page_size: page.page_size,
            total_pages: page.total_pages,
            total_rows: page.total_rows,
            has_next_page: page.has_next_page,
            has_previous_page: page.has_previous_page,
            session_id: session.session_id.clone(),
            explanation: String::new(),
            confidence: 0.0,
            ambiguity_check: None,
            summary: None,
            error: None,
        }
    }
}

const SUMMARY_SAMPLE_ROWS: usize = 3;

/// A first-page request keeps its session only when it asks nothing new.
fn continues(session: &QuerySession, question: &str) -> bool {
    let question = question.trim();
    question.is_empty()
        || session
            .question
            .as_deref()
            .is_some_and(|asked| asked.trim().to_lowercase() == question.to_lowercase())
}

/// Answers questions: generates SQL for new questions, replays session SQL
/// for follow-up pages, and never runs anything the guard has not accepted.
pub struct QueryService {
    pub pools: Arc<MultiDbPool>,
    pub schema_manager: SchemaManager,
    pub caches: CacheRegistry,
    pub llm: LlmManager,
    paging: PagingConfig,
    default_database: Option<String>,
}

impl QueryService {
    pub fn new(
        pools: Arc<MultiDbPool>,
        llm: LlmManager,
        caches: CacheRegistry,
        paging: PagingConfig,
        default_database: Option<String>,
    ) -> Self {
        Self {
            schema_manager: SchemaManager::new(Arc::clone(&pools)),
            pools,
            caches,
            llm,
            paging,
            default_database,
        }
    }

    pub async fn answer(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        let started = Instant::now();
        let window = self.paging_window(request)?;

        let session_id = request
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        if window.page() > 1 && session_id.is_none() {
            return Err(QueryError::PagingWithoutSession);
        }

        let response = match session_id {
            Some(id) => match self.caches.sessions.get_session(id) {
                Some(session) if window.page() > 1 || continues(&session, &request.question) => {
                    self.replay_session(request, &session, window).await?
                }
                Some(_) => {
                    info!("New question on session {}, generating afresh", id);
                    self.answer_question(request, window).await?
                }
                None if window.page() > 1 => return Err(QueryError::SessionNotFound(id.to_string())),
                None => {
                    info!("Session {} expired, generating afresh", id);
                    self.answer_question(request, window).await?
                }
            },
            None => self.answer_question(request, window).await?,
        };

        info!(
            "Answered page {} for '{}' in {}ms ({} of {} rows)",
            response.page,
            response.database,
            started.elapsed().as_millis(),
            response.row_count,
            response.total_rows
        );
        Ok(response)
    }

    fn paging_window(&self, request: &QueryRequest) -> Result<PagingWindow, QueryError> {
        let page_size = request
            .page_size
            .unwrap_or(i64::from(self.paging.default_page_size));
        if page_size > i64::from(self.paging.max_page_size) {
            return Err(QueryError::InvalidPagingParameters(format!(
                "page_size {} exceeds the maximum of {}",
                page_size, self.paging.max_page_size
            )));
        }
        PagingWindow::new(request.page.unwrap_or(1), page_size)
    }

    fn resolve_database(&self, requested: Option<&str>) -> Result<String, QueryError> {
        let database = requested
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or(self.default_database.as_deref())
            .ok_or_else(|| QueryError::DatabaseNotFound("no database selected".to_string()))?;

        if !self.pools.exists(database) {
            return Err(QueryError::DatabaseNotFound(database.to_string()));
        }
        Ok(database.to_string())
    }

    async fn replay_session(
        &self,
        request: &QueryRequest,
        session: &QuerySession,
        window: PagingWindow,
    ) -> Result<QueryResponse, QueryError> {
        if let Some(requested) = request.database.as_deref() {
            if requested != session.database {
                debug!(
                    "Ignoring database '{}' in favour of session database '{}'",
                    requested, session.database
                );
            }
        }

        self.check_sql(&session.database, &session.sql).await?;
        let page = self.run_page(&session.database, &session.sql, window).await?;

        let question = if request.question.trim().is_empty() {
            session.question.clone().unwrap_or_default()
        } else {
            request.question.clone()
        };
        Ok(QueryResponse::new(&question, session, page))
    }

    async fn answer_question(
        &self,
        request: &QueryRequest,
        window: PagingWindow,
    ) -> Result<QueryResponse, QueryError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(QueryError::MissingQuestion);
        }
        let database = self.resolve_database(request.database.as_deref())?;

        if let Some(cached) = self.caches.results.get_cached(question, &database) {
            debug!("Result cache hit for '{}' on '{}'", question, database);
            return self.from_cache(&cached, window).await;
        }

        let context = self.generation_context(&database).await?;
        let interpretation = self.llm.interpret(question, &context).await;
        let generation = interpretation.generation?;

        let sql = generation.sql.ok_or_else(|| {
            QueryError::GenerationFailed(if generation.explanation.is_empty() {
                "the model returned no SQL".to_string()
            } else {
                generation.explanation.clone()
            })
        })?;
        info!(
            "Generated SQL for '{}' (confidence {:.2}): {}",
            database, generation.confidence, sql
        );

        self.check_sql(&database, &sql).await?;
        let sql = normalize_sql(&sql);

        let session_id = self.caches.sessions.create_session(&database, &sql, Some(question));
        let session = self
            .caches
            .sessions
            .get_session(&session_id)
            .ok_or_else(|| QueryError::Internal("session vanished right after creation".to_string()))?;

        let page = self.run_page(&database, &sql, window).await?;
        let summary = self.summarize(question, &sql, &page).await;

        let mut response = QueryResponse::new(question, &session, page);
        response.explanation = generation.explanation;
        response.confidence = generation.confidence;
        response.ambiguity_check = interpretation.ambiguity.ok();
        response.summary = summary;

        self.caches
            .results
            .put_cached(question, &database, Arc::new(response.clone()));
        Ok(response)
    }

    /// Serves a repeated question without going back to the model. The cached
    /// session is revived if it has expired in the meantime.
    async fn from_cache(
        &self,
        cached: &Arc<QueryResponse>,
        window: PagingWindow,
    ) -> Result<QueryResponse, QueryError> {
        let session = match self.caches.sessions.get_session(&cached.session_id) {
            Some(session) => session,
            None => {
                let id = self.caches.sessions.create_session(
                    &cached.database,
                    &cached.generated_sql,
                    Some(&cached.question),
                );
                debug!("Revived expired session {} as {}", cached.session_id, id);
                self.caches
                    .sessions
                    .get_session(&id)
                    .ok_or_else(|| QueryError::Internal("session vanished right after creation".to_string()))?
            }
        };

        if cached.page_size == window.page_size() {
            let mut response = QueryResponse::clone(cached);
            if response.session_id != session.session_id {
                response.session_id = session.session_id.clone();
                self.caches.results.put_cached(
                    &cached.question,
                    &cached.database,
                    Arc::new(response.clone()),
                );
            }
            return Ok(response);
        }

        self.check_sql(&session.database, &session.sql).await?;
        let page = self.run_page(&session.database, &session.sql, window).await?;
        let mut response = QueryResponse::new(&cached.question, &session, page);
        response.explanation = cached.explanation.clone();
        response.confidence = cached.confidence;
        response.ambiguity_check = cached.ambiguity_check.clone();
        response.summary = cached.summary.clone();
        Ok(response)
    }

    /// Describes the first rows of a freshly answered question. A failed
    /// summary leaves the answer without one.
    async fn summarize(&self, question: &str, sql: &str, page: &PageResult) -> Option<String> {
        let notice = page.notice();
        let digest = ResultDigest {
            question,
            sql,
            rows: &page.rows[..page.rows.len().min(SUMMARY_SAMPLE_ROWS)],
            total_rows: page.total_rows,
            notice: &notice,
        };

        match self.llm.summarize_results(&digest).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Could not summarize results for '{}': {}", question, e);
                None
            }
        }
    }

    async fn generation_context(&self, database: &str) -> Result<GenerationContext, QueryError> {
        let dir = self.pools.database_dir(database)?;
        let name = database.to_string();
        let files = tokio::task::spawn_blocking(move || load_context_files(&dir, &name)).await??;
        let schema = self.schema_manager.schema_context(database).await?;

        Ok(GenerationContext {
            schema: schema.to_string(),
            meanings: files.meanings,
            knowledge: files.knowledge,
            bsl: files.bsl,
        })
    }

    /// Both guard checks. Runs before every execution, including replays of
    /// session SQL that was accepted earlier.
    async fn check_sql(&self, database: &str, sql: &str) -> Result<(), QueryError> {
        if let Err(violation) = enforce_safety(sql) {
            warn!("Rejected SQL for '{}': {} ({})", database, violation, sql);
            return Err(violation.into());
        }
        let catalog = self.schema_manager.catalog(database).await?;
        if let Err(violation) = enforce_known_tables(sql, &catalog) {
            warn!("Rejected SQL for '{}': {} ({})", database, violation, sql);
            return Err(violation.into());
        }
        Ok(())
    }

    async fn run_page(
        &self,
        database: &str,
        sql: &str,
        window: PagingWindow,
    ) -> Result<PageResult, QueryError> {
        let pools = Arc::clone(&self.pools);
        let name = database.to_string();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || -> Result<PageResult, QueryError> {
            let mut conn = pools.get(&name)?;
            if window.page() == 1 {
                let analysis = analyze_query_plan(&conn, &sql);
                debug!(
                    "Plan for '{}': uses index={}, full table scan={}",
                    name, analysis.uses_index, analysis.full_table_scan
                );
                for suggestion in &analysis.suggestions {
                    info!("Query plan hint for '{}': {}", name, suggestion);
                }
            }
            execute_paginated(&mut conn, &sql, window).inspect_err(|e| {
                error!("Execution failed on '{}': {} ({})", name, e, sql);
            })
        })
        .await?
    }

    pub fn session(&self, session_id: &str) -> Result<Arc<QuerySession>, QueryError> {
        self.caches
            .sessions
            .get_session(session_id)
            .ok_or_else(|| QueryError::SessionNotFound(session_id.to_string()))
    }

    /// The session's full result set as CSV, capped at `export_max_rows`.
    pub async fn export_session_csv(&self, session_id: &str) -> Result<Vec<u8>, QueryError> {
        let session = self.session(session_id)?;
        self.check_sql(&session.database, &session.sql).await?;

        let pools = Arc::clone(&self.pools);
        let max_rows = i64::from(self.paging.export_max_rows);

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>, QueryError> {
            let conn = pools.get(&session.database)?;
            let mut stmt = conn.prepare(&windowed_statement(&session.sql))?;
            let columns = column_names(&stmt);

            let mut writer = csv::Writer::from_writer(Vec::new());
            writer
                .write_record(&columns)
                .map_err(|e| QueryError::Internal(format!("CSV write failed: {}", e)))?;

            let mut rows = stmt.query(params![max_rows, 0i64])?;
            let mut written = 0usize;
            while let Some(row) = rows.next()? {
                let record = (0..columns.len())
                    .map(|i| row.get_ref(i).map(value_to_text))
                    .collect::<Result<Vec<_>, _>>()?;
                writer
                    .write_record(&record)
                    .map_err(|e| QueryError::Internal(format!("CSV write failed: {}", e)))?;
                written += 1;
            }

            info!("Exported {} rows from session {}", written, session.session_id);
            writer
                .into_inner()
                .map_err(|e| QueryError::Internal(format!("CSV flush failed: {}", e)))
        })
        .await?
    }
}
