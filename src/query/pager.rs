//! Paged execution of an arbitrary read-only statement.
//!
//! The base statement is never edited. It is wrapped as an opaque subquery
//! twice, once for `COUNT(*)` and once for the `LIMIT/OFFSET` window, and both
//! run inside one read transaction so the count and the rows come from the
//! same snapshot.

use crate::db::db_utils::{column_names, row_to_json, JsonRow};
use crate::query::QueryError;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A validated `(page, page_size)` pair, both 1-based and positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingWindow {
    page: u32,
    page_size: u32,
}

impl PagingWindow {
    pub fn new(page: i64, page_size: i64) -> Result<Self, QueryError> {
        if page < 1 {
            return Err(QueryError::InvalidPagingParameters(format!(
                "page must be >= 1 (got {})",
                page
            )));
        }
        if page_size < 1 {
            return Err(QueryError::InvalidPagingParameters(format!(
                "page_size must be >= 1 (got {})",
                page_size
            )));
        }

        let page = u32::try_from(page).map_err(|_| {
            QueryError::InvalidPagingParameters(format!("page {} is too large", page))
        })?;
        let page_size = u32::try_from(page_size).map_err(|_| {
            QueryError::InvalidPagingParameters(format!("page_size {} is too large", page_size))
        })?;

        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    /// `(page - 1) * page_size`, saturating at `i64::MAX`
    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1).saturating_mul(i64::from(self.page_size))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult {
    pub columns: Vec<String>,
    pub rows: Vec<JsonRow>,
    pub page: u32,
    pub page_size: u32,
    pub total_rows: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PageResult {
    /// "Rows 3-4 of 5 (page 2 of 3)"
    pub fn notice(&self) -> String {
        if self.total_rows == 0 {
            return "The query returned no rows".to_string();
        }
        if self.rows.is_empty() {
            return format!(
                "Page {} is beyond the last page ({} of {} rows total)",
                self.page, self.total_pages, self.total_rows
            );
        }
        let first = u64::from(self.page - 1) * u64::from(self.page_size) + 1;
        let last = first + self.rows.len() as u64 - 1;
        format!(
            "Rows {}-{} of {} (page {} of {})",
            first, last, self.total_rows, self.page, self.total_pages
        )
    }
}

/// Strips surrounding whitespace, trailing statement terminators and a line
/// comment that follows the terminator.
pub fn normalize_sql(sql: &str) -> String {
    let mut base = sql.trim();
    if let Some((head, tail)) = base.rsplit_once(';') {
        let only_comments = tail.lines().all(|line| {
            let line = line.trim();
            line.is_empty() || line.starts_with("--")
        });
        if only_comments {
            base = head;
        }
    }
    base.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

// The newline before the closing parenthesis keeps a trailing `--` comment in
// the base statement from swallowing the wrapper.
pub fn count_statement(normalized_sql: &str) -> String {
    format!("SELECT COUNT(*) FROM (\n{}\n) AS count_query", normalized_sql)
}

pub fn windowed_statement(normalized_sql: &str) -> String {
    format!(
        "SELECT * FROM (\n{}\n) AS paged_query LIMIT ?1 OFFSET ?2",
        normalized_sql
    )
}

pub fn total_pages(total_rows: u64, page_size: u32) -> u64 {
    if total_rows == 0 {
        0
    } else {
        total_rows.div_ceil(u64::from(page_size))
    }
}

/// Runs the count and the windowed query for `sql` in one read transaction.
pub fn execute_paginated(
    conn: &mut Connection,
    sql: &str,
    window: PagingWindow,
) -> Result<PageResult, QueryError> {
    let base = normalize_sql(sql);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;

    let total_rows: i64 = tx.query_row(&count_statement(&base), [], |row| row.get(0))?;
    let total_rows = u64::try_from(total_rows).unwrap_or(0);

    let (columns, rows) = {
        let mut stmt = tx.prepare(&windowed_statement(&base))?;
        let columns = column_names(&stmt);
        let rows = stmt
            .query_map(params![window.limit(), window.offset()], |row| {
                row_to_json(row, &columns)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        (columns, rows)
    };

    // Nothing was written; ending the transaction just releases the snapshot.
    tx.commit()?;

    let total_pages = total_pages(total_rows, window.page_size());
    let page = window.page();
    debug!(
        "Fetched page {}/{} ({} rows of {})",
        page,
        total_pages,
        rows.len(),
        total_rows
    );

    Ok(PageResult {
        columns,
        rows,
        page,
        page_size: window.page_size(),
        total_rows,
        total_pages,
        has_next_page: u64::from(page) < total_pages,
        has_previous_page: page > 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn five_rows() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, val TEXT);
             INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, 'c'), (4, 'd'), (5, 'e');",
        )
        .unwrap();
        conn
    }

    fn ids(result: &PageResult) -> Vec<i64> {
        result
            .rows
            .iter()
            .map(|row| row["id"].as_i64().unwrap())
            .collect()
    }

    #[test]
    fn first_and_last_page_of_five_rows() {
        let mut conn = five_rows();
        let sql = "SELECT id, val FROM t ORDER BY id";

        let first = execute_paginated(&mut conn, sql, PagingWindow::new(1, 2).unwrap()).unwrap();
        assert_eq!(ids(&first), vec![1, 2]);
        assert_eq!(first.total_rows, 5);
        assert_eq!(first.total_pages, 3);
        assert!(!first.has_previous_page);
        assert!(first.has_next_page);
        assert_eq!(first.columns, vec!["id", "val"]);

        let last = execute_paginated(&mut conn, sql, PagingWindow::new(3, 2).unwrap()).unwrap();
        assert_eq!(ids(&last), vec![5]);
        assert_eq!(Value::Object(last.rows[0].clone()), json!({"id": 5, "val": "e"}));
        assert!(!last.has_next_page);
        assert!(last.has_previous_page);
        assert_eq!(last.notice(), "Rows 5-5 of 5 (page 3 of 3)");
    }

    #[test]
    fn pages_concatenate_to_the_full_result() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE n (x INTEGER);
             WITH RECURSIVE seq(v) AS (SELECT 1 UNION ALL SELECT v + 1 FROM seq WHERE v < 23)
             INSERT INTO n SELECT v FROM seq;",
        )
        .unwrap();
        let sql = "SELECT x FROM n ORDER BY x DESC;";

        for page_size in [1_i64, 4, 5, 23, 50] {
            let first =
                execute_paginated(&mut conn, sql, PagingWindow::new(1, page_size).unwrap()).unwrap();
            let mut seen = Vec::new();
            for page in 1..=first.total_pages as i64 {
                let result =
                    execute_paginated(&mut conn, sql, PagingWindow::new(page, page_size).unwrap())
                        .unwrap();
                assert_eq!(result.has_next_page, page < first.total_pages as i64);
                seen.extend(result.rows.iter().map(|r| r["x"].as_i64().unwrap()));
            }
            assert_eq!(seen, (1..=23).rev().collect::<Vec<_>>(), "page_size {}", page_size);
        }
    }

    #[test]
    fn repeated_calls_are_identical() {
        let mut conn = five_rows();
        let window = PagingWindow::new(2, 2).unwrap();
        let sql = "SELECT * FROM t ORDER BY id";
        let a = execute_paginated(&mut conn, sql, window).unwrap();
        let b = execute_paginated(&mut conn, sql, window).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ctes_unions_and_trailing_comments_are_wrapped_intact() {
        let mut conn = five_rows();
        let window = PagingWindow::new(1, 10).unwrap();

        let cte = "WITH odd AS (SELECT * FROM t WHERE id % 2 = 1) SELECT id FROM odd ORDER BY id";
        assert_eq!(ids(&execute_paginated(&mut conn, cte, window).unwrap()), vec![1, 3, 5]);

        let union = "SELECT id FROM t WHERE id < 2 UNION ALL SELECT id FROM t WHERE id > 4";
        assert_eq!(execute_paginated(&mut conn, union, window).unwrap().total_rows, 2);

        let commented = "SELECT id FROM t -- every row";
        assert_eq!(execute_paginated(&mut conn, commented, window).unwrap().total_rows, 5);
    }

    #[test]
    fn empty_results_have_zero_pages() {
        let mut conn = five_rows();
        let result = execute_paginated(
            &mut conn,
            "SELECT * FROM t WHERE id > 100",
            PagingWindow::new(1, 10).unwrap(),
        )
        .unwrap();
        assert_eq!(result.total_rows, 0);
        assert_eq!(result.total_pages, 0);
        assert!(!result.has_next_page);
        assert!(result.rows.is_empty());
        assert_eq!(result.columns, vec!["id", "val"]);
    }

    #[test]
    fn pages_past_the_end_are_empty() {
        let mut conn = five_rows();
        let result =
            execute_paginated(&mut conn, "SELECT * FROM t", PagingWindow::new(9, 2).unwrap()).unwrap();
        assert!(result.rows.is_empty());
        assert!(!result.has_next_page);
        assert!(result.has_previous_page);
    }

    #[test]
    fn database_errors_surface_as_execution_errors() {
        let mut conn = five_rows();
        let err = execute_paginated(
            &mut conn,
            "SELECT missing_column FROM t",
            PagingWindow::new(1, 2).unwrap(),
        )
        .unwrap_err();
        match err {
            QueryError::Execution(msg) => assert!(msg.contains("missing_column"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn invalid_windows_are_rejected() {
        assert!(matches!(
            PagingWindow::new(0, 10),
            Err(QueryError::InvalidPagingParameters(_))
        ));
        assert!(matches!(
            PagingWindow::new(1, 0),
            Err(QueryError::InvalidPagingParameters(_))
        ));
        assert!(matches!(
            PagingWindow::new(-3, 10),
            Err(QueryError::InvalidPagingParameters(_))
        ));

        let window = PagingWindow::new(4, 25).unwrap();
        assert_eq!((window.limit(), window.offset()), (25, 75));
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_sql("  SELECT 1 ;\n ");
        assert_eq!(once, "SELECT 1");
        assert_eq!(normalize_sql(&once), once);
    }

    #[test]
    fn terminator_followed_by_a_comment_is_dropped() {
        assert_eq!(normalize_sql("SELECT id FROM t; -- done"), "SELECT id FROM t");
        assert_eq!(normalize_sql("SELECT ';' AS sep FROM t"), "SELECT ';' AS sep FROM t");

        let mut conn = five_rows();
        let window = PagingWindow::new(1, 10).unwrap();
        let result = execute_paginated(&mut conn, "SELECT id FROM t; -- done", window).unwrap();
        assert_eq!(result.total_rows, 5);
        let result = execute_paginated(&mut conn, "SELECT ';' AS sep FROM t", window).unwrap();
        assert_eq!(result.rows[0]["sep"], json!(";"));
    }

    #[test]
    fn a_statement_after_a_semicolon_never_runs() {
        let mut conn = five_rows();
        let err = execute_paginated(
            &mut conn,
            "SELECT id FROM t; DELETE FROM t",
            PagingWindow::new(1, 10).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Execution(_)));

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 5);
    }

    #[test]
    fn count_and_window_agree_while_a_writer_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.sqlite");

        let setup = Connection::open(&path).unwrap();
        let mode: String = setup
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        setup
            .execute_batch(
                "CREATE TABLE events (id INTEGER PRIMARY KEY, note TEXT);
                 INSERT INTO events (note) VALUES ('seed'), ('seed'), ('seed');",
            )
            .unwrap();
        drop(setup);

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let path = path.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let conn = Connection::open(&path).unwrap();
                conn.busy_timeout(Duration::from_secs(5)).unwrap();
                let mut inserted = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    conn.execute("INSERT INTO events (note) VALUES ('live')", [])
                        .unwrap();
                    inserted += 1;
                }
                inserted
            })
        };

        let mut reader = Connection::open(&path).unwrap();
        reader.busy_timeout(Duration::from_secs(5)).unwrap();
        let sql = "SELECT id, note FROM events ORDER BY id";
        let page_size = 7u32;

        for _ in 0..200 {
            let first = execute_paginated(&mut reader, sql, PagingWindow::new(1, 7).unwrap()).unwrap();
            // The last page as of that count; by now the writer has moved on.
            let page = first.total_pages.max(1) as i64;
            for window in [
                PagingWindow::new(page, 7).unwrap(),
                PagingWindow::new(page + 1, 7).unwrap(),
            ] {
                let result = execute_paginated(&mut reader, sql, window).unwrap();
                let remaining = result.total_rows.saturating_sub(window.offset() as u64);
                assert_eq!(result.rows.len() as u64, remaining.min(u64::from(page_size)));
                assert_eq!(result.total_pages, total_pages(result.total_rows, page_size));
                assert_eq!(
                    result.has_next_page,
                    u64::from(result.page) < result.total_pages
                );
            }
        }

        stop.store(true, Ordering::Relaxed);
        let inserted = writer.join().unwrap();
        assert!(inserted > 0);
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }
}
