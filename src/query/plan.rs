//! `EXPLAIN QUERY PLAN` inspection. The findings are only logged; the plan
//! never changes what gets executed.

use crate::query::pager::normalize_sql;
use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::{debug, warn};

// Older SQLite prints `SCAN TABLE t`, newer releases just `SCAN t`.
static SCAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSCAN (?:TABLE )?(\w+)").expect("valid regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanAnalysis {
    pub uses_index: bool,
    pub full_table_scan: bool,
    pub suggestions: Vec<String>,
}

pub fn analyze_plan_details<'a>(details: impl IntoIterator<Item = &'a str>) -> PlanAnalysis {
    let mut analysis = PlanAnalysis::default();

    for detail in details {
        let upper = detail.to_uppercase();
        let indexed = upper.contains("USING INDEX")
            || upper.contains("USING COVERING INDEX")
            || upper.contains("USING INTEGER PRIMARY KEY");
        if indexed {
            analysis.uses_index = true;
            continue;
        }

        if let Some(table) = SCAN.captures(detail).and_then(|c| c.get(1)) {
            analysis.full_table_scan = true;
            let hint = format!("Consider adding an index on {} for better performance", table.as_str());
            if !analysis.suggestions.contains(&hint) {
                analysis.suggestions.push(hint);
            }
        }
    }

    analysis
}

/// Best effort: a plan that cannot be produced yields an empty analysis.
pub fn analyze_query_plan(conn: &Connection, sql: &str) -> PlanAnalysis {
    let explain = format!("EXPLAIN QUERY PLAN {}", normalize_sql(sql));

    let details = conn.prepare(&explain).and_then(|mut stmt| {
        stmt.query_map([], |row| row.get::<_, String>(3))?
            .collect::<Result<Vec<_>, _>>()
    });

    match details {
        Ok(details) => {
            debug!("Query plan: {:?}", details);
            analyze_plan_details(details.iter().map(String::as_str))
        }
        Err(e) => {
            warn!("Query plan analysis failed: {}", e);
            PlanAnalysis::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_without_index_produce_hints() {
        let analysis = analyze_plan_details(["SCAN TABLE orders", "SCAN customers", "SCAN orders"]);
        assert!(analysis.full_table_scan);
        assert!(!analysis.uses_index);
        assert_eq!(
            analysis.suggestions,
            vec![
                "Consider adding an index on orders for better performance",
                "Consider adding an index on customers for better performance",
            ]
        );
    }

    #[test]
    fn index_lookups_are_recognised() {
        let analysis = analyze_plan_details(["SEARCH t USING INTEGER PRIMARY KEY (rowid=?)"]);
        assert!(analysis.uses_index);
        assert!(!analysis.full_table_scan);
    }

    #[test]
    fn live_plan_for_an_unindexed_filter() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, val TEXT);").unwrap();

        let scan = analyze_query_plan(&conn, "SELECT * FROM t WHERE val = 'x';");
        assert!(scan.full_table_scan);
        assert_eq!(scan.suggestions.len(), 1);

        let broken = analyze_query_plan(&conn, "SELECT * FROM nowhere");
        assert_eq!(broken, PlanAnalysis::default());
    }
}
