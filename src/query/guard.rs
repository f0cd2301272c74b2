//! Lexical safety checks for generated SQL.
//!
//! These are regular-expression heuristics, not a parser. They run before
//! every execution: once when freshly generated SQL is accepted and again
//! whenever a stored session is paged.

use crate::db::schema_manager::TableCatalog;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

const FORBIDDEN_KEYWORDS: [&str; 9] = [
    "insert", "update", "delete", "drop", "alter", "attach", "pragma", "replace", "truncate",
];

static FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"))).expect("valid regex")
});

// Table reference after FROM/JOIN. The trailing group detects table-valued
// function calls such as `json_each(...)`.
static TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:from|join)\s+([\w"`\[\]\.]+)(\s*\()?"#).expect("valid regex")
});

// `WITH name AS (` or `, name(col, ...) AS (`
static CTE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:\bwith(?:\s+recursive)?|,)\s*([\w"`\[\]]+)\s*(?:\([^()]*\)\s*)?as\s*(?:not\s+)?(?:materialized\s*)?\("#)
        .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardViolation {
    EmptyOrInvalidInput,
    MultipleStatements,
    NotASelect,
    ForbiddenOperation(String),
    UnknownTables(Vec<String>),
}

impl fmt::Display for GuardViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardViolation::EmptyOrInvalidInput => write!(f, "No SQL query present"),
            GuardViolation::MultipleStatements => {
                write!(f, "Multiple SQL statements detected; only a single SELECT is allowed")
            }
            GuardViolation::NotASelect => write!(f, "Only SELECT statements are allowed"),
            GuardViolation::ForbiddenOperation(keyword) => {
                write!(f, "Forbidden SQL operation detected: {}", keyword.to_uppercase())
            }
            GuardViolation::UnknownTables(names) => {
                write!(f, "Unknown tables in SQL: {}", names.join(", "))
            }
        }
    }
}

impl std::error::Error for GuardViolation {}

/// Rejects anything that is not a single read-only SELECT/WITH statement.
pub fn enforce_safety(sql: &str) -> Result<(), GuardViolation> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(GuardViolation::EmptyOrInvalidInput);
    }

    // A single `;` may be a terminator or sit inside a literal or comment.
    // Anything after it is refused when the wrapped statement is prepared.
    if trimmed.matches(';').count() > 1 {
        return Err(GuardViolation::MultipleStatements);
    }

    // Keywords first, so `DROP TABLE t` reports the operation rather than the shape.
    let lowered = trimmed.to_lowercase();
    if let Some(found) = FORBIDDEN.captures(&lowered).and_then(|c| c.get(1)) {
        return Err(GuardViolation::ForbiddenOperation(found.as_str().to_string()));
    }

    if !(lowered.starts_with("select") || lowered.starts_with("with")) {
        return Err(GuardViolation::NotASelect);
    }

    Ok(())
}

/// Rejects references to tables that are neither in the catalog nor CTEs
/// defined by the statement itself.
pub fn enforce_known_tables(sql: &str, catalog: &TableCatalog) -> Result<(), GuardViolation> {
    let ctes: BTreeSet<String> = cte_names(sql)
        .into_iter()
        .map(|name| name.to_lowercase())
        .collect();

    let unknown: BTreeSet<String> = referenced_tables(sql)
        .into_iter()
        .filter(|table| !ctes.contains(&table.to_lowercase()) && !catalog.contains(table))
        .collect();

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(GuardViolation::UnknownTables(unknown.into_iter().collect()))
    }
}

/// Names following FROM/JOIN, unquoted. `main.t` resolves to `t`;
/// table-valued function calls are skipped.
pub fn referenced_tables(sql: &str) -> BTreeSet<String> {
    TABLE_REF
        .captures_iter(sql)
        .filter(|caps| caps.get(2).is_none())
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let name = strip_quotes(m.as_str());
            match name.rsplit_once('.') {
                Some((schema, table)) if schema.eq_ignore_ascii_case("main") => table.to_string(),
                _ => name,
            }
        })
        .filter(|name| !name.is_empty())
        .collect()
}

pub fn cte_names(sql: &str) -> BTreeSet<String> {
    // Only statements that open a WITH clause can define CTEs.
    if !sql.to_lowercase().contains("with") {
        return BTreeSet::new();
    }
    CTE_NAME
        .captures_iter(sql)
        .filter_map(|caps| caps.get(1))
        .map(|m| strip_quotes(m.as_str()))
        .filter(|name| !name.is_empty())
        .collect()
}

fn strip_quotes(token: &str) -> String {
    token
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TableCatalog {
        TableCatalog::new()
            .with_table("customers", ["id", "name"])
            .with_table("orders", ["id", "customer_id", "total"])
    }

    #[test]
    fn accepts_plain_selects_and_ctes() {
        assert_eq!(enforce_safety("SELECT * FROM customers"), Ok(()));
        assert_eq!(enforce_safety("  select id from orders;  "), Ok(()));
        assert_eq!(
            enforce_safety("WITH recent AS (SELECT * FROM orders) SELECT * FROM recent"),
            Ok(())
        );
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(enforce_safety(""), Err(GuardViolation::EmptyOrInvalidInput));
        assert_eq!(enforce_safety(" \n\t "), Err(GuardViolation::EmptyOrInvalidInput));
    }

    #[test]
    fn rejects_multiple_statements() {
        assert_eq!(
            enforce_safety("SELECT 1; SELECT 2;"),
            Err(GuardViolation::MultipleStatements)
        );
        assert_eq!(
            enforce_safety("SELECT 1; SELECT 2; SELECT 3"),
            Err(GuardViolation::MultipleStatements)
        );
    }

    #[test]
    fn a_single_semicolon_anywhere_is_tolerated() {
        assert_eq!(enforce_safety("SELECT ';' AS sep FROM t"), Ok(()));
        assert_eq!(enforce_safety("SELECT id FROM t; -- done"), Ok(()));
    }

    #[test]
    fn rejects_non_select_statements() {
        assert_eq!(enforce_safety("EXPLAIN SELECT 1"), Err(GuardViolation::NotASelect));
        assert_eq!(enforce_safety("VACUUM"), Err(GuardViolation::NotASelect));
    }

    #[test]
    fn drop_table_is_a_forbidden_operation() {
        assert_eq!(
            enforce_safety("DROP TABLE t"),
            Err(GuardViolation::ForbiddenOperation("drop".to_string()))
        );
        assert_eq!(
            enforce_safety("SELECT * FROM t WHERE 1 = 1 OR drop TABLE"),
            Err(GuardViolation::ForbiddenOperation("drop".to_string()))
        );
    }

    #[test]
    fn every_forbidden_keyword_is_caught_in_any_case() {
        for keyword in FORBIDDEN_KEYWORDS {
            let lower = format!("select 1 from t where x = 1 {} y", keyword);
            let upper = format!("SELECT 1 FROM t WHERE x = 1 {} y", keyword.to_uppercase());
            assert_eq!(
                enforce_safety(&lower),
                Err(GuardViolation::ForbiddenOperation(keyword.to_string())),
                "{}",
                lower
            );
            assert!(enforce_safety(&upper).is_err(), "{}", upper);
        }
    }

    #[test]
    fn keywords_inside_identifiers_are_allowed() {
        assert_eq!(
            enforce_safety("SELECT is_deleted, updated_at, dropoff_zone FROM trips"),
            Ok(())
        );
        assert_eq!(enforce_safety("SELECT inserts_total FROM stats"), Ok(()));
    }

    #[test]
    fn names_exactly_the_unknown_table() {
        let sql = "SELECT * FROM customers JOIN unknown_table ON customers.id = unknown_table.cid";
        assert_eq!(
            enforce_known_tables(sql, &catalog()),
            Err(GuardViolation::UnknownTables(vec!["unknown_table".to_string()]))
        );
    }

    #[test]
    fn unknown_tables_are_sorted_and_deduplicated() {
        let sql = "SELECT * FROM zeta z JOIN alpha a ON 1 = 1 LEFT JOIN zeta z2 ON 1 = 1";
        assert_eq!(
            enforce_known_tables(sql, &catalog()),
            Err(GuardViolation::UnknownTables(vec![
                "alpha".to_string(),
                "zeta".to_string()
            ]))
        );
    }

    #[test]
    fn cte_names_are_exempt() {
        let only_customers = TableCatalog::new().with_table("customers", ["id"]);
        let sql = "WITH recent AS (SELECT * FROM customers) SELECT * FROM recent";
        assert_eq!(enforce_known_tables(sql, &only_customers), Ok(()));

        let chained = "WITH a AS (SELECT * FROM customers), \"b\"(x) AS (SELECT id FROM a) \
                       SELECT * FROM b JOIN a ON a.id = b.x";
        assert_eq!(enforce_known_tables(chained, &only_customers), Ok(()));
    }

    #[test]
    fn column_aliases_are_not_mistaken_for_ctes() {
        let names = cte_names("WITH x AS (SELECT 1) SELECT a, sum(b) AS total FROM x");
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn quoted_and_qualified_references_resolve() {
        let sql = r#"SELECT * FROM "customers" c JOIN main.orders o ON o.customer_id = c.id"#;
        assert_eq!(enforce_known_tables(sql, &catalog()), Ok(()));
        assert_eq!(enforce_known_tables("SELECT * FROM Customers", &catalog()), Ok(()));
    }

    #[test]
    fn subqueries_and_table_functions_are_not_tables() {
        let sql = "SELECT * FROM (SELECT id FROM orders) sub \
                   JOIN json_each(sub.id) j ON 1 = 1";
        assert_eq!(enforce_known_tables(sql, &catalog()), Ok(()));
    }

    #[test]
    fn violations_render_readable_reasons() {
        assert_eq!(
            GuardViolation::UnknownTables(vec!["a".into(), "b".into()]).to_string(),
            "Unknown tables in SQL: a, b"
        );
        assert_eq!(
            GuardViolation::ForbiddenOperation("drop".into()).to_string(),
            "Forbidden SQL operation detected: DROP"
        );
    }
}
