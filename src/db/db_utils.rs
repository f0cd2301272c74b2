use rusqlite::types::ValueRef;
use rusqlite::{Row, Statement};
use serde_json::{Map, Number, Value};

pub type JsonRow = Map<String, Value>;

/// Column names of a prepared statement, in select-list order.
pub fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(str::to_string).collect()
}

/// Converts a single SQLite value into JSON. Non-finite floats become null,
/// blobs are rendered as lossy UTF-8 text.
pub fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Builds a JSON object for a row, keyed by the given column names.
pub fn row_to_json(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<JsonRow> {
    let mut object = Map::with_capacity(columns.len());
    for (i, name) in columns.iter().enumerate() {
        object.insert(name.clone(), value_to_json(row.get_ref(i)?));
    }
    Ok(object)
}

/// Plain-text rendering used for CSV export.
pub fn value_to_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Double-quotes an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde_json::json;

    #[test]
    fn rows_keep_column_order_and_types() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn
            .prepare("SELECT 3 AS z, 'x' AS a, 1.5 AS m, NULL AS n")
            .unwrap();
        let columns = column_names(&stmt);
        let row = stmt
            .query_row([], |row| row_to_json(row, &columns))
            .unwrap();

        assert_eq!(columns, vec!["z", "a", "m", "n"]);
        assert_eq!(
            Value::Object(row.clone()),
            json!({"z": 3, "a": "x", "m": 1.5, "n": null})
        );
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["z", "a", "m", "n"]);
    }

    #[test]
    fn identifiers_are_escaped() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn text_rendering_for_export() {
        assert_eq!(value_to_text(ValueRef::Null), "");
        assert_eq!(value_to_text(ValueRef::Integer(7)), "7");
        assert_eq!(value_to_text(ValueRef::Text(b"abc")), "abc");
    }
}
