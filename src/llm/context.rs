//! Loads the per-database context files that accompany each SQLite database:
//!
//! - `<db>_kb.jsonl`: knowledge base, one `{knowledge, definition}` per line (required)
//! - `<db>_column_meaning_base.json`: column meanings (required)
//! - `<db>_metric_sql_templates.json`: metric SQL snippets (optional)
//! - `<db>_bsl.txt`: Business Semantics Layer rules (optional)

use crate::llm::LlmError;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextFiles {
    pub knowledge: String,
    pub meanings: String,
    pub bsl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeEntry {
    knowledge: String,
    definition: String,
}

/// Reads the context files for `database` from `dir`. A missing knowledge
/// base or column-meaning file is an error; the other two are optional.
pub fn load_context_files(dir: &Path, database: &str) -> Result<ContextFiles, LlmError> {
    let kb_path = dir.join(format!("{}_kb.jsonl", database));
    let meanings_path = dir.join(format!("{}_column_meaning_base.json", database));

    let missing: Vec<String> = [&kb_path, &meanings_path]
        .iter()
        .filter(|path| !path.is_file())
        .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    if !missing.is_empty() {
        return Err(LlmError::ContextError(format!(
            "{} missing for database '{}'",
            missing.join(", "),
            database
        )));
    }

    let mut knowledge = format_knowledge(&read(&kb_path)?)?;
    let templates_path = dir.join(format!("{}_metric_sql_templates.json", database));
    if templates_path.is_file() {
        match format_metric_templates(&read(&templates_path)?) {
            Ok(lines) if !lines.is_empty() => {
                knowledge.push_str("\n\nMETRIC SQL TEMPLATES:\n");
                knowledge.push_str(&lines);
            }
            Ok(_) => {}
            Err(e) => warn!("Ignoring unreadable metric templates for '{}': {}", database, e),
        }
    }

    let meanings = format_meanings(&read(&meanings_path)?)?;

    let bsl_path = dir.join(format!("{}_bsl.txt", database));
    let bsl = if bsl_path.is_file() {
        Some(read(&bsl_path)?)
    } else {
        debug!("No BSL file for '{}'", database);
        None
    };

    Ok(ContextFiles {
        knowledge,
        meanings,
        bsl,
    })
}

fn read(path: &Path) -> Result<String, LlmError> {
    fs::read_to_string(path)
        .map_err(|e| LlmError::ContextError(format!("failed to read {}: {}", path.display(), e)))
}

pub fn format_knowledge(jsonl: &str) -> Result<String, LlmError> {
    let mut entries = Vec::new();
    for (number, line) in jsonl.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: KnowledgeEntry = serde_json::from_str(line).map_err(|e| {
            LlmError::ContextError(format!("knowledge base line {}: {}", number + 1, e))
        })?;
        entries.push(format!("• {}: {}", entry.knowledge, entry.definition));
    }
    Ok(entries.join("\n"))
}

pub fn format_meanings(json: &str) -> Result<String, LlmError> {
    let data: serde_json::Map<String, Value> = serde_json::from_str(json)
        .map_err(|e| LlmError::ContextError(format!("column meanings: {}", e)))?;

    let mut lines = Vec::new();
    for (key, value) in &data {
        match value {
            Value::Object(object) => match object.get("column_meaning") {
                Some(meaning) => {
                    lines.push(format!("  {}: {}", key, display(meaning)));
                    if let Some(Value::Object(fields)) = object.get("fields_meaning") {
                        lines.push("    └─ Fields:".to_string());
                        for (field, description) in fields {
                            match description {
                                Value::Object(sub) => {
                                    lines.push(format!("       {}:", field));
                                    for (subfield, text) in sub {
                                        lines.push(format!("         • {}: {}", subfield, display(text)));
                                    }
                                }
                                other => lines.push(format!("       • {}: {}", field, display(other))),
                            }
                        }
                    }
                }
                None => lines.push(format!("  {}: {}", key, value)),
            },
            other => lines.push(format!("  {}: {}", key, display(other))),
        }
    }
    Ok(lines.join("\n"))
}

/// Accepts either an object keyed by metric name or a plain list.
pub fn format_metric_templates(json: &str) -> Result<String, LlmError> {
    let data: Value = serde_json::from_str(json)
        .map_err(|e| LlmError::ContextError(format!("metric templates: {}", e)))?;

    let entries: Vec<&Value> = match &data {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    };

    let field = |item: &Value, keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|key| item.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    };

    let lines: Vec<String> = entries
        .into_iter()
        .filter_map(|item| {
            let name = field(item, &["name", "metric", "knowledge"])?;
            let sql = field(item, &["sql", "sql_example"])?;
            Some(match field(item, &["description"]).filter(|d| !d.is_empty()) {
                Some(description) => format!("- {}: {} -- {}", name, sql, description),
                None => format!("- {}: {}", name, sql),
            })
        })
        .collect();

    Ok(lines.join("\n"))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
