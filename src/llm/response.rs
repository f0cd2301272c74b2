//! Parsing of model replies. Models wrap JSON in markdown fences, prose, or
//! both, so the first balanced `{...}` object is located by hand before
//! handing it to serde.

use crate::llm::models::{AmbiguityCheck, SqlGeneration};
use crate::llm::LlmError;
use serde_json::Value;
use tracing::debug;

/// Returns the first complete top-level JSON object in `content`, ignoring
/// braces inside string literals.
pub fn extract_json_object(content: &str) -> Result<&str, LlmError> {
    let start = content
        .find('{')
        .ok_or_else(|| LlmError::ResponseError("No JSON object found in response".to_string()))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&content[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    Err(LlmError::ResponseError(format!(
        "Unbalanced braces in response (depth {})",
        depth
    )))
}

fn strip_fences(text: &str) -> String {
    text.replace("```sql", "")
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Parses a generation reply. `confidence` may arrive as a number or a
/// numeric string and defaults to 0.0; markdown fences are removed from `sql`.
pub fn parse_generation(content: &str) -> Result<SqlGeneration, LlmError> {
    let object = extract_json_object(content)?;
    let value: Value = serde_json::from_str(object)
        .map_err(|e| LlmError::ResponseError(format!("Invalid JSON from model: {}", e)))?;

    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };

    let sql = value
        .get("sql")
        .and_then(Value::as_str)
        .map(strip_fences)
        .filter(|sql| !sql.is_empty());

    debug!("Parsed generation: sql present={}, confidence={}", sql.is_some(), confidence);

    Ok(SqlGeneration {
        sql,
        confidence,
        explanation: text("explanation"),
        thought_process: text("thought_process"),
    })
}

pub fn parse_ambiguity(content: &str) -> Result<AmbiguityCheck, LlmError> {
    let object = extract_json_object(content)?;
    serde_json::from_str(object)
        .map_err(|e| LlmError::ResponseError(format!("Invalid ambiguity JSON: {}", e)))
}

/// Parses a summary reply. Plain text is expected, but JSON-mode backends
/// wrap it in an object, so a `summary` field is unwrapped when present.
pub fn parse_summary(content: &str) -> Result<String, LlmError> {
    let text = strip_fences(content);
    let summary = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => match map.get("summary") {
            Some(Value::String(summary)) => summary.trim().to_string(),
            _ => text,
        },
        _ => text,
    };

    if summary.is_empty() {
        return Err(LlmError::ResponseError("Empty summary".to_string()));
    }
    Ok(summary)
}
