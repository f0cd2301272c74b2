use crate::db::db_utils::JsonRow;
use serde::{Deserialize, Serialize};

/// Everything the generator gets to see besides the question itself.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationContext {
    /// `CREATE` statements with an example row per table
    pub schema: String,
    /// Flattened column meanings
    pub meanings: String,
    /// Knowledge-base entries and metric SQL templates
    pub knowledge: String,
    /// Business Semantics Layer rules, if the database has them
    pub bsl: Option<String>,
}

// Output from SQL generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlGeneration {
    pub sql: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub thought_process: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguityCheck {
    pub is_ambiguous: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// What the summarizer sees of an answered question: the first rows only.
#[derive(Debug, Clone, Serialize)]
pub struct ResultDigest<'a> {
    pub question: &'a str,
    pub sql: &'a str,
    pub rows: &'a [JsonRow],
    pub total_rows: u64,
    pub notice: &'a str,
}
