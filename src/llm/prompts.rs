use crate::llm::models::{GenerationContext, ResultDigest};
use crate::llm::LlmError;
use minijinja::{context, Environment};
use rust_embed::RustEmbed;
use tracing::{debug, error};

#[derive(RustEmbed)]
#[folder = "prompts/"]
struct PromptAssets;

pub const SQL_GENERATION_SYSTEM: &str = "sql_generation_system.txt";
pub const SQL_GENERATION: &str = "sql_generation.jinja";
pub const AMBIGUITY_SYSTEM: &str = "ambiguity_system.txt";
pub const AMBIGUITY: &str = "ambiguity.jinja";
pub const RESULT_SUMMARY_SYSTEM: &str = "result_summary_system.txt";
pub const RESULT_SUMMARY: &str = "result_summary.jinja";

/// Prompt templates compiled into the binary and rendered with minijinja.
pub struct PromptSet {
    env: Environment<'static>,
}

impl PromptSet {
    pub fn load() -> Result<Self, LlmError> {
        let mut env = Environment::new();

        for name in PromptAssets::iter() {
            let Some(file) = PromptAssets::get(&name) else {
                continue;
            };
            let source = String::from_utf8(file.data.into_owned()).map_err(|e| {
                LlmError::ConfigError(format!("prompt {} is not UTF-8: {}", name, e))
            })?;
            env.add_template_owned(name.to_string(), source)
                .map_err(|e| LlmError::ConfigError(format!("prompt {}: {}", name, e)))?;
            debug!("Loaded prompt template {}", name);
        }

        for required in [
            SQL_GENERATION_SYSTEM,
            SQL_GENERATION,
            AMBIGUITY_SYSTEM,
            AMBIGUITY,
            RESULT_SUMMARY_SYSTEM,
            RESULT_SUMMARY,
        ] {
            if env.get_template(required).is_err() {
                return Err(LlmError::ConfigError(format!("missing prompt template {}", required)));
            }
        }

        Ok(Self { env })
    }

    pub fn render(
        &self,
        template_name: &str,
        question: &str,
        ctx: &GenerationContext,
    ) -> Result<String, LlmError> {
        self.render_with(
            template_name,
            context! {
                question => question,
                schema => &ctx.schema,
                meanings => &ctx.meanings,
                knowledge => &ctx.knowledge,
                bsl => &ctx.bsl,
            },
        )
    }

    /// Renders a summary prompt. Rows are passed to the model as pretty JSON.
    pub fn render_summary(&self, template_name: &str, digest: &ResultDigest<'_>) -> Result<String, LlmError> {
        let rows = serde_json::to_string_pretty(digest.rows)
            .map_err(|e| LlmError::ConfigError(format!("rows for {}: {}", template_name, e)))?;

        self.render_with(
            template_name,
            context! {
                question => digest.question,
                sql => digest.sql,
                row_count => digest.total_rows,
                notice => digest.notice,
                rows => rows,
            },
        )
    }

    fn render_with(&self, template_name: &str, values: minijinja::Value) -> Result<String, LlmError> {
        let template = self
            .env
            .get_template(template_name)
            .map_err(|e| LlmError::ConfigError(format!("prompt {}: {}", template_name, e)))?;

        template.render(values).map_err(|e| {
            error!("Prompt render error in {}: {}", template_name, e);
            LlmError::ConfigError(format!("prompt {}: {}", template_name, e))
        })
    }
}
