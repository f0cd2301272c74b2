pub mod context;
pub mod models;
pub mod prompts;
pub mod providers;
pub mod response;

use crate::config::LlmConfig;
use async_trait::async_trait;
use models::{AmbiguityCheck, GenerationContext, ResultDigest, SqlGeneration};
use prompts::PromptSet;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
    ContextError(String),
    Timeout(Duration),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
            LlmError::ContextError(msg) => write!(f, "Context error: {}", msg),
            LlmError::Timeout(after) => write!(f, "LLM call timed out after {}s", after.as_secs()),
        }
    }
}

impl Error for LlmError {}

/// A chat-style completion backend: system prompt + user prompt in, text out.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

/// The generation collaborator. Its replies are untrusted; callers validate
/// any SQL before running it.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate_sql(
        &self,
        question: &str,
        context: &GenerationContext,
    ) -> Result<SqlGeneration, LlmError>;

    async fn check_ambiguity(
        &self,
        question: &str,
        context: &GenerationContext,
    ) -> Result<AmbiguityCheck, LlmError>;

    /// A short plain-text description of rows that were already fetched.
    async fn summarize_results(&self, digest: &ResultDigest<'_>) -> Result<String, LlmError>;
}

/// Renders the embedded prompts, sends them to a provider and parses the
/// JSON reply.
pub struct PromptedGenerator {
    provider: Box<dyn LlmProvider>,
    prompts: PromptSet,
}

impl PromptedGenerator {
    pub fn new(provider: Box<dyn LlmProvider>) -> Result<Self, LlmError> {
        Ok(Self {
            provider,
            prompts: PromptSet::load()?,
        })
    }
}

#[async_trait]
impl SqlGenerator for PromptedGenerator {
    async fn generate_sql(
        &self,
        question: &str,
        context: &GenerationContext,
    ) -> Result<SqlGeneration, LlmError> {
        let system = self.prompts.render(prompts::SQL_GENERATION_SYSTEM, question, context)?;
        let prompt = self.prompts.render(prompts::SQL_GENERATION, question, context)?;
        let reply = self.provider.complete(&system, &prompt).await?;
        debug!("Raw generation reply: {}", reply);
        response::parse_generation(&reply)
    }

    async fn check_ambiguity(
        &self,
        question: &str,
        context: &GenerationContext,
    ) -> Result<AmbiguityCheck, LlmError> {
        let system = self.prompts.render(prompts::AMBIGUITY_SYSTEM, question, context)?;
        let prompt = self.prompts.render(prompts::AMBIGUITY, question, context)?;
        let reply = self.provider.complete(&system, &prompt).await?;
        response::parse_ambiguity(&reply)
    }

    async fn summarize_results(&self, digest: &ResultDigest<'_>) -> Result<String, LlmError> {
        let system = self.prompts.render_summary(prompts::RESULT_SUMMARY_SYSTEM, digest)?;
        let prompt = self.prompts.render_summary(prompts::RESULT_SUMMARY, digest)?;
        let reply = self.provider.complete(&system, &prompt).await?;
        response::parse_summary(&reply)
    }
}

/// Both halves of interpreting a question. Each may fail on its own.
#[derive(Debug)]
pub struct Interpretation {
    pub ambiguity: Result<AmbiguityCheck, LlmError>,
    pub generation: Result<SqlGeneration, LlmError>,
}

/// Front door for all LLM work: bounds how many calls are in flight and puts
/// a deadline on every call.
pub struct LlmManager {
    generator: Arc<dyn SqlGenerator>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Box<dyn LlmProvider> = match config.backend.as_str() {
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        info!(
            "LLM backend '{}' with model '{}' ({} workers, {}s timeout)",
            config.backend, config.model, config.workers, config.timeout_secs
        );
        Ok(Self::with_generator(
            Arc::new(PromptedGenerator::new(provider)?),
            config.workers,
            config.timeout(),
        ))
    }

    pub fn with_generator(generator: Arc<dyn SqlGenerator>, workers: usize, timeout: Duration) -> Self {
        Self {
            generator,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, LlmError>
    where
        F: Future<Output = Result<T, LlmError>>,
    {
        let work = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| LlmError::ConfigError("LLM worker pool closed".to_string()))?;
            call.await
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout)),
        }
    }

    pub async fn generate_sql(
        &self,
        question: &str,
        context: &GenerationContext,
    ) -> Result<SqlGeneration, LlmError> {
        self.bounded(self.generator.generate_sql(question, context)).await
    }

    pub async fn check_ambiguity(
        &self,
        question: &str,
        context: &GenerationContext,
    ) -> Result<AmbiguityCheck, LlmError> {
        self.bounded(self.generator.check_ambiguity(question, context)).await
    }

    pub async fn summarize_results(&self, digest: &ResultDigest<'_>) -> Result<String, LlmError> {
        self.bounded(self.generator.summarize_results(digest)).await
    }

    /// Runs ambiguity detection and SQL generation concurrently and waits for both.
    pub async fn interpret(&self, question: &str, context: &GenerationContext) -> Interpretation {
        let (ambiguity, generation) = tokio::join!(
            self.check_ambiguity(question, context),
            self.generate_sql(question, context)
        );

        if let Err(e) = &ambiguity {
            warn!("Ambiguity check failed, continuing without it: {}", e);
        }

        Interpretation {
            ambiguity,
            generation,
        }
    }
}
