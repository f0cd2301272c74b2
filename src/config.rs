use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Directory holding one sub-directory per named database
    pub data_dir: String,
    pub pool_size: u32,
    pub default_database: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Upper bound on LLM calls in flight across all requests
    pub workers: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub session_ttl_secs: u64,
    pub session_capacity: u64,
    pub result_ttl_secs: u64,
    pub result_capacity: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PagingConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub export_max_rows: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String, // "plain" or "json"
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub paging: PagingConfig,
    pub logging: LoggingConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory containing the databases and their context files
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Database used when a request does not name one
    #[arg(long)]
    pub default_database: Option<String>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = [
                "config.toml",
                "config/config.toml",
                "/etc/text2sql/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // TEXT2SQL__LLM__API_KEY=... and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("TEXT2SQL")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            config.database.data_dir = data_dir.clone();
        }
        if let Some(database) = &args.default_database {
            config.database.default_database = Some(database.clone());
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.paging.default_page_size == 0 || self.paging.max_page_size == 0 {
            return Err(ConfigError::Message(
                "paging.default_page_size and paging.max_page_size must be positive".to_string(),
            ));
        }
        if self.paging.default_page_size > self.paging.max_page_size {
            return Err(ConfigError::Message(format!(
                "paging.default_page_size ({}) exceeds paging.max_page_size ({})",
                self.paging.default_page_size, self.paging.max_page_size
            )));
        }
        if self.llm.workers == 0 {
            return Err(ConfigError::Message("llm.workers must be at least 1".to_string()));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::Message("database.pool_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CacheConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            pool_size: 4,
            default_database: None,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            model: "sqlcoder".to_string(),
            api_key: None,
            api_url: None,
            temperature: 0.1,
            timeout_secs: 60,
            workers: 4,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 3600,
            session_capacity: 1000,
            result_ttl_secs: 300,
            result_capacity: 100,
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_page_size: 100,
            max_page_size: 1000,
            export_max_rows: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "plain".to_string(),
        }
    }
}
