use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_API_PREFIX: &str = "/api/v1";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_GROQ_MODEL: &str = "llama3-70b-8192";
const DEFAULT_QA_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_LOG_FILE: &str = "logs/docqa.log";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the document QA server.
///
/// Built once at startup and shared by `Arc`; components receive it through their
/// constructors instead of looking it up.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path prefix under which the authenticated API is mounted.
    pub api_prefix: String,
    /// Static bearer token clients must present.
    pub bearer_token: String,
    /// API key for the OpenAI embeddings and chat endpoints.
    pub openai_api_key: String,
    /// Base URL of the OpenAI-compatible API.
    pub openai_base_url: String,
    /// Groq API keys, rotated round-robin when Groq answers questions.
    pub groq_api_keys: Vec<String>,
    /// Base URL of the Groq OpenAI-compatible API.
    pub groq_base_url: String,
    /// Chat model used when Groq answers questions.
    pub groq_model_name: String,
    /// Provider used for answer generation.
    pub qa_provider: CompletionProvider,
    /// Chat model used when OpenAI answers questions.
    pub qa_model_name: String,
    /// Embedding model identifier passed to the embeddings endpoint.
    pub embedding_model_name: String,
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per question.
    pub retrieval_top_k: usize,
    /// Number of chunks sent per embeddings request.
    pub embedding_batch_size: usize,
    /// Maximum embeddings requests in flight per document.
    pub embedding_concurrency: usize,
    /// Maximum questions answered concurrently per request.
    pub qa_concurrency: usize,
    /// Timeout applied to the document download.
    pub download_timeout: Duration,
    /// Timeout applied to each embeddings or chat call.
    pub upstream_timeout: Duration,
    /// Base directory for per-request index snapshots.
    pub index_dir: PathBuf,
    /// Whether index snapshots are written at all.
    pub index_persist: bool,
    /// Age after which index snapshots are reclaimed.
    pub index_ttl: Duration,
    /// Interval between reaper sweeps.
    pub index_reap_interval: Duration,
    /// Interface the HTTP server binds to.
    pub server_host: String,
    /// Port the HTTP server binds to.
    pub server_port: u16,
    /// File receiving a copy of the log output.
    pub log_file: PathBuf,
}

/// Supported answer-generation backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionProvider {
    /// Hosted OpenAI chat completions.
    OpenAI,
    /// Groq's OpenAI-compatible chat completions.
    Groq,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            api_prefix: normalize_prefix(
                &load_env_optional("API_PREFIX").unwrap_or_else(|| DEFAULT_API_PREFIX.into()),
            ),
            bearer_token: load_env("TEAM_BEARER_TOKEN")?,
            openai_api_key: load_env("OPENAI_API_KEY")?,
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.into()),
            groq_api_keys: load_env_optional("GROQ_API_KEYS")
                .map(|raw| split_keys(&raw))
                .unwrap_or_default(),
            groq_base_url: load_env_optional("GROQ_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GROQ_BASE_URL.into()),
            groq_model_name: load_env_optional("GROQ_MODEL_NAME")
                .unwrap_or_else(|| DEFAULT_GROQ_MODEL.into()),
            qa_provider: load_env_optional("QA_PROVIDER")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("QA_PROVIDER".into()))
                })
                .transpose()?
                .unwrap_or(CompletionProvider::OpenAI),
            qa_model_name: load_env_optional("QA_MODEL_NAME")
                .unwrap_or_else(|| DEFAULT_QA_MODEL.into()),
            embedding_model_name: load_env_optional("EMBEDDING_MODEL_NAME")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.into()),
            chunk_size: parse_optional("CHUNK_SIZE")?.unwrap_or(600),
            chunk_overlap: parse_optional("CHUNK_OVERLAP")?.unwrap_or(100),
            retrieval_top_k: parse_optional("RETRIEVAL_TOP_K")?.unwrap_or(4),
            embedding_batch_size: parse_optional("EMBEDDING_BATCH_SIZE")?.unwrap_or(64),
            embedding_concurrency: parse_optional("EMBEDDING_CONCURRENCY")?.unwrap_or(4),
            qa_concurrency: parse_optional("QA_CONCURRENCY")?.unwrap_or(4),
            download_timeout: Duration::from_secs(
                parse_optional("DOWNLOAD_TIMEOUT_SECS")?.unwrap_or(20),
            ),
            upstream_timeout: Duration::from_secs(
                parse_optional("UPSTREAM_TIMEOUT_SECS")?.unwrap_or(60),
            ),
            index_dir: load_env_optional("INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("indexes")),
            index_persist: load_env_optional("INDEX_PERSIST")
                .map(|value| parse_bool("INDEX_PERSIST", &value))
                .transpose()?
                .unwrap_or(true),
            index_ttl: Duration::from_secs(parse_optional("INDEX_TTL_SECS")?.unwrap_or(3600)),
            index_reap_interval: Duration::from_secs(
                parse_optional("INDEX_REAP_INTERVAL_SECS")?.unwrap_or(300),
            ),
            server_host: load_env_optional("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            server_port: parse_optional("SERVER_PORT")?.unwrap_or(8000),
            log_file: log_file_path(load_env_optional("DOCQA_LOG_FILE")),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that individual parsers cannot see.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidValue("CHUNK_OVERLAP".into()));
        }
        for (key, value) in [
            ("RETRIEVAL_TOP_K", self.retrieval_top_k),
            ("EMBEDDING_BATCH_SIZE", self.embedding_batch_size),
            ("EMBEDDING_CONCURRENCY", self.embedding_concurrency),
            ("QA_CONCURRENCY", self.qa_concurrency),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(key.into()));
            }
        }
        if self.qa_provider == CompletionProvider::Groq && self.groq_api_keys.is_empty() {
            return Err(ConfigError::MissingVariable("GROQ_API_KEYS".into()));
        }
        Ok(())
    }

    /// Chat model matching the configured completion provider.
    pub fn completion_model(&self) -> &str {
        match self.qa_provider {
            CompletionProvider::OpenAI => &self.qa_model_name,
            CompletionProvider::Groq => &self.groq_model_name,
        }
    }
}

/// Load `.env` (if present) and build the configuration from the process environment.
pub fn load() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    Config::from_env()
}

impl Config {
    /// Log the effective settings, without secrets.
    pub fn log_summary(&self) {
        tracing::info!(
            api_prefix = %self.api_prefix,
            qa_provider = ?self.qa_provider,
            qa_model = %self.completion_model(),
            embedding_model = %self.embedding_model_name,
            chunk_size = self.chunk_size,
            chunk_overlap = self.chunk_overlap,
            groq_keys = self.groq_api_keys.len(),
            index_persist = self.index_persist,
            log_file = %self.log_file.display(),
            "Loaded configuration"
        );
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn log_file_path(value: Option<String>) -> PathBuf {
    value
        .map(|path| PathBuf::from(path.trim()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(key.to_string())),
    }
}

fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl FromStr for CompletionProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "groq" => Ok(Self::Groq),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        api_prefix: DEFAULT_API_PREFIX.into(),
        bearer_token: "secret-token".into(),
        openai_api_key: "sk-test".into(),
        openai_base_url: "http://127.0.0.1:9".into(),
        groq_api_keys: Vec::new(),
        groq_base_url: DEFAULT_GROQ_BASE_URL.into(),
        groq_model_name: DEFAULT_GROQ_MODEL.into(),
        qa_provider: CompletionProvider::OpenAI,
        qa_model_name: DEFAULT_QA_MODEL.into(),
        embedding_model_name: DEFAULT_EMBEDDING_MODEL.into(),
        chunk_size: 600,
        chunk_overlap: 100,
        retrieval_top_k: 4,
        embedding_batch_size: 64,
        embedding_concurrency: 4,
        qa_concurrency: 4,
        download_timeout: Duration::from_secs(20),
        upstream_timeout: Duration::from_secs(60),
        index_dir: PathBuf::from("indexes"),
        index_persist: false,
        index_ttl: Duration::from_secs(3600),
        index_reap_interval: Duration::from_secs(300),
        server_host: "127.0.0.1".into(),
        server_port: 8000,
        log_file: PathBuf::from(DEFAULT_LOG_FILE),
    }
}
