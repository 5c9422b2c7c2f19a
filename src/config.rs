//! Configuration management for autoinno.
//!
//! Configuration is read once at startup from environment variables (a `.env`
//! file in the working directory is loaded first, if present):
//! - `OPENAI_API_KEY` - Required. API key for the chat-completions endpoint.
//! - `TAVILY_API_KEY` - Required. API key for the Tavily search API.
//! - `OPENAI_BASE_URL` - Optional. Defaults to `https://api.openai.com/v1`.
//! - `DEFAULT_MODEL` - Optional. Defaults to `gpt-3.5-turbo-0125`.
//! - `TEMPERATURE` - Optional. Sampling temperature. Defaults to `0`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `MAX_ITERATIONS` - Optional. Model calls allowed per agent invocation. Defaults to `15`.
//! - `PARSE_RETRIES` - Optional. Re-prompts allowed for malformed model output. Defaults to `3`.
//! - `SEARCH_MAX_RESULTS` - Optional. Results returned by the search tool. Defaults to `5`.
//! - `DEFAULT_ITERATIONS` - Optional. Follow-up steps in iteration mode. Defaults to `3`.
//! - `INSTRUCTIONS_FILE` - Optional. YAML list of seed instructions.
//! - `TRACING_ENDPOINT` / `TRACING_API_KEY` - Optional. Passed through untouched.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::agent::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-0125";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read instructions file {path}: {message}")]
    InstructionsFile { path: PathBuf, message: String },
}

/// External tracing sink settings. Nothing here is validated.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl TracingSink {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat-completions API key
    pub api_key: String,

    /// Base URL of the OpenAI-compatible API
    pub base_url: String,

    /// Tavily search API key
    pub search_api_key: String,

    /// Model identifier
    pub default_model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum model calls inside a single agent invocation
    pub max_iterations: usize,

    /// Re-prompt policy for malformed model output
    pub retry: RetryPolicy,

    /// Results requested from the search API
    pub search_max_results: usize,

    /// Default follow-up count for iteration mode
    pub default_iterations: u32,

    /// Seed instruction list; `None` uses the built-in list
    pub instructions: Option<Vec<String>>,

    pub tracing: TracingSink,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENAI_API_KEY` or `TAVILY_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let api_key = required("OPENAI_API_KEY")?;
        let search_api_key = required("TAVILY_API_KEY")?;

        let base_url = std::env::var("OPENAI_BASE_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let default_model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let temperature = parsed("TEMPERATURE", 0.0f32)?;
        let port = parsed("PORT", 3000u16)?;
        let max_iterations = parsed("MAX_ITERATIONS", 15usize)?;
        let parse_retries = parsed("PARSE_RETRIES", 3u32)?;
        let search_max_results = parsed("SEARCH_MAX_RESULTS", 5usize)?;
        let default_iterations = parsed("DEFAULT_ITERATIONS", 3u32)?;

        let instructions = std::env::var("INSTRUCTIONS_FILE")
            .ok()
            .map(|p| load_instructions(Path::new(&p)))
            .transpose()?;

        let tracing = TracingSink {
            endpoint: std::env::var("TRACING_ENDPOINT").ok(),
            api_key: std::env::var("TRACING_API_KEY").ok(),
        };

        Ok(Self {
            api_key,
            base_url,
            search_api_key,
            default_model,
            temperature,
            host,
            port,
            max_iterations,
            retry: RetryPolicy {
                max_attempts: parse_retries,
                ..RetryPolicy::default()
            },
            search_max_results,
            default_iterations,
            instructions,
            tracing,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, search_api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            search_api_key,
            default_model,
            temperature: 0.0,
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_iterations: 15,
            retry: RetryPolicy {
                base_delay: Duration::ZERO,
                ..RetryPolicy::default()
            },
            search_max_results: 5,
            default_iterations: 3,
            instructions: None,
            tracing: TracingSink::default(),
        }
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

/// Read a YAML sequence of instruction strings.
pub fn load_instructions(path: &Path) -> Result<Vec<String>, ConfigError> {
    let err = |message: String| ConfigError::InstructionsFile {
        path: path.to_path_buf(),
        message,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
    let list: Vec<String> = serde_yaml::from_str(&contents).map_err(|e| err(e.to_string()))?;
    if list.is_empty() {
        return Err(err("instruction list is empty".to_string()));
    }
    Ok(list)
}
