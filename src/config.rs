//! # Configuration
//! `ScorerConfig` with the engine's recognized options and their
//! defaults. Loadable from a JSON file (with `api_key: "ENV"` indirection
//! for secrets) or straight from environment variables; `.env` files are
//! honored in the env path.

use std::time::Duration;
use std::{env, fs, path::Path};

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CHUNK_SIZE: usize = 20;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_S: f64 = 1.5;
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 30.0;
pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: usize = 60;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_backoff_s() -> f64 {
    DEFAULT_RETRY_BACKOFF_S
}
fn default_request_timeout_s() -> f64 {
    DEFAULT_REQUEST_TIMEOUT_S
}
fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}
fn default_rate_limit() -> usize {
    DEFAULT_RATE_LIMIT_PER_MINUTE
}
fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_REQUESTS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// "ENV" means: read from OPENAI_API_KEY.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_s")]
    pub retry_backoff_s: f64,
    #[serde(default = "default_request_timeout_s")]
    pub request_timeout_s: f64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_s: DEFAULT_RETRY_BACKOFF_S,
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
            temperature: DEFAULT_TEMPERATURE,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl ScorerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: ScorerConfig = serde_json::from_str(&data)?;

        // Resolve api key if "ENV"
        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?;
        }

        cfg.sanitize();
        Ok(cfg)
    }

    /// Read configuration from environment variables (with `.env`
    /// support). Unset or unparsable variables fall back to defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut cfg = Self {
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| default_model()),
            chunk_size: env_parse("SCORER_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            max_retries: env_parse("OPENAI_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            retry_backoff_s: env_parse("OPENAI_RETRY_BACKOFF_S", DEFAULT_RETRY_BACKOFF_S),
            request_timeout_s: env_parse("OPENAI_REQUEST_TIMEOUT_S", DEFAULT_REQUEST_TIMEOUT_S),
            temperature: env_parse("OPENAI_TEMPERATURE", DEFAULT_TEMPERATURE),
            rate_limit_per_minute: env_parse(
                "SCORER_RATE_LIMIT_PER_MINUTE",
                DEFAULT_RATE_LIMIT_PER_MINUTE,
            ),
            max_concurrent_requests: env_parse(
                "SCORER_MAX_CONCURRENT_REQUESTS",
                DEFAULT_MAX_CONCURRENT_REQUESTS,
            ),
        };
        cfg.sanitize();
        cfg
    }

    /// Clamp nonsensical values back to workable ones.
    fn sanitize(&mut self) {
        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.max_concurrent_requests == 0 {
            self.max_concurrent_requests = DEFAULT_MAX_CONCURRENT_REQUESTS;
        }
        if !(self.retry_backoff_s.is_finite() && self.retry_backoff_s >= 0.0) {
            self.retry_backoff_s = DEFAULT_RETRY_BACKOFF_S;
        }
        if !(self.request_timeout_s.is_finite() && self.request_timeout_s > 0.0) {
            self.request_timeout_s = DEFAULT_REQUEST_TIMEOUT_S;
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.retry_backoff_s)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_s)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
