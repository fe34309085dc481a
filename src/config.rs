//! Env-driven configuration for the service, the CLI and the library.
//!
//! Values are read from the process environment; `dotenv` is loaded on demand
//! by the binaries. Defaults match a stock local inference server.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub const DEFAULT_SAMPLERS: &[&str] = &[
    "Euler a", "Euler", "LMS", "Heun", "DPM2", "DPM2 a", "DPM++ 2S a", "DPM++ 2M", "DPM++ SDE",
    "DPM fast", "DPM adaptive", "LMS Karras", "DPM2 Karras", "DPM2 a Karras", "DPM++ 2S a Karras",
    "DPM++ 2M Karras", "DPM++ SDE Karras", "DDIM", "PLMS",
];

/// Connection info and endpoint paths of the inference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    pub models_path: String,
    pub models_fallback_path: String,
    pub options_path: String,
    pub options_fallback_path: String,
    pub txt2img_path: String,
    pub progress_path: String,
    pub use_auth: bool,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            base_url: "http://127.0.0.1:7860".to_string(),
            models_path: "/sdapi/v1/sd-models".to_string(),
            models_fallback_path: "/api/sd-models".to_string(),
            options_path: "/sdapi/v1/options".to_string(),
            options_fallback_path: "/api/options".to_string(),
            txt2img_path: "/sdapi/v1/txt2img".to_string(),
            progress_path: "/sdapi/v1/progress".to_string(),
            use_auth: false,
            username: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(600),
        }
    }
}

impl ServerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        ServerConfig {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.use_auth = true;
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Join an endpoint path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Credentials to send, or `None` when auth is disabled.
    ///
    /// Fails when auth is enabled but either field is empty, so no request
    /// goes out half-authenticated.
    pub fn credentials(&self) -> AppResult<Option<(&str, &str)>> {
        if !self.use_auth {
            return Ok(None);
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(AppError::Config(
                "SD_USE_AUTH is set but SD_USER or SD_PASS is empty".to_string(),
            ));
        }
        Ok(Some((self.username.as_str(), self.password.as_str())))
    }
}

/// Values used for every request field the caller leaves unset.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    pub sampler: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    pub seed: i64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        GenerationDefaults {
            sampler: "Euler a".to_string(),
            width: 512,
            height: 512,
            steps: 35,
            cfg_scale: 7.0,
            seed: -1,
        }
    }
}

pub struct Config {
    pub server: ServerConfig,
    pub defaults: GenerationDefaults,
    pub samplers: Vec<String>,
    pub output_root: PathBuf,
    pub poll_interval: Duration,
    pub api_host: String,
    pub api_port: String,
}

impl Config {
    pub fn dotenv_load() {
        dotenv::dotenv().ok();
    }

    pub fn new() -> AppResult<Self> {
        let defaults = ServerConfig::default();
        let server = ServerConfig {
            base_url: var_or("SD_URL", &defaults.base_url).trim_end_matches('/').to_string(),
            models_path: var_or("SD_MODELS_PATH", &defaults.models_path),
            models_fallback_path: var_or("SD_MODELS_FALLBACK_PATH", &defaults.models_fallback_path),
            options_path: var_or("SD_OPTIONS_PATH", &defaults.options_path),
            options_fallback_path: var_or("SD_OPTIONS_FALLBACK_PATH", &defaults.options_fallback_path),
            txt2img_path: var_or("SD_TXT2IMG_PATH", &defaults.txt2img_path),
            progress_path: var_or("SD_PROGRESS_PATH", &defaults.progress_path),
            use_auth: parse_bool("SD_USE_AUTH", &var_or("SD_USE_AUTH", "false"))?,
            username: var_or("SD_USER", ""),
            password: var_or("SD_PASS", ""),
            timeout: Duration::from_secs(parse_num("SD_TIMEOUT_SECS", &var_or("SD_TIMEOUT_SECS", "600"))?),
        };

        let samplers = match env::var("SD_SAMPLERS") {
            Ok(list) => parse_samplers(&list),
            Err(_) => DEFAULT_SAMPLERS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Config {
            server,
            defaults: GenerationDefaults::default(),
            samplers,
            output_root: PathBuf::from(var_or("OUTPUT_ROOT", "./streamingAssets")),
            poll_interval: Duration::from_millis(parse_num(
                "SD_POLL_INTERVAL_MS",
                &var_or("SD_POLL_INTERVAL_MS", "500"),
            )?),
            api_host: var_or("API_HOST", "127.0.0.1"),
            api_port: var_or("API_PORT", "8190"),
        })
    }

    pub fn log_env_vars(&self) {
        tracing::info!(
            sd_url = %self.server.base_url,
            use_auth = self.server.use_auth,
            user = if self.server.username.is_empty() { "<unset>" } else { self.server.username.as_str() },
            output_root = %self.output_root.display(),
            poll_ms = self.poll_interval.as_millis() as u64,
            samplers = self.samplers.len(),
            "effective configuration"
        );
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(key: &str, raw: &str) -> AppResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(AppError::Config(format!("{} must be a boolean, got '{}'", key, other))),
    }
}

fn parse_num(key: &str, raw: &str) -> AppResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| AppError::Config(format!("{} must be a non-negative integer, got '{}'", key, raw)))
}

fn parse_samplers(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
