//! Configuration management for Noteguard.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::error::{NoteguardError, Result};
use crate::ratelimit::{
    RateLimiterConfig, DEFAULT_MAX_REQUESTS, DEFAULT_SWEEP_INTERVAL, DEFAULT_WINDOW,
};
use crate::tokens::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, TRUNCATION_MARKER};

/// Prefix for environment overrides, e.g. `NOTEGUARD__RATE_LIMITING__MAX_REQUESTS`.
const ENV_PREFIX: &str = "NOTEGUARD";
/// Bare variable that sets the token budget.
const MAX_TOKENS_ENV: &str = "MAX_TOKENS";

/// Main configuration for Noteguard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteguardConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Truncation configuration
    #[serde(default)]
    pub truncation: TruncationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests admitted per key per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Seconds between sweeps of expired entries
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RateLimitingConfig {
    /// Validate and convert into a limiter config.
    pub fn to_limiter_config(&self) -> Result<RateLimiterConfig> {
        RateLimiterConfig::with_sweep_interval(
            Duration::from_millis(self.window_ms),
            self.max_requests,
            Duration::from_secs(self.sweep_interval_secs),
        )
    }
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW.as_millis() as u64
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

/// Truncation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    /// Default token budget
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Text appended when truncation happens
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Model whose tokenizer measures text
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            marker: default_marker(),
            model: default_model(),
        }
    }
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

fn default_marker() -> String {
    TRUNCATION_MARKER.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NoteguardConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        info!(path = %path, "Loading configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: NoteguardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| NoteguardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer an optional file, `NOTEGUARD__*` variables and `MAX_TOKENS`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path, "Loading configuration");
            builder = builder.add_source(config::File::with_name(path));
        }

        let config: NoteguardConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("truncation.max_tokens", std::env::var(MAX_TOKENS_ENV).ok())?
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check the values that cannot be expressed through serde defaults.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.to_limiter_config()?;
        if self.truncation.max_tokens == 0 {
            return Err(NoteguardError::Config(
                "truncation.max_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NoteguardConfig::default();
        assert_eq!(config.rate_limiting.window_ms, 15 * 60 * 1000);
        assert_eq!(config.rate_limiting.max_requests, 200);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 60);
        assert_eq!(config.truncation.max_tokens, 20_000);
        assert_eq!(config.truncation.marker, "\n\n[Response truncated due to length]");
        assert_eq!(config.truncation.model, "gpt-4");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
rate_limiting:
  window_ms: 1000
  max_requests: 2
truncation:
  max_tokens: 500
"#;
        let config = NoteguardConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limiting.window_ms, 1000);
        assert_eq!(config.rate_limiting.max_requests, 2);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 60);
        assert_eq!(config.truncation.max_tokens, 500);
        assert_eq!(config.truncation.model, "gpt-4");

        let limiter = config.rate_limiting.to_limiter_config().unwrap();
        assert_eq!(limiter.window(), Duration::from_secs(1));
        assert_eq!(limiter.max_requests(), 2);
    }

    #[test]
    fn test_zero_quota_rejected() {
        let yaml = r#"
rate_limiting:
  max_requests: 0
"#;
        assert!(matches!(
            NoteguardConfig::from_yaml(yaml),
            Err(NoteguardError::Config(_))
        ));
    }

    #[test]
    fn test_zero_token_budget_rejected() {
        let yaml = r#"
truncation:
  max_tokens: 0
"#;
        assert!(NoteguardConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        assert!(matches!(
            NoteguardConfig::from_yaml("rate_limiting: [1, 2"),
            Err(NoteguardError::Config(_))
        ));
    }

    /// Serializes tests that touch process environment variables.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    /// Holds `ENV_LOCK`, clears every variable `load` reads and restores
    /// them on drop.
    struct ScopedEnv {
        _lock: parking_lot::MutexGuard<'static, ()>,
        saved: Vec<(String, String)>,
    }

    impl ScopedEnv {
        fn clean() -> Self {
            let lock = ENV_LOCK.lock();
            let saved: Vec<(String, String)> = std::env::vars()
                .filter(|(k, _)| k == MAX_TOKENS_ENV || k.starts_with(ENV_PREFIX))
                .collect();
            for (key, _) in &saved {
                std::env::remove_var(key);
            }
            Self { _lock: lock, saved }
        }

        fn set(&self, key: &str, value: &str) {
            std::env::set_var(key, value);
        }
    }

    impl Drop for ScopedEnv {
        fn drop(&mut self) {
            let touched: Vec<String> = std::env::vars()
                .map(|(k, _)| k)
                .filter(|k| k == MAX_TOKENS_ENV || k.starts_with(ENV_PREFIX))
                .collect();
            for key in touched {
                std::env::remove_var(key);
            }
            for (key, value) in &self.saved {
                std::env::set_var(key, value);
            }
        }
    }

    /// Write `contents` to a uniquely named YAML file in the temp dir.
    fn write_yaml(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "noteguard-{}-{}.yaml",
            std::process::id(),
            name
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    const LAYERED_YAML: &str = r#"
rate_limiting:
  window_ms: 1000
  max_requests: 7
truncation:
  max_tokens: 500
  model: gpt-3.5-turbo
"#;

    #[test]
    fn test_from_file_reads_yaml() {
        let path = write_yaml("from-file", LAYERED_YAML);

        let config = NoteguardConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.rate_limiting.window_ms, 1000);
        assert_eq!(config.rate_limiting.max_requests, 7);
        assert_eq!(config.truncation.max_tokens, 500);
        assert_eq!(config.truncation.model, "gpt-3.5-turbo");

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let result = NoteguardConfig::from_file("/nonexistent/noteguard/config.yaml");
        assert!(matches!(result, Err(NoteguardError::Io(_))));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let _env = ScopedEnv::clean();

        let config = NoteguardConfig::load(None).unwrap();
        assert_eq!(config.truncation.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.rate_limiting.max_requests, DEFAULT_MAX_REQUESTS);
        assert_eq!(config.rate_limiting.window_ms, DEFAULT_WINDOW.as_millis() as u64);
    }

    #[test]
    fn test_load_reads_file_layer() {
        let _env = ScopedEnv::clean();
        let path = write_yaml("file-layer", LAYERED_YAML);

        let config = NoteguardConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.rate_limiting.window_ms, 1000);
        assert_eq!(config.rate_limiting.max_requests, 7);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 60);
        assert_eq!(config.truncation.max_tokens, 500);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_env_overrides_file() {
        let env = ScopedEnv::clean();
        let path = write_yaml("env-layer", LAYERED_YAML);

        env.set("NOTEGUARD__RATE_LIMITING__WINDOW_MS", "4242");
        env.set("NOTEGUARD__RATE_LIMITING__MAX_REQUESTS", "9");
        env.set(MAX_TOKENS_ENV, "123");

        let config = NoteguardConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.rate_limiting.window_ms, 4242);
        assert_eq!(config.rate_limiting.max_requests, 9);
        assert_eq!(config.truncation.max_tokens, 123);
        // Untouched by the environment.
        assert_eq!(config.truncation.model, "gpt-3.5-turbo");

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_env_without_file() {
        let env = ScopedEnv::clean();
        env.set(MAX_TOKENS_ENV, "64");

        let config = NoteguardConfig::load(None).unwrap();
        assert_eq!(config.truncation.max_tokens, 64);
        assert_eq!(config.rate_limiting.max_requests, DEFAULT_MAX_REQUESTS);
    }

    #[test]
    fn test_load_validates_env_values() {
        let env = ScopedEnv::clean();
        env.set(MAX_TOKENS_ENV, "0");

        assert!(matches!(
            NoteguardConfig::load(None),
            Err(NoteguardError::Config(_))
        ));
    }
}
