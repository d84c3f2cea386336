//! TOML-based client configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Base URL of a locally running single-tenant BOPTEST server.
pub const DEFAULT_LOCAL_URL: &str = "http://127.0.0.1:5000";

/// Base URL of the hosted multi-tenant BOPTEST-Service deployment.
pub const DEFAULT_SERVICE_URL: &str = "http://api.boptest.net";

/// Retry behavior for the non-idempotent `advance` call.
///
/// `advance` moves the simulation forward by one step. A retried request
/// whose first attempt was applied server-side (only the response got lost)
/// steps the simulation twice, so retries are an explicit opt-in trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Never retry.
    Never,
    /// Retry once, only if the connection could not be established.
    AtMostOnce,
    /// Retry once on connection failures, timeouts and gateway errors.
    Once,
}

/// Top-level client configuration parsed from TOML.
///
/// All fields have defaults matching a local single-tenant server. Load from
/// TOML with [`ClientConfig::from_toml_file`] or use [`ClientConfig::local`]
/// / [`ClientConfig::service`] for the built-in presets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Server root URL, without a trailing service path.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: f64,
    /// Target number of points (samples x signals) per `/results` request.
    pub batch_target_points: usize,
    /// Whether fetched columns are coerced to `f64`.
    pub coerce_numeric: bool,
    /// Retry policy applied to `advance` only.
    pub advance_retry: RetryPolicy,
    /// Base delay before the `advance` retry, in milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LOCAL_URL.to_string(),
            timeout_secs: 30.0,
            batch_target_points: 10_000,
            coerce_numeric: true,
            advance_retry: RetryPolicy::Once,
            retry_backoff_ms: 250,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Field name (e.g., `"timeout_secs"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl ClientConfig {
    /// Returns the preset for a local single-tenant server.
    pub fn local() -> Self {
        Self::default()
    }

    /// Returns the preset for the hosted multi-tenant service.
    pub fn service() -> Self {
        Self {
            base_url: DEFAULT_SERVICE_URL.to_string(),
            ..Self::default()
        }
    }

    /// Returns a copy of this config pointing at another server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["local", "service"];

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "local" => Ok(Self::local()),
            "service" => Ok(Self::service()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Request timeout as a `Duration`.
    ///
    /// Only meaningful on a validated config; out-of-range values saturate
    /// to `Duration::MAX`.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::MAX)
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            errors.push(ConfigError {
                field: "base_url".into(),
                message: format!("must start with http:// or https://, got \"{}\"", self.base_url),
            });
        }
        if !self.timeout_secs.is_finite() || self.timeout_secs <= 0.0 {
            errors.push(ConfigError {
                field: "timeout_secs".into(),
                message: "must be a finite number > 0".into(),
            });
        } else if Duration::try_from_secs_f64(self.timeout_secs).is_err() {
            errors.push(ConfigError {
                field: "timeout_secs".into(),
                message: format!("{} s does not fit in a Duration", self.timeout_secs),
            });
        }
        if self.batch_target_points == 0 {
            errors.push(ConfigError {
                field: "batch_target_points".into(),
                message: "must be > 0".into(),
            });
        }

        errors
    }
}
