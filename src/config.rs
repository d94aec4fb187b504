//! Process-wide configuration, read once at startup.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, then `GENAI__SECTION__FIELD` environment variables.

use crate::keys::{KeyPoolSettings, KeySource};
use crate::resilience::CircuitBreakerConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "GENAI";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub keys: KeysConfig,
    pub breaker: BreakerConfig,
    pub probe: ProbeConfig,
    pub logging: LoggingConfig,
}

/// Status route listener
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Primary key variable; fallbacks are `<env_var>_1`, `<env_var>_2`, ...
    pub env_var: String,
    pub max_fallback_keys: usize,
    pub fallback_enabled: bool,
    pub key_rotation_enabled: bool,
    /// 0 disables the active health check
    pub health_check_interval_secs: u64,
    pub max_errors_before_disable: u32,
    pub key_recovery_time_secs: u64,
    pub rate_limit_cooldown_secs: u64,
    pub max_key_attempts: u32,
    pub key_rotation_delay_ms: u64,
    /// Regex applied to provider messages to spot rate limiting
    pub rate_limit_pattern: Option<String>,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            env_var: "GEMINI_API_KEY".to_string(),
            max_fallback_keys: 10,
            fallback_enabled: true,
            key_rotation_enabled: true,
            health_check_interval_secs: 300,
            max_errors_before_disable: 5,
            key_recovery_time_secs: 300,
            rate_limit_cooldown_secs: 60,
            max_key_attempts: 3,
            key_rotation_delay_ms: 1000,
            rate_limit_pattern: None,
        }
    }
}

/// Defaults for breakers created through the manager
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            recovery_timeout_secs: defaults.recovery_timeout.as_secs(),
            success_threshold: defaults.success_threshold,
            half_open_max_calls: defaults.half_open_max_calls,
        }
    }
}

/// Endpoint used by the active key health check
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load from defaults, the optional file at `path`, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the resilience layer misbehave
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| Error::InvalidInput {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.server.port == 0 {
            return Err(invalid("server.port", "must be non-zero"));
        }
        if self.keys.env_var.trim().is_empty() {
            return Err(invalid("keys.env_var", "must not be empty"));
        }
        if self.keys.max_errors_before_disable == 0 {
            return Err(invalid("keys.max_errors_before_disable", "must be at least 1"));
        }
        if self.keys.max_key_attempts == 0 {
            return Err(invalid("keys.max_key_attempts", "must be at least 1"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(invalid("breaker.failure_threshold", "must be at least 1"));
        }
        if self.breaker.success_threshold == 0 {
            return Err(invalid("breaker.success_threshold", "must be at least 1"));
        }
        if self.breaker.half_open_max_calls == 0 {
            return Err(invalid("breaker.half_open_max_calls", "must be at least 1"));
        }
        if self.probe.timeout_secs == 0 {
            return Err(invalid("probe.timeout_secs", "must be at least 1"));
        }
        if let Err(e) = Url::parse(&self.probe.url) {
            return Err(invalid("probe.url", &e.to_string()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| Error::InvalidInput {
                field: "server.host".to_string(),
                reason: e.to_string(),
            })
    }

    #[must_use]
    pub fn key_source(&self) -> KeySource {
        KeySource::env(self.keys.env_var.clone(), self.keys.max_fallback_keys)
    }

    #[must_use]
    pub const fn key_pool_settings(&self) -> KeyPoolSettings {
        KeyPoolSettings {
            fallback_enabled: self.keys.fallback_enabled,
            key_rotation_enabled: self.keys.key_rotation_enabled,
            max_errors_before_disable: self.keys.max_errors_before_disable,
            key_recovery_time: Duration::from_secs(self.keys.key_recovery_time_secs),
            rate_limit_cooldown: Duration::from_secs(self.keys.rate_limit_cooldown_secs),
        }
    }

    #[must_use]
    pub const fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            success_threshold: self.breaker.success_threshold,
            recovery_timeout: Duration::from_secs(self.breaker.recovery_timeout_secs),
            half_open_max_calls: self.breaker.half_open_max_calls,
        }
    }

    /// `None` when the active health check is switched off
    #[must_use]
    pub const fn health_check_interval(&self) -> Option<Duration> {
        match self.keys.health_check_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    #[must_use]
    pub const fn key_rotation_delay(&self) -> Duration {
        Duration::from_millis(self.keys.key_rotation_delay_ms)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.keys.env_var, "GEMINI_API_KEY");
        assert_eq!(config.keys.max_fallback_keys, 10);
        assert_eq!(config.health_check_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.key_rotation_delay(), Duration::from_secs(1));
        assert_eq!(config.key_pool_settings(), KeyPoolSettings::default());
        assert_eq!(config.breaker_config(), CircuitBreakerConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[keys]
env_var = "OPENAI_API_KEY"
max_key_attempts = 5
health_check_interval_secs = 0

[breaker]
failure_threshold = 2

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.keys.env_var, "OPENAI_API_KEY");
        assert_eq!(config.keys.max_key_attempts, 5);
        assert_eq!(config.health_check_interval(), None);
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.success_threshold, 3);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/genai.toml"))).unwrap();
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_validation_rejects_zero_thresholds() {
        let mut config = Config::default();
        config.breaker.failure_threshold = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidInput { field, .. }) if field == "breaker.failure_threshold"
        ));

        let mut config = Config::default();
        config.keys.max_key_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.probe.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = Config::default();
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }
}
