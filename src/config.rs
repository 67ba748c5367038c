//! Process-level configuration loaded from the environment.
//!
//! This is the ambient counterpart to the scenario file (`loader.rs`): it covers
//! knobs that apply to the whole process rather than to a single run — where the
//! engine's own `/metrics` endpoint listens, how verbose logging is, the default
//! adapter timeouts and mTLS material a scenario can omit and fall back to.

use std::env;
use thiserror::Error;
use tokio::time::Duration;

use crate::utils::parse_duration_or_seconds;

/// Configuration errors with descriptive messages.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("mTLS configuration incomplete: both CLIENT_CERT_PATH and CLIENT_KEY_PATH must be set together, or neither")]
    IncompleteMtls,

    #[error("Invalid duration format for {var}: {message}")]
    InvalidDuration { var: String, message: String },
}

/// Process-wide configuration for the engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the engine's own `/metrics` Prometheus endpoint binds to.
    pub metrics_port: u16,

    /// Default per-request HTTP adapter timeout, used when a step doesn't override it.
    pub default_http_timeout: Duration,

    /// Default per-request SQL adapter timeout.
    pub default_sql_timeout: Duration,

    /// History retention window; records older than this are swept on `cleanup`.
    pub retention_days: u32,

    /// Grace window the driver allows in-flight requests after cancellation.
    pub cancellation_grace: Duration,

    /// Default adapter-level settings, applied unless a scenario step overrides them.
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub custom_headers: Option<String>,
}

/// Helper to parse an environment variable with a default value.
fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Helper to parse a boolean environment variable.
fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .to_lowercase()
        == "true"
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let metrics_port: u16 = env_parse_or("METRICS_PORT", 9898)?;

        let default_http_timeout_str =
            env::var("DEFAULT_HTTP_TIMEOUT").unwrap_or_else(|_| "30s".to_string());
        let default_http_timeout =
            parse_duration_or_seconds(&default_http_timeout_str).map_err(|e| {
                ConfigError::InvalidDuration {
                    var: "DEFAULT_HTTP_TIMEOUT".into(),
                    message: e,
                }
            })?;

        let default_sql_timeout_str =
            env::var("DEFAULT_SQL_TIMEOUT").unwrap_or_else(|_| "30s".to_string());
        let default_sql_timeout =
            parse_duration_or_seconds(&default_sql_timeout_str).map_err(|e| {
                ConfigError::InvalidDuration {
                    var: "DEFAULT_SQL_TIMEOUT".into(),
                    message: e,
                }
            })?;

        let retention_days: u32 = env_parse_or("HISTORY_RETENTION_DAYS", 90)?;

        let cancellation_grace_str =
            env::var("CANCELLATION_GRACE").unwrap_or_else(|_| "5s".to_string());
        let cancellation_grace =
            parse_duration_or_seconds(&cancellation_grace_str).map_err(|e| {
                ConfigError::InvalidDuration {
                    var: "CANCELLATION_GRACE".into(),
                    message: e,
                }
            })?;

        let skip_tls_verify = env_bool("SKIP_TLS_VERIFY", false);
        let resolve_target_addr = env::var("RESOLVE_TARGET_ADDR").ok();
        let client_cert_path = env::var("CLIENT_CERT_PATH").ok();
        let client_key_path = env::var("CLIENT_KEY_PATH").ok();
        let custom_headers = env::var("CUSTOM_HEADERS").ok();

        let config = Config {
            metrics_port,
            default_http_timeout,
            default_sql_timeout,
            retention_days,
            cancellation_grace,
            skip_tls_verify,
            resolve_target_addr,
            client_cert_path,
            client_key_path,
            custom_headers,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for consistency and correctness.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics_port == 0 {
            return Err(ConfigError::InvalidValue {
                var: "METRICS_PORT".into(),
                message: "Must be greater than 0".into(),
            });
        }

        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::IncompleteMtls);
        }

        Ok(())
    }

    /// Creates a default Config for testing purposes.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Config {
            metrics_port: 9898,
            default_http_timeout: Duration::from_secs(30),
            default_sql_timeout: Duration::from_secs(30),
            retention_days: 90,
            cancellation_grace: Duration::from_secs(5),
            skip_tls_verify: false,
            resolve_target_addr: None,
            client_cert_path: None,
            client_key_path: None,
            custom_headers: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env_vars() {
        let vars = [
            "METRICS_PORT",
            "DEFAULT_HTTP_TIMEOUT",
            "DEFAULT_SQL_TIMEOUT",
            "HISTORY_RETENTION_DAYS",
            "CANCELLATION_GRACE",
            "SKIP_TLS_VERIFY",
            "RESOLVE_TARGET_ADDR",
            "CLIENT_CERT_PATH",
            "CLIENT_KEY_PATH",
            "CUSTOM_HEADERS",
        ];
        for var in vars {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_with_no_env() {
        clear_env_vars();

        let config = Config::from_env().unwrap();
        assert_eq!(config.metrics_port, 9898);
        assert_eq!(config.default_http_timeout, Duration::from_secs(30));
        assert_eq!(config.default_sql_timeout, Duration::from_secs(30));
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.cancellation_grace, Duration::from_secs(5));
        assert!(!config.skip_tls_verify);
        assert!(config.resolve_target_addr.is_none());

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn custom_metrics_port() {
        clear_env_vars();

        env::set_var("METRICS_PORT", "9100");
        let config = Config::from_env().unwrap();
        assert_eq!(config.metrics_port, 9100);

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn bare_integer_timeout_is_seconds() {
        clear_env_vars();

        env::set_var("DEFAULT_HTTP_TIMEOUT", "45");
        let config = Config::from_env().unwrap();
        assert_eq!(config.default_http_timeout, Duration::from_secs(45));

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn retention_days_override() {
        clear_env_vars();

        env::set_var("HISTORY_RETENTION_DAYS", "30");
        let config = Config::from_env().unwrap();
        assert_eq!(config.retention_days, 30);

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn zero_metrics_port_returns_error() {
        clear_env_vars();

        env::set_var("METRICS_PORT", "0");
        let result = Config::from_env();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { ref var, .. } if var == "METRICS_PORT"
        ));

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn incomplete_mtls_cert_only_returns_error() {
        clear_env_vars();

        env::set_var("CLIENT_CERT_PATH", "/path/to/cert.pem");
        let result = Config::from_env();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::IncompleteMtls));

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn incomplete_mtls_key_only_returns_error() {
        clear_env_vars();

        env::set_var("CLIENT_KEY_PATH", "/path/to/key.pem");
        let result = Config::from_env();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::IncompleteMtls));

        clear_env_vars();
    }

    #[test]
    fn for_testing_creates_valid_config() {
        let config = Config::for_testing();
        assert_eq!(config.metrics_port, 9898);
        assert!(!config.skip_tls_verify);
    }
}
