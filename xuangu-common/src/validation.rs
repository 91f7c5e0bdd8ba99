//! Configuration validation.
//!
//! Checks that required values are present and within valid ranges before
//! the service binds its listener or opens store connections.

use thiserror::Error;

use crate::config::{Config, DetailConfig, ObservabilityConfig, RedisConfig, ServerConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.server.validate() {
            errors.push(e);
        }
        if let Err(e) = self.redis.validate() {
            errors.push(e);
        }
        if let Err(e) = self.detail.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if self.auth.require_session && self.auth.permission_codes.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "auth.permission_codes".into(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load (with environment overrides) and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "server.port".into(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "server.request_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for RedisConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.url.is_empty() {
            return Err(ValidationError::MissingField {
                field: "redis.url".into(),
            });
        }
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(ValidationError::InvalidValue {
                field: "redis.url".into(),
                reason: "must start with redis:// or rediss://".into(),
            });
        }
        if self.db < 0 {
            return Err(ValidationError::InvalidValue {
                field: "redis.db".into(),
                reason: "must not be negative".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "redis.timeout_secs".into(),
                reason: "store round trips must be bounded".into(),
            });
        }
        if self.scan_count == 0 {
            return Err(ValidationError::InvalidValue {
                field: "redis.scan_count".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for DetailConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ValidationError::InvalidValue {
                field: "detail.base_url".into(),
                reason: "must be an http(s) URL".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test_case("redis://127.0.0.1:6379", true ; "plain")]
    #[test_case("rediss://cache.internal:6380", true ; "tls")]
    #[test_case("http://127.0.0.1:6379", false ; "wrong scheme")]
    #[test_case("", false ; "empty")]
    fn test_redis_url(url: &str, ok: bool) {
        let redis = RedisConfig {
            url: url.into(),
            ..Default::default()
        };
        assert_eq!(redis.validate().is_ok(), ok);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let redis = RedisConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            redis.validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.server.port = 0;
        config.observability.log_format = "xml".into();
        assert!(matches!(config.validate(), Err(ValidationError::Multiple(errors)) if errors.len() == 2));
    }

    #[test]
    fn test_session_gate_requires_codes() {
        let mut config = Config::default();
        config.auth.require_session = true;
        config.auth.permission_codes.clear();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingField { .. })
        ));
    }
}
