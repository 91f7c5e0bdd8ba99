//! Configuration management for the xuangu services.
//!
//! The screening service reads a single configuration file at
//! `~/.xuangu/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (XUANGU_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `XUANGU_BIND_ADDRESS` → network.bind
//! - `XUANGU_PORT` → server.port
//! - `XUANGU_REDIS_URL` → redis.url
//! - `XUANGU_REDIS_DB` → redis.db
//! - `XUANGU_REDIS_PASSWORD` → redis.password
//! - `XUANGU_REDIS_TIMEOUT` → redis.timeout_secs
//! - `XUANGU_DETAIL_URL` → detail.base_url
//! - `XUANGU_REQUIRE_SESSION` → auth.require_session
//! - `XUANGU_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map_or_else(|| PathBuf::from(".xuangu"), |dirs| dirs.home_dir().join(".xuangu"))
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network / Server
// ============================================================================

/// Global network configuration.
///
/// Default bind address is `127.0.0.1` (local only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Per-request timeout for HTTP handlers
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_port() -> u16 {
    5000
}

fn default_body_limit() -> usize {
    64 * 1024
}

fn default_request_timeout() -> u64 {
    30
}

// ============================================================================
// Redis
// ============================================================================

/// Connection settings for the Redis instance holding the inverted indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL without database or credentials (redis://host:port)
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Logical database number
    #[serde(default = "default_redis_db")]
    pub db: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Bound on connect and on every command round trip
    #[serde(default = "default_redis_timeout")]
    pub timeout_secs: u64,

    /// COUNT hint for incremental SCAN
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            db: default_redis_db(),
            password: None,
            timeout_secs: default_redis_timeout(),
            scan_count: default_scan_count(),
        }
    }
}

impl RedisConfig {
    /// Build the full connection URL including password and database.
    ///
    /// The password is percent-encoded and only applied when `url` carries no
    /// credentials of its own. Any database path already on `url` is replaced.
    pub fn connection_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.url)
            .with_context(|| format!("Invalid Redis URL {}", self.url))?;

        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            if url.password().is_none() {
                url.set_password(Some(password))
                    .map_err(|()| anyhow::anyhow!("Redis URL {} cannot carry a password", self.url))?;
            }
        }
        url.set_path(&format!("/{}", self.db));

        Ok(url.into())
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

fn default_redis_db() -> i64 {
    1
}

fn default_redis_timeout() -> u64 {
    5
}

fn default_scan_count() -> usize {
    1000
}

// ============================================================================
// Screening features
// ============================================================================

/// Theme directory cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemesConfig {
    /// Freshness window of the ranked theme directory
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for ThemesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}

/// External stock analysis service used for single-stock detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailConfig {
    #[serde(default = "default_detail_url")]
    pub base_url: String,

    #[serde(default = "default_detail_timeout")]
    pub timeout_secs: u64,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            base_url: default_detail_url(),
            timeout_secs: default_detail_timeout(),
        }
    }
}

fn default_detail_url() -> String {
    "http://127.0.0.1:8077".into()
}

fn default_detail_timeout() -> u64 {
    10
}

/// Session gate for the screening endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Reject screening requests without a valid `session:{token}` record
    #[serde(default)]
    pub require_session: bool,

    /// Any one of these permission codes grants screening access
    #[serde(default = "default_permission_codes")]
    pub permission_codes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_session: false,
            permission_codes: default_permission_codes(),
        }
    }
}

fn default_permission_codes() -> Vec<String> {
    // "stock:fliter" is a misspelling that exists in deployed role data
    vec![
        "stock:filter".into(),
        "stock:fliter".into(),
        "filter".into(),
    ]
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets pinned to `warn`
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub themes: ThemesConfig,

    #[serde(default)]
    pub detail: DetailConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = var("XUANGU_BIND_ADDRESS") {
            self.network.bind = bind;
        }
        if let Some(port) = var("XUANGU_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        if let Some(url) = var("XUANGU_REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(db) = var("XUANGU_REDIS_DB").and_then(|d| d.parse().ok()) {
            self.redis.db = db;
        }
        if let Some(password) = var("XUANGU_REDIS_PASSWORD") {
            self.redis.password = Some(password);
        }
        if let Some(timeout) = var("XUANGU_REDIS_TIMEOUT").and_then(|t| t.parse().ok()) {
            self.redis.timeout_secs = timeout;
        }

        if let Some(url) = var("XUANGU_DETAIL_URL") {
            self.detail.base_url = url;
        }

        if let Some(flag) = var("XUANGU_REQUIRE_SESSION") {
            self.auth.require_session = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        if let Some(level) = var("XUANGU_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let path = config_path();
        let dir = config_dir();

        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Get the effective bind address.
    pub fn bind_address(&self) -> &str {
        &self.network.bind
    }

    /// Get the HTTP port of the screening service.
    pub fn server_port(&self) -> u16 {
        self.server.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_port(), 5000);
        assert_eq!(config.bind_address(), "127.0.0.1");
        assert_eq!(config.redis.db, 1);
        assert_eq!(config.redis.timeout_secs, 5);
        assert_eq!(config.themes.cache_ttl_secs, 300);
        assert!(!config.auth.require_session);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"redis": {"url": "redis://10.0.0.5:6380"}}"#).unwrap();
        assert_eq!(config.redis.url, "redis://10.0.0.5:6380");
        assert_eq!(config.redis.scan_count, 1000);
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"port": 8081}}, "observability": {{"level": "debug"}}}}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.server_port(), 8081);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_load_from_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("XUANGU_PORT", "9000"),
            ("XUANGU_REDIS_DB", "3"),
            ("XUANGU_REDIS_TIMEOUT", "2"),
            ("XUANGU_REQUIRE_SESSION", "true"),
            ("XUANGU_DETAIL_URL", "http://analysis:8077"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.server_port(), 9000);
        assert_eq!(config.redis.db, 3);
        assert_eq!(config.redis.timeout_secs, 2);
        assert!(config.auth.require_session);
        assert_eq!(config.detail.base_url, "http://analysis:8077");
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|name| (name == "XUANGU_PORT").then(|| "abc".to_string()));
        assert_eq!(config.server_port(), 5000);
    }

    #[test]
    fn test_connection_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.connection_url().unwrap(), "redis://127.0.0.1:6379/1");

        redis.password = Some("s3cret".into());
        redis.db = 0;
        assert_eq!(redis.connection_url().unwrap(), "redis://:s3cret@127.0.0.1:6379/0");
    }

    #[test]
    fn test_connection_url_encodes_password_and_replaces_db() {
        let redis = RedisConfig {
            url: "redis://127.0.0.1:6379/5".into(),
            db: 2,
            password: Some("a/b?c#d".into()),
            ..RedisConfig::default()
        };
        assert_eq!(
            redis.connection_url().unwrap(),
            "redis://:a%2Fb%3Fc%23d@127.0.0.1:6379/2"
        );

        let with_credentials = RedisConfig {
            url: "redis://:inline@cache:6379".into(),
            password: Some("ignored".into()),
            ..RedisConfig::default()
        };
        assert_eq!(
            with_credentials.connection_url().unwrap(),
            "redis://:inline@cache:6379/1"
        );

        let broken = RedisConfig {
            url: "not a url".into(),
            ..RedisConfig::default()
        };
        assert!(broken.connection_url().is_err());
    }
}
