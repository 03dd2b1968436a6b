//! Configuration management for Bouncer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::{BouncerError, Result};
use crate::ratelimit::LimitPolicy;

/// Prefix and suffix of the per-token override variables, `TOKEN_<name>_LIMIT`.
const TOKEN_VAR_PREFIX: &str = "TOKEN_";
const TOKEN_VAR_SUFFIX: &str = "_LIMIT";

/// Longest accepted cooldown: one year.
pub const MAX_BLOCK_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Main configuration for the Bouncer service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Which counter store implementation to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process maps; counts are not shared between instances
    Memory,
    /// Redis server shared by every instance
    #[default]
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default)]
    pub redis: RedisConfig,

    /// Upper bound for a single store call, in milliseconds
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis: RedisConfig::default(),
            timeout_ms: default_store_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_timeout() -> u64 {
    2000
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: String::new(),
            db: 0,
        }
    }
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per second allowed for a client identified by IP
    #[serde(default = "default_ip_limit")]
    pub default_ip_limit: u64,

    /// Requests per second allowed for a token without an override
    #[serde(default = "default_token_limit")]
    pub default_token_limit: u64,

    /// Cooldown applied once a limit is exceeded, in seconds
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,

    /// Per-token limits
    #[serde(default)]
    pub token_limits: HashMap<String, u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_ip_limit: default_ip_limit(),
            default_token_limit: default_token_limit(),
            block_duration_secs: default_block_duration(),
            token_limits: HashMap::new(),
        }
    }
}

fn default_ip_limit() -> u64 {
    10
}

fn default_token_limit() -> u64 {
    100
}

fn default_block_duration() -> u64 {
    300
}

impl Settings {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| BouncerError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Overlay environment variables on top of the loaded values.
    ///
    /// Recognised: `SERVER_PORT`, `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`,
    /// `REDIS_DB`, `DEFAULT_IP_LIMIT`, `DEFAULT_TOKEN_LIMIT`,
    /// `BLOCK_DURATION_SECONDS` and `TOKEN_<name>_LIMIT`. Empty values are
    /// skipped.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if value.is_empty() {
                continue;
            }

            match name.as_str() {
                "SERVER_PORT" => self.server.http_addr.set_port(parse_var(&name, &value)?),
                "REDIS_HOST" => self.store.redis.host = value,
                "REDIS_PORT" => self.store.redis.port = parse_var(&name, &value)?,
                "REDIS_PASSWORD" => self.store.redis.password = value,
                "REDIS_DB" => self.store.redis.db = parse_var(&name, &value)?,
                "DEFAULT_IP_LIMIT" => self.rate_limit.default_ip_limit = parse_var(&name, &value)?,
                "DEFAULT_TOKEN_LIMIT" => {
                    self.rate_limit.default_token_limit = parse_var(&name, &value)?
                }
                "BLOCK_DURATION_SECONDS" => {
                    self.rate_limit.block_duration_secs = parse_var(&name, &value)?
                }
                _ => {
                    if let Some(token) = token_from_var(&name) {
                        let limit = parse_var(&name, &value)?;
                        debug!(token = %token, limit = limit, "Token limit from environment");
                        self.rate_limit.token_limits.insert(token.to_string(), limit);
                    }
                }
            }
        }

        Ok(())
    }

    /// Overlay variables from a dotenv file.
    ///
    /// Returns `Ok(false)` when the file does not exist. Call this before
    /// [`Settings::apply_env`] so the process environment wins.
    pub fn apply_env_file(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let iter = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter,
            Err(e) if e.not_found() => {
                debug!(path = %path.display(), "No env file found");
                return Ok(false);
            }
            Err(e) => {
                return Err(BouncerError::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let vars = iter
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BouncerError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        self.apply_env(vars)?;

        debug!(path = %path.display(), "Loaded env file");
        Ok(true)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.block_duration_secs == 0 {
            return Err(BouncerError::Config(
                "block_duration_secs must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.block_duration_secs > MAX_BLOCK_DURATION_SECS {
            return Err(BouncerError::Config(format!(
                "block_duration_secs must be at most {}",
                MAX_BLOCK_DURATION_SECS
            )));
        }
        if self.store.timeout_ms == 0 {
            return Err(BouncerError::Config(
                "store timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Redis && self.store.redis.host.is_empty() {
            return Err(BouncerError::Config("redis host is required".to_string()));
        }
        Ok(())
    }

    /// Build the immutable limit policy.
    pub fn policy(&self) -> LimitPolicy {
        LimitPolicy {
            default_ip_limit: self.rate_limit.default_ip_limit,
            default_token_limit: self.rate_limit.default_token_limit,
            block_duration: Duration::from_secs(self.rate_limit.block_duration_secs),
            token_overrides: self.rate_limit.token_limits.clone(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| BouncerError::Config(format!("Invalid value for {}: {:?} ({})", name, value, e)))
}

fn token_from_var(name: &str) -> Option<&str> {
    name.strip_prefix(TOKEN_VAR_PREFIX)?
        .strip_suffix(TOKEN_VAR_SUFFIX)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.http_addr.port(), 8080);
        assert_eq!(settings.store.backend, StoreBackend::Redis);
        assert_eq!(settings.store.redis.port, 6379);
        assert_eq!(settings.rate_limit.default_ip_limit, 10);
        assert_eq!(settings.rate_limit.default_token_limit, 100);
        assert_eq!(settings.rate_limit.block_duration_secs, 300);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  http_addr: 127.0.0.1:9000
store:
  backend: memory
  timeout_ms: 500
rate_limit:
  default_ip_limit: 3
  block_duration_secs: 10
  token_limits:
    abc123: 50
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.server.http_addr.port(), 9000);
        assert_eq!(settings.store.backend, StoreBackend::Memory);
        assert_eq!(settings.store.timeout(), Duration::from_millis(500));
        assert_eq!(settings.rate_limit.default_ip_limit, 3);
        assert_eq!(settings.rate_limit.default_token_limit, 100);

        let policy = settings.policy();
        assert_eq!(policy.block_duration, Duration::from_secs(10));
        assert_eq!(policy.token_overrides.get("abc123"), Some(&50));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = Settings::from_yaml("rate_limit: [not, a, map]");
        assert!(matches!(result, Err(BouncerError::Config(_))));
    }

    #[test]
    fn test_apply_env() {
        let mut settings = Settings::default();
        settings
            .apply_env(vars(&[
                ("SERVER_PORT", "9090"),
                ("REDIS_HOST", "cache.internal"),
                ("REDIS_DB", "2"),
                ("DEFAULT_IP_LIMIT", "5"),
                ("BLOCK_DURATION_SECONDS", "60"),
                ("TOKEN_AbC123_LIMIT", "50"),
                ("REDIS_PASSWORD", ""),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();

        assert_eq!(settings.server.http_addr.port(), 9090);
        assert_eq!(settings.store.redis.host, "cache.internal");
        assert_eq!(settings.store.redis.db, 2);
        assert_eq!(settings.rate_limit.default_ip_limit, 5);
        assert_eq!(settings.rate_limit.block_duration_secs, 60);
        assert_eq!(settings.rate_limit.token_limits.get("AbC123"), Some(&50));
        assert!(settings.store.redis.password.is_empty());
    }

    #[test]
    fn test_apply_env_rejects_bad_numbers() {
        let mut settings = Settings::default();
        let result = settings.apply_env(vars(&[("DEFAULT_IP_LIMIT", "lots")]));
        assert!(matches!(result, Err(BouncerError::Config(_))));
    }

    #[test]
    fn test_token_from_var() {
        assert_eq!(token_from_var("TOKEN_abc_LIMIT"), Some("abc"));
        assert_eq!(token_from_var("TOKEN__LIMIT"), None);
        assert_eq!(token_from_var("TOKEN_abc"), None);
        assert_eq!(token_from_var("DEFAULT_TOKEN_LIMIT"), None);
    }

    #[test]
    fn test_validate_rejects_zero_block() {
        let mut settings = Settings::default();
        settings.rate_limit.block_duration_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_block() {
        let mut settings = Settings::default();
        settings
            .apply_env(vars(&[("BLOCK_DURATION_SECONDS", &u64::MAX.to_string())]))
            .unwrap();
        assert!(matches!(settings.validate(), Err(BouncerError::Config(_))));

        settings.rate_limit.block_duration_secs = MAX_BLOCK_DURATION_SECS;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_apply_env_file() {
        let path = std::env::temp_dir().join(format!("bouncer-test-{}.env", std::process::id()));
        std::fs::write(
            &path,
            "# local overrides\nDEFAULT_IP_LIMIT=7\nREDIS_HOST=cache.local\nTOKEN_abc_LIMIT=42\n",
        )
        .unwrap();

        let mut settings = Settings::default();
        let loaded = settings.apply_env_file(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(loaded.unwrap());
        assert_eq!(settings.rate_limit.default_ip_limit, 7);
        assert_eq!(settings.store.redis.host, "cache.local");
        assert_eq!(settings.rate_limit.token_limits.get("abc"), Some(&42));
    }

    #[test]
    fn test_apply_env_file_missing_is_skipped() {
        let mut settings = Settings::default();
        let loaded = settings.apply_env_file("/nonexistent/bouncer/.env").unwrap();
        assert!(!loaded);
        assert_eq!(settings.rate_limit.default_ip_limit, 10);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut settings = Settings::default();
        settings.store.timeout_ms = 0;
        assert!(settings.validate().is_err());
    }
}
