//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::money::parse_decimal;
use crate::reconcile::EnginePolicy;

/// Where events and audit entries are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// An accepted API key. Only the SHA-256 of the secret is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyConfig {
    /// Stable id derived from the key name
    pub id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub permissions: Vec<String>,
}

impl ApiKeyConfig {
    pub fn new(name: &str, key_hash: &str, permissions: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()),
            name: name.to_string(),
            key_hash: key_hash.to_ascii_lowercase(),
            permissions,
        }
    }

    /// `admin` implies every other permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p == permission || p == "admin")
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,

    /// Database connection URL (required for the postgres backend)
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    pub host: String,
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Bound on every persistence call
    pub store_timeout: Duration,

    /// Optimistic-concurrency attempts per command
    pub max_write_attempts: u32,

    pub policy: EnginePolicy,

    pub api_keys: Vec<ApiKeyConfig>,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: None,
            database_max_connections: 10,
            host: "127.0.0.1".to_string(),
            port: 3000,
            environment: "development".to_string(),
            store_timeout: Duration::from_millis(5000),
            max_write_attempts: 3,
            policy: EnginePolicy::default(),
            api_keys: Vec::new(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let store_backend = match var("STORE_BACKEND", "postgres").to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            _ => return Err(ConfigError::InvalidValue("STORE_BACKEND")),
        };

        let database_url = lookup("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        let database_max_connections = var("DATABASE_MAX_CONNECTIONS", "10")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = var("HOST", "127.0.0.1");

        let port = var("PORT", "3000")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let environment = var("ENVIRONMENT", "development");

        let store_timeout_ms: u64 = var("STORE_TIMEOUT_MS", "5000")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("STORE_TIMEOUT_MS"))?;
        if store_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("STORE_TIMEOUT_MS"));
        }

        let max_write_attempts: u32 = var("MAX_WRITE_ATTEMPTS", "3")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("MAX_WRITE_ATTEMPTS"))?;
        if max_write_attempts == 0 {
            return Err(ConfigError::InvalidValue("MAX_WRITE_ATTEMPTS"));
        }

        let default_commission_rate = parse_decimal(&var("DEFAULT_COMMISSION_RATE", "5"))
            .map_err(|_| ConfigError::InvalidValue("DEFAULT_COMMISSION_RATE"))?;
        if default_commission_rate < Decimal::ZERO || default_commission_rate > Decimal::ONE_HUNDRED {
            return Err(ConfigError::InvalidValue("DEFAULT_COMMISSION_RATE"));
        }

        let overdue_after_days: i64 = var("OVERDUE_AFTER_DAYS", "30")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("OVERDUE_AFTER_DAYS"))?;
        if overdue_after_days < 0 {
            return Err(ConfigError::InvalidValue("OVERDUE_AFTER_DAYS"));
        }

        let api_keys = parse_api_keys(&var("API_KEYS", ""))?;

        let log_format = match var("LOG_FORMAT", "text").to_ascii_lowercase().as_str() {
            "text" | "pretty" => LogFormat::Text,
            "json" => LogFormat::Json,
            _ => return Err(ConfigError::InvalidValue("LOG_FORMAT")),
        };

        let config = Self {
            store_backend,
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            store_timeout: Duration::from_millis(store_timeout_ms),
            max_write_attempts,
            policy: EnginePolicy {
                default_commission_rate,
                overdue_after_days,
            },
            api_keys,
            log_format,
        };

        if config.is_production() && config.api_keys.is_empty() {
            return Err(ConfigError::MissingEnv("API_KEYS"));
        }

        Ok(config)
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Authentication is skipped only when no key is configured outside production
    pub fn auth_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

/// Parse `name:sha256hex:perm1|perm2,...`
fn parse_api_keys(raw: &str) -> Result<Vec<ApiKeyConfig>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let name = parts.next().unwrap_or_default().trim();
            let hash = parts.next().unwrap_or_default().trim();
            let perms = parts.next().unwrap_or_default();

            let hash_ok = hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit());
            if name.is_empty() || !hash_ok {
                return Err(ConfigError::InvalidValue("API_KEYS"));
            }

            let permissions = perms
                .split('|')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            Ok(ApiKeyConfig::new(name, hash, permissions))
        })
        .collect()
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
