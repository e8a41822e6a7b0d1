//! Configuration management for the server.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL. Rows are kept in memory when absent.
    pub database_url: Option<String>,
    /// Upper bound on pooled PostgreSQL connections
    pub database_max_connections: u32,
    /// Shared sign-in secret. Any secret is accepted when absent.
    pub auth_secret: Option<String>,
    /// JSON file declaring the synchronized tables and bucket rules
    pub sync_rules_path: PathBuf,
    /// Lifetime of issued sync tokens
    pub token_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            database_max_connections: 10,
            auth_secret: None,
            sync_rules_path: PathBuf::from("config/sync_rules.json"),
            token_ttl: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);

        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidPort)?,
            Err(_) => defaults.port,
        };

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
        let database_max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidMaxConnections),
            },
            Err(_) => defaults.database_max_connections,
        };
        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        let sync_rules_path = env::var("SYNC_RULES_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.sync_rules_path);

        let token_ttl = match env::var("TOKEN_TTL_SECS") {
            Ok(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ConfigError::InvalidTokenTtl),
            },
            Err(_) => defaults.token_ttl,
        };

        Ok(Self {
            host,
            port,
            database_url,
            database_max_connections,
            auth_secret,
            sync_rules_path,
            token_ttl,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("DATABASE_MAX_CONNECTIONS must be a positive integer")]
    InvalidMaxConnections,

    #[error("TOKEN_TTL_SECS must be a positive number of seconds")]
    InvalidTokenTtl,
}
