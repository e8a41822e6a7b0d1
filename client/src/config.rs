//! Configuration management for the sync client.

use std::env;
use std::time::Duration;

use tidepool_engine::RetryPolicy;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SQLite URL of the local store
    pub database_url: String,
    /// Base URL of the remote row store
    pub endpoint: String,
    /// Minimum interval between non-forced connect attempts
    pub connect_cooldown: Duration,
    /// Upper bound for a single remote call
    pub request_timeout: Duration,
    /// Backoff for transient upload failures
    pub retry: RetryPolicy,
    /// Refresh sessions this long before they expire
    pub session_refresh_margin: Duration,
    /// Periodic download while idle (`None` disables it)
    pub download_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tidepool.db".to_string(),
            endpoint: "http://localhost:3000".to_string(),
            connect_cooldown: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            session_refresh_margin: Duration::from_secs(30),
            download_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url =
            env::var("TIDEPOOL_DATABASE_URL").unwrap_or(defaults.database_url);
        let endpoint = env::var("TIDEPOOL_ENDPOINT").unwrap_or(defaults.endpoint);

        let connect_cooldown =
            millis_var("TIDEPOOL_CONNECT_COOLDOWN_MS")?.unwrap_or(defaults.connect_cooldown);
        let request_timeout =
            millis_var("TIDEPOOL_REQUEST_TIMEOUT_MS")?.unwrap_or(defaults.request_timeout);
        let session_refresh_margin = millis_var("TIDEPOOL_SESSION_REFRESH_MARGIN_MS")?
            .unwrap_or(defaults.session_refresh_margin);

        let retry = RetryPolicy {
            base: millis_var("TIDEPOOL_RETRY_BASE_MS")?.unwrap_or(defaults.retry.base),
            cap: millis_var("TIDEPOOL_RETRY_CAP_MS")?.unwrap_or(defaults.retry.cap),
            persistent_failure_after: match env::var("TIDEPOOL_PERSISTENT_FAILURE_AFTER") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| ConfigError::Invalid("TIDEPOOL_PERSISTENT_FAILURE_AFTER"))?,
                Err(_) => defaults.retry.persistent_failure_after,
            },
        };

        let download_interval = match millis_var("TIDEPOOL_DOWNLOAD_INTERVAL_MS")? {
            Some(d) if d.is_zero() => None,
            Some(d) => Some(d),
            None => defaults.download_interval,
        };

        if retry.base > retry.cap {
            return Err(ConfigError::Invalid("TIDEPOOL_RETRY_BASE_MS"));
        }

        Ok(Self {
            database_url,
            endpoint,
            connect_cooldown,
            request_timeout,
            retry,
            session_refresh_margin,
            download_interval,
        })
    }
}

fn millis_var(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_cooldown, Duration::from_secs(5));
        assert_eq!(config.retry.cap, Duration::from_secs(30));
        assert_eq!(config.download_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn millis_parsing() {
        env::set_var("TIDEPOOL_TEST_MILLIS_OK", "250");
        env::set_var("TIDEPOOL_TEST_MILLIS_BAD", "soon");

        assert_eq!(
            millis_var("TIDEPOOL_TEST_MILLIS_OK").unwrap(),
            Some(Duration::from_millis(250))
        );
        assert!(millis_var("TIDEPOOL_TEST_MILLIS_BAD").is_err());
        assert_eq!(millis_var("TIDEPOOL_TEST_MILLIS_UNSET").unwrap(), None);
    }
}
