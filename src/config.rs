//! Process configuration from environment variables (and `.env` when present).

use chrono::Duration;
use std::env;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable '{0}'")]
    Missing(&'static str),

    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub cancellation_window: Duration,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db_max_connections", &self.db_max_connections)
            .field("cancellation_window_secs", &self.cancellation_window.num_seconds())
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| get(name).filter(|v| !v.is_empty()).ok_or(ConfigError::Missing(name));
        let parsed = |name: &'static str, default: &str| -> Result<i64, ConfigError> {
            get(name).unwrap_or_else(|| default.to_string()).trim().parse::<i64>()
                .map_err(|e| ConfigError::Invalid { name, reason: e.to_string() })
        };

        let port = u16::try_from(parsed("PORT", "8083")?)
            .map_err(|e| ConfigError::Invalid { name: "PORT", reason: e.to_string() })?;
        let db_max_connections = u32::try_from(parsed("DB_MAX_CONNECTIONS", "10")?)
            .ok().filter(|n| *n > 0)
            .ok_or_else(|| ConfigError::Invalid { name: "DB_MAX_CONNECTIONS", reason: "must be a positive integer".into() })?;
        let window_secs = parsed("CANCELLATION_WINDOW_SECS", "300")?;
        if window_secs < 0 {
            return Err(ConfigError::Invalid { name: "CANCELLATION_WINDOW_SECS", reason: "must not be negative".into() });
        }

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            database_url: required("DATABASE_URL")?,
            db_max_connections,
            jwt_secret: required("JWT_SECRET")?,
            cancellation_window: Duration::seconds(window_secs),
        })
    }

    pub fn bind_address(&self) -> String { format!("{}:{}", self.host, self.port) }
}
