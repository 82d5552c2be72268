//! Core configuration types and loading.

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;
use super::validation::{ValidationError, validate};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Exporter configuration.
///
/// Resolved once at startup: defaults, then the optional TOML file, then
/// environment variables. Immutable afterwards.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Database host name or address.
    pub db_host: String,
    /// Database TCP port.
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    /// Database (schema) name; also scopes the `db_size` query.
    pub db_name: String,
    /// Seconds between collection ticks.
    pub sleep_interval: u64,
    /// Port of the `/metrics` endpoint.
    pub server_port: u16,
    /// Seconds allowed for establishing a database session.
    pub connect_timeout: u64,
    /// Seconds allowed for a single metric group query.
    pub query_timeout: u64,
    /// Upper bound in seconds for the reconnect backoff.
    pub reconnect_backoff_max: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_host: default_db_host(),
            db_port: default_db_port(),
            db_user: default_db_user(),
            db_password: default_db_password(),
            db_name: default_db_name(),
            sleep_interval: default_sleep_interval(),
            server_port: default_server_port(),
            connect_timeout: default_connect_timeout(),
            query_timeout: default_query_timeout(),
            reconnect_backoff_max: default_reconnect_backoff_max(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field("db_password", &"<redacted>")
            .field("db_name", &self.db_name)
            .field("sleep_interval", &self.sleep_interval)
            .field("server_port", &self.server_port)
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .field("reconnect_backoff_max", &self.reconnect_backoff_max)
            .finish()
    }
}

impl Config {
    /// Resolve configuration from an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Load a TOML file. Missing keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment-style overrides, then validate.
    ///
    /// Empty values count as unset. Every parse and validation problem is
    /// reported at once.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut errors = Vec::new();

        if let Some(v) = lookup("DB_HOST") {
            self.db_host = v;
        }
        if let Some(v) = lookup("DB_USER") {
            self.db_user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            self.db_password = v;
        }
        if let Some(v) = lookup("DB_NAME") {
            self.db_name = v;
        }
        parse_into(&mut self.db_port, "DB_PORT", lookup("DB_PORT"), &mut errors);
        parse_into(
            &mut self.sleep_interval,
            "SLEEP_INTERVAL",
            lookup("SLEEP_INTERVAL"),
            &mut errors,
        );
        parse_into(
            &mut self.server_port,
            "SERVER_PORT",
            lookup("SERVER_PORT"),
            &mut errors,
        );
        parse_into(
            &mut self.connect_timeout,
            "CONNECT_TIMEOUT",
            lookup("CONNECT_TIMEOUT"),
            &mut errors,
        );
        parse_into(
            &mut self.query_timeout,
            "QUERY_TIMEOUT",
            lookup("QUERY_TIMEOUT"),
            &mut errors,
        );
        parse_into(
            &mut self.reconnect_backoff_max,
            "RECONNECT_BACKOFF_MAX",
            lookup("RECONNECT_BACKOFF_MAX"),
            &mut errors,
        );

        if let Err(mut invalid) = validate(&self) {
            errors.append(&mut invalid);
        }
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_interval)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn reconnect_backoff_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_max)
    }
}

fn parse_into<T: FromStr>(
    slot: &mut T,
    key: &'static str,
    raw: Option<String>,
    errors: &mut Vec<ValidationError>,
) {
    let Some(raw) = raw else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => errors.push(ValidationError::NotANumber { key, value: raw }),
    }
}
