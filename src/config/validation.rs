//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{key} must be a number, got '{value}'")]
    NotANumber { key: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
    #[error("server_port must be between 1 and 65535")]
    InvalidServerPort,
    #[error("db_port must be between 1 and 65535")]
    InvalidDatabasePort,
    #[error("db_host is required")]
    MissingDatabaseHost,
    #[error("db_name is required")]
    MissingDatabaseName,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.db_host.trim().is_empty() {
        errors.push(ValidationError::MissingDatabaseHost);
    }
    if config.db_name.trim().is_empty() {
        errors.push(ValidationError::MissingDatabaseName);
    }
    if config.db_port == 0 {
        errors.push(ValidationError::InvalidDatabasePort);
    }
    if config.server_port == 0 {
        errors.push(ValidationError::InvalidServerPort);
    }

    for (name, value) in [
        ("sleep_interval", config.sleep_interval),
        ("connect_timeout", config.connect_timeout),
        ("query_timeout", config.query_timeout),
        ("reconnect_backoff_max", config.reconnect_backoff_max),
    ] {
        if value == 0 {
            errors.push(ValidationError::MustBePositive(name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
