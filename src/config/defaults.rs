//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

// =============================================================================
// Database Defaults
// =============================================================================

pub fn default_db_host() -> String {
    "localhost".to_string()
}

pub fn default_db_port() -> u16 {
    3306
}

pub fn default_db_user() -> String {
    "root".to_string()
}

pub fn default_db_password() -> String {
    "password".to_string()
}

pub fn default_db_name() -> String {
    "moodle".to_string()
}

// =============================================================================
// Collection Defaults (seconds)
// =============================================================================

pub fn default_sleep_interval() -> u64 {
    60
}

pub fn default_connect_timeout() -> u64 {
    5
}

pub fn default_query_timeout() -> u64 {
    30
}

pub fn default_reconnect_backoff_max() -> u64 {
    60
}

// =============================================================================
// Exposition Defaults
// =============================================================================

pub fn default_server_port() -> u16 {
    8899
}
