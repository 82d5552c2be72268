//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: the [`Config`] struct, TOML loading and environment overrides
//! - [`defaults`]: default values for every setting
//! - [`validation`]: startup validation of resolved values

mod defaults;
mod types;
mod validation;

pub use types::{Config, ConfigError};
