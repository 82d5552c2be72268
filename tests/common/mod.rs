//! Integration test common infrastructure.
//!
//! Provides utilities for spawning the exporter binary and scraping its
//! metrics endpoint.

pub mod exporter;

#[allow(unused_imports)]
pub use exporter::{TestExporter, free_port};
