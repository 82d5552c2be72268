//! Unified error handling for moodledb-exporter.
//!
//! Runtime errors are contained at the smallest scope that can absorb them:
//! a single query, a single row, or a single reconnect attempt. Only
//! configuration errors (see [`crate::config::ConfigError`]) are fatal.

use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Collection Errors (database session and query execution)
// ============================================================================

/// Errors raised while talking to the source database.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("database connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("query {group} failed: {source}")]
    Query {
        group: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("query {group} timed out after {after:?}")]
    Timeout { group: &'static str, after: Duration },

    #[error("query {group}: cannot decode column {column}: {reason}")]
    Decode {
        group: &'static str,
        column: usize,
        reason: String,
    },
}

impl CollectError {
    /// Whether the error means the session can no longer be used.
    ///
    /// Errors reported by the server for a single statement leave the session
    /// intact. Transport failures, and timeouts that abandon an in-flight
    /// query, do not.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::Connect(_) | Self::ConnectTimeout(_) | Self::Timeout { .. } => true,
            Self::Query { source, .. } => is_transport_error(source),
            Self::Decode { .. } => false,
        }
    }

    /// Static error code for metrics and log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::Query { .. } => "query",
            Self::Timeout { .. } => "timeout",
            Self::Decode { .. } => "decode",
        }
    }
}

fn is_transport_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

// ============================================================================
// Transform Errors (row to metric mapping)
// ============================================================================

/// A row or fragment that could not be mapped onto gauge updates.
///
/// Never fatal: the affected series is skipped for the current tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("expected a {expected} result")]
    ShapeMismatch { expected: &'static str },

    #[error("row {row}: expected {expected} columns, got {got}")]
    Arity {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("row {row}: column {column} is null")]
    Null { row: usize, column: usize },

    #[error("row {row}: column {column} is not {expected}")]
    Type {
        row: usize,
        column: usize,
        expected: &'static str,
    },
}

// ============================================================================
// Metric Errors (registry updates)
// ============================================================================

/// Errors raised by the metric registry.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("metric {metric} takes {expected} labels, got {got}")]
    LabelArity {
        metric: String,
        expected: usize,
        got: usize,
    },

    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_transport_errors_lose_connection() {
        let err = CollectError::Query {
            group: "all_users",
            source: sqlx::Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone away")),
        };
        assert!(err.is_connection_lost());

        let err = CollectError::Query {
            group: "all_users",
            source: sqlx::Error::PoolClosed,
        };
        assert!(err.is_connection_lost());
    }

    #[test]
    fn test_statement_errors_keep_connection() {
        let err = CollectError::Query {
            group: "issued_badges",
            source: sqlx::Error::ColumnNotFound("name".into()),
        };
        assert!(!err.is_connection_lost());

        let err = CollectError::Decode {
            group: "db_size",
            column: 0,
            reason: "not a number".into(),
        };
        assert!(!err.is_connection_lost());
    }

    #[test]
    fn test_timeouts_lose_connection() {
        let err = CollectError::Timeout {
            group: "grades_distribution",
            after: Duration::from_secs(30),
        };
        assert!(err.is_connection_lost());
        assert_eq!(err.error_code(), "timeout");
        assert!(err.to_string().contains("grades_distribution"));
    }
}
