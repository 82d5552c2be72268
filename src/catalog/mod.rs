//! Query catalog: the fixed mapping from metric group to query and transform.
//!
//! The catalog is data, not control flow. Each [`QueryDefinition`] names its
//! group, carries its SQL, declares the shape of the result it expects and
//! says how that result becomes gauge updates. Adding a metric group means
//! adding an entry to [`CATALOG`].
//!
//! Groups are executed in catalog order, one at a time.

mod queries;
mod transforms;

use crate::error::TransformError;
use crate::metrics;

// ============================================================================
// Result model
// ============================================================================

/// Declared type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Integer entity id, rendered as a label.
    Id,
    /// Entity name, rendered as a label.
    Name,
    /// Integer count. May arrive as DECIMAL when produced by `SUM`.
    Count,
    /// Floating point measure, nullable.
    Measure,
}

/// Shape of a group's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// A single value from the first column of the first row.
    Scalar(ColumnKind),
    /// Zero or more rows with a fixed column layout.
    RowSet(&'static [ColumnKind]),
}

/// Bound parameter supplied to the query at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    None,
    /// The configured database (schema) name.
    DatabaseName,
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value. `None` for NULL and non-numeric text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Null => None,
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

pub type Row = Vec<Value>;

/// One group's share of a tick's collection result.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Scalar(Value),
    Rows(Vec<Row>),
}

/// A single gauge write produced by a transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// `None` means the measure is absent and the gauge keeps its value.
    Scalar {
        metric: &'static str,
        value: Option<f64>,
    },
    Labeled {
        metric: &'static str,
        labels: Vec<String>,
        value: f64,
    },
}

/// Output of a transform: updates to apply plus rows that were skipped.
#[derive(Debug, Default)]
pub struct Transformed {
    pub updates: Vec<Update>,
    pub skipped: Vec<TransformError>,
}

/// How a group's fragment maps onto gauges.
#[derive(Clone, Copy)]
pub enum Transform {
    /// Set the named unlabeled gauge from the scalar value.
    Scalar(&'static str),
    /// Map each row onto labeled gauges.
    Rows(fn(&[Row]) -> Transformed),
}

/// A named, read-only query and what to do with its result.
pub struct QueryDefinition {
    pub group: &'static str,
    pub sql: &'static str,
    pub shape: Shape,
    pub param: Param,
    pub transform: Transform,
}

impl QueryDefinition {
    /// Turn a fetched fragment into gauge updates.
    ///
    /// Fails only when the fragment does not match the declared shape. Row
    /// level problems are reported in [`Transformed::skipped`].
    pub fn apply(&self, fragment: &Fragment) -> Result<Transformed, TransformError> {
        match (self.transform, fragment) {
            (Transform::Scalar(metric), Fragment::Scalar(value)) => Ok(Transformed {
                updates: vec![Update::Scalar {
                    metric,
                    value: value.as_f64(),
                }],
                skipped: Vec::new(),
            }),
            (Transform::Rows(map), Fragment::Rows(rows)) => Ok(map(rows)),
            (Transform::Scalar(_), Fragment::Rows(_)) => {
                Err(TransformError::ShapeMismatch { expected: "scalar" })
            }
            (Transform::Rows(_), Fragment::Scalar(_)) => Err(TransformError::ShapeMismatch {
                expected: "row set",
            }),
        }
    }
}

impl std::fmt::Debug for QueryDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryDefinition")
            .field("group", &self.group)
            .field("shape", &self.shape)
            .field("param", &self.param)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Catalog
// ============================================================================

use ColumnKind::{Count, Id, Measure, Name};

/// Every metric group, in execution order.
pub static CATALOG: &[QueryDefinition] = &[
    QueryDefinition {
        group: "active_users",
        sql: queries::ACTIVE_USERS,
        shape: Shape::Scalar(Count),
        param: Param::None,
        transform: Transform::Scalar(metrics::ACTIVE_USERS),
    },
    QueryDefinition {
        group: "online_users",
        sql: queries::ONLINE_USERS,
        shape: Shape::Scalar(Count),
        param: Param::None,
        transform: Transform::Scalar(metrics::ONLINE_USERS),
    },
    QueryDefinition {
        group: "all_users",
        sql: queries::ALL_USERS,
        shape: Shape::Scalar(Count),
        param: Param::None,
        transform: Transform::Scalar(metrics::ALL_USERS),
    },
    QueryDefinition {
        group: "db_size",
        sql: queries::DB_SIZE,
        shape: Shape::Scalar(Measure),
        param: Param::DatabaseName,
        transform: Transform::Scalar(metrics::DB_SIZE),
    },
    QueryDefinition {
        group: "avg_time_on_site",
        sql: queries::AVG_TIME_ON_SITE,
        shape: Shape::Scalar(Measure),
        param: Param::None,
        transform: Transform::Scalar(metrics::AVG_TIME_ON_SITE),
    },
    QueryDefinition {
        group: "failed_logins",
        sql: queries::FAILED_LOGINS,
        shape: Shape::Scalar(Count),
        param: Param::None,
        transform: Transform::Scalar(metrics::FAILED_LOGINS),
    },
    QueryDefinition {
        group: "assignments_submitted",
        sql: queries::ASSIGNMENTS_SUBMITTED,
        shape: Shape::Scalar(Count),
        param: Param::None,
        transform: Transform::Scalar(metrics::ASSIGNMENTS_SUBMITTED),
    },
    QueryDefinition {
        group: "enrolled_per_course",
        sql: queries::ENROLLED_PER_COURSE,
        shape: Shape::RowSet(&[Id, Name, Count]),
        param: Param::None,
        transform: Transform::Rows(transforms::enrolled_per_course),
    },
    QueryDefinition {
        group: "course_completion_rates",
        sql: queries::COURSE_COMPLETION_RATES,
        shape: Shape::RowSet(&[Id, Name, Count, Count]),
        param: Param::None,
        transform: Transform::Rows(transforms::course_completion_rates),
    },
    QueryDefinition {
        group: "quiz_attempts_and_success",
        sql: queries::QUIZ_ATTEMPTS_AND_SUCCESS,
        shape: Shape::RowSet(&[Id, Count, Count]),
        param: Param::None,
        transform: Transform::Rows(transforms::quiz_attempts_and_success),
    },
    QueryDefinition {
        group: "certification_achievements",
        sql: queries::CERTIFICATION_ACHIEVEMENTS,
        shape: Shape::RowSet(&[Id, Name, Count]),
        param: Param::None,
        transform: Transform::Rows(transforms::certification_achievements),
    },
    QueryDefinition {
        group: "grades_distribution",
        sql: queries::GRADES_DISTRIBUTION,
        shape: Shape::RowSet(&[Id, Name, Measure]),
        param: Param::None,
        transform: Transform::Rows(transforms::grades_distribution),
    },
    QueryDefinition {
        group: "issued_badges",
        sql: queries::ISSUED_BADGES,
        shape: Shape::RowSet(&[Name, Count]),
        param: Param::None,
        transform: Transform::Rows(transforms::issued_badges),
    },
];

/// Find a definition by group name.
#[cfg(test)]
pub fn lookup(group: &str) -> Option<&'static QueryDefinition> {
    CATALOG.iter().find(|d| d.group == group)
}
