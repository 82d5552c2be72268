//! Column decoding for MySQL result rows.
//!
//! MySQL reports aggregates with whatever type the expression produces:
//! `COUNT` is BIGINT, `SUM` over integers and `AVG` are DECIMAL, arithmetic on
//! `information_schema` sizes is DECIMAL. Numeric columns therefore fall back
//! from native integer and float decoding to parsing the DECIMAL text.

use crate::catalog::{ColumnKind, Row, Value};
use crate::error::CollectError;
use sqlx::Row as _;
use sqlx::mysql::MySqlRow;

/// Decode a full row according to the declared column layout.
pub(super) fn row(
    group: &'static str,
    row: &MySqlRow,
    columns: &[ColumnKind],
) -> Result<Row, CollectError> {
    if row.len() < columns.len() {
        return Err(CollectError::Decode {
            group,
            column: row.len(),
            reason: format!("expected {} columns, got {}", columns.len(), row.len()),
        });
    }
    columns
        .iter()
        .enumerate()
        .map(|(index, kind)| column(group, row, index, *kind))
        .collect()
}

/// Decode a single column.
pub(super) fn column(
    group: &'static str,
    row: &MySqlRow,
    index: usize,
    kind: ColumnKind,
) -> Result<Value, CollectError> {
    let decoded = match kind {
        ColumnKind::Name => row
            .try_get::<Option<String>, _>(index)
            .map(|v| v.map_or(Value::Null, Value::Text)),
        ColumnKind::Id | ColumnKind::Count => integer(row, index),
        ColumnKind::Measure => float(row, index),
    };
    decoded.map_err(|e| CollectError::Decode {
        group,
        column: index,
        reason: e.to_string(),
    })
}

fn integer(row: &MySqlRow, index: usize) -> Result<Value, sqlx::Error> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Int));
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
        return Ok(v.map_or(Value::Null, |v| {
            i64::try_from(v).map_or(Value::Float(v as f64), Value::Int)
        }));
    }
    decimal(row, index)
}

fn float(row: &MySqlRow, index: usize) -> Result<Value, sqlx::Error> {
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Float));
    }
    integer(row, index)
}

fn decimal(row: &MySqlRow, index: usize) -> Result<Value, sqlx::Error> {
    let raw: Option<String> = row.try_get_unchecked(index)?;
    match raw {
        None => Ok(Value::Null),
        Some(text) => parse_decimal(&text).map_err(|e| sqlx::Error::Decode(Box::new(e))),
    }
}

fn parse_decimal(text: &str) -> Result<Value, std::num::ParseFloatError> {
    text.trim().parse().map(Value::Float)
}
