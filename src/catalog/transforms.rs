//! Row-set transforms.
//!
//! Each transform walks its rows independently. A bad row only loses the
//! updates it had not produced yet; the remaining rows still apply.

use super::{Row, Transformed, Update, Value};
use crate::error::TransformError;
use crate::metrics;

/// Typed access to one row.
struct RowReader<'a> {
    index: usize,
    row: &'a Row,
}

impl RowReader<'_> {
    fn value(&self, column: usize) -> &Value {
        &self.row[column]
    }

    /// Column rendered as a label value. Ids are stringified.
    fn label(&self, column: usize) -> Result<String, TransformError> {
        match self.value(column) {
            Value::Text(s) => Ok(s.clone()),
            Value::Int(v) => Ok(v.to_string()),
            Value::Float(v) if v.fract() == 0.0 => Ok((*v as i64).to_string()),
            Value::Float(v) => Ok(v.to_string()),
            Value::Null => Err(self.null(column)),
        }
    }

    fn number(&self, column: usize) -> Result<f64, TransformError> {
        self.optional(column)?.ok_or_else(|| self.null(column))
    }

    fn optional(&self, column: usize) -> Result<Option<f64>, TransformError> {
        let value = self.value(column);
        match value.as_f64() {
            Some(v) if v.is_finite() => Ok(Some(v)),
            None if *value == Value::Null => Ok(None),
            _ => Err(TransformError::Type {
                row: self.index,
                column,
                expected: "numeric",
            }),
        }
    }

    fn null(&self, column: usize) -> TransformError {
        TransformError::Null {
            row: self.index,
            column,
        }
    }
}

fn labeled(metric: &'static str, labels: Vec<String>, value: f64) -> Update {
    Update::Labeled {
        metric,
        labels,
        value,
    }
}

fn each_row<F>(rows: &[Row], width: usize, mut map: F) -> Transformed
where
    F: FnMut(&RowReader<'_>, &mut Vec<Update>) -> Result<(), TransformError>,
{
    let mut out = Transformed::default();
    for (index, row) in rows.iter().enumerate() {
        if row.len() != width {
            out.skipped.push(TransformError::Arity {
                row: index,
                expected: width,
                got: row.len(),
            });
            continue;
        }
        let reader = RowReader { index, row };
        if let Err(e) = map(&reader, &mut out.updates) {
            out.skipped.push(e);
        }
    }
    out
}

/// `(course_id, course_name, enrolled_count)`
pub(super) fn enrolled_per_course(rows: &[Row]) -> Transformed {
    each_row(rows, 3, |r, out| {
        out.push(labeled(
            metrics::ENROLLED_PER_COURSE,
            vec![r.label(0)?, r.label(1)?],
            r.number(2)?,
        ));
        Ok(())
    })
}

/// `(course_id, course_name, total_enrolled, total_completed)`
///
/// Courses with nobody enrolled produce no update at all.
pub(super) fn course_completion_rates(rows: &[Row]) -> Transformed {
    each_row(rows, 4, |r, out| {
        let enrolled = r.number(2)?;
        if enrolled <= 0.0 {
            return Ok(());
        }
        let completed = r.number(3)?;
        out.push(labeled(
            metrics::COURSE_COMPLETION_RATE,
            vec![r.label(0)?, r.label(1)?],
            completed / enrolled * 100.0,
        ));
        Ok(())
    })
}

/// `(quiz_id, total_attempts, total_success)`
///
/// Attempts are always written; the success rate only when there were any.
pub(super) fn quiz_attempts_and_success(rows: &[Row]) -> Transformed {
    each_row(rows, 3, |r, out| {
        let quiz = r.label(0)?;
        let attempts = r.number(1)?;
        out.push(labeled(metrics::QUIZ_ATTEMPTS, vec![quiz.clone()], attempts));
        if attempts > 0.0 {
            let success = r.number(2)?;
            out.push(labeled(
                metrics::QUIZ_SUCCESS_RATE,
                vec![quiz],
                success / attempts * 100.0,
            ));
        }
        Ok(())
    })
}

/// `(certification_id, certification_name, total_issued)`
pub(super) fn certification_achievements(rows: &[Row]) -> Transformed {
    each_row(rows, 3, |r, out| {
        out.push(labeled(
            metrics::CERTIFICATION_ACHIEVEMENTS,
            vec![r.label(0)?, r.label(1)?],
            r.number(2)?,
        ));
        Ok(())
    })
}

/// `(course_id, course_name, average_grade)`; null averages are skipped.
pub(super) fn grades_distribution(rows: &[Row]) -> Transformed {
    each_row(rows, 3, |r, out| {
        if let Some(average) = r.optional(2)? {
            out.push(labeled(
                metrics::GRADES_DISTRIBUTION,
                vec![r.label(0)?, r.label(1)?],
                average,
            ));
        }
        Ok(())
    })
}

/// `(badge_name, issued_count)`
pub(super) fn issued_badges(rows: &[Row]) -> Transformed {
    each_row(rows, 2, |r, out| {
        out.push(labeled(
            metrics::ISSUED_BADGES,
            vec![r.label(0)?],
            r.number(1)?,
        ));
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Value {
        Value::Int(v)
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_enrolled_maps_one_to_one() {
        let out = enrolled_per_course(&[
            vec![int(1), text("Intro"), int(10)],
            vec![int(2), text("Advanced"), int(0)],
        ]);
        assert!(out.skipped.is_empty());
        assert_eq!(
            out.updates,
            vec![
                labeled(metrics::ENROLLED_PER_COURSE, labels(&["1", "Intro"]), 10.0),
                labeled(metrics::ENROLLED_PER_COURSE, labels(&["2", "Advanced"]), 0.0),
            ]
        );
    }

    #[test]
    fn test_completion_rate_requires_enrolments() {
        let out = course_completion_rates(&[
            vec![int(1), text("Intro"), int(10), int(5)],
            vec![int(2), text("Advanced"), int(0), int(0)],
        ]);
        assert!(out.skipped.is_empty());
        assert_eq!(
            out.updates,
            vec![labeled(
                metrics::COURSE_COMPLETION_RATE,
                labels(&["1", "Intro"]),
                50.0
            )]
        );
    }

    #[test]
    fn test_completion_accepts_decimal_sums() {
        let out = course_completion_rates(&[vec![int(3), text("Chem"), int(4), text("1")]]);
        assert_eq!(
            out.updates,
            vec![labeled(
                metrics::COURSE_COMPLETION_RATE,
                labels(&["3", "Chem"]),
                25.0
            )]
        );
    }

    #[test]
    fn test_quiz_without_attempts_sets_attempts_only() {
        let out = quiz_attempts_and_success(&[
            vec![int(4), int(0), Value::Null],
            vec![int(5), int(8), int(6)],
        ]);
        assert!(out.skipped.is_empty());
        assert_eq!(
            out.updates,
            vec![
                labeled(metrics::QUIZ_ATTEMPTS, labels(&["4"]), 0.0),
                labeled(metrics::QUIZ_ATTEMPTS, labels(&["5"]), 8.0),
                labeled(metrics::QUIZ_SUCCESS_RATE, labels(&["5"]), 75.0),
            ]
        );
    }

    #[test]
    fn test_quiz_null_success_keeps_attempts() {
        let out = quiz_attempts_and_success(&[vec![int(9), int(3), Value::Null]]);
        assert_eq!(
            out.updates,
            vec![labeled(metrics::QUIZ_ATTEMPTS, labels(&["9"]), 3.0)]
        );
        assert_eq!(out.skipped, vec![TransformError::Null { row: 0, column: 2 }]);
    }

    #[test]
    fn test_null_grade_average_is_skipped() {
        let out = grades_distribution(&[
            vec![int(1), text("Intro"), Value::Null],
            vec![int(2), text("Advanced"), Value::Float(71.25)],
        ]);
        assert!(out.skipped.is_empty());
        assert_eq!(
            out.updates,
            vec![labeled(
                metrics::GRADES_DISTRIBUTION,
                labels(&["2", "Advanced"]),
                71.25
            )]
        );
    }

    #[test]
    fn test_badges_and_certifications() {
        let out = issued_badges(&[vec![text("Early Bird"), int(12)]]);
        assert_eq!(
            out.updates,
            vec![labeled(metrics::ISSUED_BADGES, labels(&["Early Bird"]), 12.0)]
        );

        let out = certification_achievements(&[vec![int(2), text("First Aid"), int(0)]]);
        assert_eq!(
            out.updates,
            vec![labeled(
                metrics::CERTIFICATION_ACHIEVEMENTS,
                labels(&["2", "First Aid"]),
                0.0
            )]
        );
    }

    #[test]
    fn test_bad_rows_are_isolated() {
        let out = enrolled_per_course(&[
            vec![int(1), text("Intro")],
            vec![Value::Null, text("Ghost"), int(3)],
            vec![int(2), text("Advanced"), text("many")],
            vec![int(3), text("Kept"), int(1)],
        ]);
        assert_eq!(
            out.updates,
            vec![labeled(metrics::ENROLLED_PER_COURSE, labels(&["3", "Kept"]), 1.0)]
        );
        assert_eq!(
            out.skipped,
            vec![
                TransformError::Arity {
                    row: 0,
                    expected: 3,
                    got: 2
                },
                TransformError::Null { row: 1, column: 0 },
                TransformError::Type {
                    row: 2,
                    column: 2,
                    expected: "numeric"
                },
            ]
        );
    }
}
