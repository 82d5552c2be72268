//! Prometheus metrics for moodledb-exporter.
//!
//! The registry owns one gauge (or gauge vector) per exported Moodle metric
//! plus a few exporter self-metrics. It is shared between the collection
//! cycle, which writes, and the HTTP endpoint, which encodes on demand.
//!
//! ## Exported metrics
//!
//! - `moodle_*_counter`, `moodle_avg_time_on_site`, `moodle_failed_logins`,
//!   `moodle_assignments_submitted` - unlabeled gauges
//! - `moodle_enrolled_per_course{courseid,coursename}` and friends - one
//!   series per entity; the first label is the entity key
//! - `moodledb_exporter_*` - database session state and tick bookkeeping
//!
//! Series are never removed when an entity disappears from the source. A
//! series is only replaced when its entity key shows up with a different
//! name, so each entity keeps exactly one series.

use crate::catalog::Update;
use crate::error::MetricError;
use parking_lot::Mutex;
#[cfg(test)]
use prometheus::core::Collector;
use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::time::Duration;

// ========================================================================
// Metric names
// ========================================================================

pub const ACTIVE_USERS: &str = "moodle_active_user_counter";
pub const ONLINE_USERS: &str = "moodle_online_user_counter";
pub const ALL_USERS: &str = "moodle_all_user_counter";
pub const DB_SIZE: &str = "moodle_db_size_counter";
pub const AVG_TIME_ON_SITE: &str = "moodle_avg_time_on_site";
pub const FAILED_LOGINS: &str = "moodle_failed_logins";
pub const ASSIGNMENTS_SUBMITTED: &str = "moodle_assignments_submitted";
pub const ENROLLED_PER_COURSE: &str = "moodle_enrolled_per_course";
pub const COURSE_COMPLETION_RATE: &str = "moodle_course_completion_rate";
pub const QUIZ_ATTEMPTS: &str = "moodle_quiz_attempts";
pub const QUIZ_SUCCESS_RATE: &str = "moodle_quiz_success_rate";
pub const CERTIFICATION_ACHIEVEMENTS: &str = "moodle_certification_achievements";
pub const GRADES_DISTRIBUTION: &str = "moodle_grades_distribution";
pub const ISSUED_BADGES: &str = "moodle_issued_badges";

/// Name, help text and label names of an exported gauge.
#[derive(Debug, Clone, Copy)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

const COURSE: &[&str] = &["courseid", "coursename"];

/// Every Moodle gauge the exporter publishes.
pub static DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor {
        name: ACTIVE_USERS,
        help: "Counts active users of the last 5 minutes from Moodle database",
        labels: &[],
    },
    MetricDescriptor {
        name: ONLINE_USERS,
        help: "Counts online users of the last 5 minutes from Moodle database",
        labels: &[],
    },
    MetricDescriptor {
        name: ALL_USERS,
        help: "Counts all users from Moodle database",
        labels: &[],
    },
    MetricDescriptor {
        name: DB_SIZE,
        help: "Returns the size of Moodle database in MB",
        labels: &[],
    },
    MetricDescriptor {
        name: AVG_TIME_ON_SITE,
        help: "Average time spent on site by users",
        labels: &[],
    },
    MetricDescriptor {
        name: FAILED_LOGINS,
        help: "Number of failed login attempts",
        labels: &[],
    },
    MetricDescriptor {
        name: ASSIGNMENTS_SUBMITTED,
        help: "Number of assignments submitted",
        labels: &[],
    },
    MetricDescriptor {
        name: ENROLLED_PER_COURSE,
        help: "Number of users enrolled per course",
        labels: COURSE,
    },
    MetricDescriptor {
        name: COURSE_COMPLETION_RATE,
        help: "Percentage of users who have completed the course",
        labels: COURSE,
    },
    MetricDescriptor {
        name: QUIZ_ATTEMPTS,
        help: "Number of attempts for each quiz",
        labels: &["quizid"],
    },
    MetricDescriptor {
        name: QUIZ_SUCCESS_RATE,
        help: "Success rate for each quiz",
        labels: &["quizid"],
    },
    MetricDescriptor {
        name: CERTIFICATION_ACHIEVEMENTS,
        help: "Number of certifications achieved",
        labels: &["certificationid", "certificationname"],
    },
    MetricDescriptor {
        name: GRADES_DISTRIBUTION,
        help: "Average grade per course",
        labels: COURSE,
    },
    MetricDescriptor {
        name: ISSUED_BADGES,
        help: "Number of issued badges in Moodle",
        labels: &["badge_name"],
    },
];

// ========================================================================
// Series storage
// ========================================================================

enum Series {
    Scalar(Gauge),
    Labeled {
        descriptor: MetricDescriptor,
        vec: GaugeVec,
        /// Entity key (first label) -> full label tuple currently exported.
        keys: Mutex<HashMap<String, Vec<String>>>,
    },
}

/// Exporter-wide metric registry.
pub struct MetricRegistry {
    registry: Registry,
    series: HashMap<&'static str, Series>,
    up: IntGauge,
    query_failures: IntCounterVec,
    last_tick_duration: Gauge,
    last_tick_timestamp: IntGauge,
}

impl MetricRegistry {
    /// Build and register every gauge in [`DESCRIPTORS`] plus self-metrics.
    pub fn new() -> Result<Self, MetricError> {
        let registry = Registry::new();
        let mut series = HashMap::with_capacity(DESCRIPTORS.len());

        for descriptor in DESCRIPTORS {
            let opts = Opts::new(descriptor.name, descriptor.help);
            let entry = if descriptor.labels.is_empty() {
                let gauge = Gauge::with_opts(opts)?;
                registry.register(Box::new(gauge.clone()))?;
                Series::Scalar(gauge)
            } else {
                let vec = GaugeVec::new(opts, descriptor.labels)?;
                registry.register(Box::new(vec.clone()))?;
                Series::Labeled {
                    descriptor: *descriptor,
                    vec,
                    keys: Mutex::new(HashMap::new()),
                }
            };
            series.insert(descriptor.name, entry);
        }

        let up = IntGauge::new(
            "moodledb_exporter_up",
            "Whether the exporter currently holds a database session",
        )?;
        let query_failures = IntCounterVec::new(
            Opts::new(
                "moodledb_exporter_query_failures_total",
                "Failed metric group queries",
            ),
            &["group"],
        )?;
        let last_tick_duration = Gauge::new(
            "moodledb_exporter_last_tick_duration_seconds",
            "Duration of the last collection tick",
        )?;
        let last_tick_timestamp = IntGauge::new(
            "moodledb_exporter_last_tick_timestamp_seconds",
            "Unix time at which the last collection tick finished",
        )?;
        registry.register(Box::new(up.clone()))?;
        registry.register(Box::new(query_failures.clone()))?;
        registry.register(Box::new(last_tick_duration.clone()))?;
        registry.register(Box::new(last_tick_timestamp.clone()))?;

        Ok(Self {
            registry,
            series,
            up,
            query_failures,
            last_tick_duration,
            last_tick_timestamp,
        })
    }

    fn series(&self, metric: &str) -> Result<&Series, MetricError> {
        self.series
            .get(metric)
            .ok_or_else(|| MetricError::UnknownMetric(metric.to_string()))
    }

    /// Overwrite an unlabeled gauge.
    ///
    /// Absent or non-finite values leave the previous value in place. Returns
    /// whether the gauge was written.
    pub fn set_scalar(&self, metric: &str, value: Option<f64>) -> Result<bool, MetricError> {
        let gauge = match self.series(metric)? {
            Series::Scalar(gauge) => gauge,
            Series::Labeled { descriptor, .. } => {
                return Err(MetricError::LabelArity {
                    metric: descriptor.name.to_string(),
                    expected: descriptor.labels.len(),
                    got: 0,
                });
            }
        };
        match value {
            Some(v) if v.is_finite() => {
                gauge.set(v);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Overwrite (or create) the series for an exact label tuple.
    ///
    /// If the entity key was previously exported under other label values the
    /// old series is dropped first.
    pub fn set_labeled(
        &self,
        metric: &str,
        labels: &[String],
        value: f64,
    ) -> Result<bool, MetricError> {
        let (descriptor, vec, keys) = match self.series(metric)? {
            Series::Labeled {
                descriptor,
                vec,
                keys,
            } => (descriptor, vec, keys),
            Series::Scalar(_) => {
                return Err(MetricError::LabelArity {
                    metric: metric.to_string(),
                    expected: 0,
                    got: labels.len(),
                });
            }
        };
        if labels.len() != descriptor.labels.len() {
            return Err(MetricError::LabelArity {
                metric: descriptor.name.to_string(),
                expected: descriptor.labels.len(),
                got: labels.len(),
            });
        }
        if !value.is_finite() {
            return Ok(false);
        }

        let values: Vec<&str> = labels.iter().map(String::as_str).collect();
        let mut keys = keys.lock();
        if let Some(previous) = keys.get(&labels[0])
            && previous.as_slice() != labels
        {
            let stale: Vec<&str> = previous.iter().map(String::as_str).collect();
            if let Err(e) = vec.remove_label_values(&stale) {
                tracing::debug!(metric, labels = ?previous, error = %e, "Stale series already gone");
            }
        }
        vec.get_metric_with_label_values(&values)?.set(value);
        keys.insert(labels[0].clone(), labels.to_vec());
        Ok(true)
    }

    /// Apply one transform output.
    pub fn apply(&self, update: &Update) -> Result<bool, MetricError> {
        match update {
            Update::Scalar { metric, value } => self.set_scalar(metric, *value),
            Update::Labeled {
                metric,
                labels,
                value,
            } => self.set_labeled(metric, labels, *value),
        }
    }

    /// Current value of one series, without creating it.
    #[cfg(test)]
    pub fn value(&self, metric: &str, labels: &[&str]) -> Option<f64> {
        match self.series(metric).ok()? {
            Series::Scalar(gauge) => labels.is_empty().then(|| gauge.get()),
            Series::Labeled {
                descriptor, vec, ..
            } => {
                if labels.len() != descriptor.labels.len() {
                    return None;
                }
                vec.collect()
                    .iter()
                    .flat_map(|family| family.get_metric())
                    .find(|m| {
                        descriptor.labels.iter().zip(labels).all(|(name, value)| {
                            m.get_label()
                                .iter()
                                .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
                        })
                    })
                    .map(|m| m.get_gauge().get_value())
            }
        }
    }

    /// Number of series currently exported for a metric.
    #[cfg(test)]
    pub fn series_count(&self, metric: &str) -> usize {
        match self.series(metric) {
            Ok(Series::Scalar(_)) => 1,
            Ok(Series::Labeled { vec, .. }) => vec
                .collect()
                .iter()
                .map(|family| family.get_metric().len())
                .sum(),
            Err(_) => 0,
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.set(i64::from(up));
    }

    #[cfg(test)]
    pub fn is_up(&self) -> bool {
        self.up.get() == 1
    }

    pub fn record_query_failure(&self, group: &str) {
        self.query_failures.with_label_values(&[group]).inc();
    }

    #[cfg(test)]
    pub fn query_failures(&self, group: &str) -> u64 {
        self.query_failures.with_label_values(&[group]).get()
    }

    /// Record a finished tick.
    pub fn record_tick(&self, duration: Duration, finished_at: i64) {
        self.last_tick_duration.set(duration.as_secs_f64());
        self.last_tick_timestamp.set(finished_at);
    }

    /// Encode every metric in Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            return String::new();
        }
        match String::from_utf8(buffer) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_every_descriptor_is_registered() {
        let registry = MetricRegistry::new().unwrap();
        assert_eq!(registry.series.len(), DESCRIPTORS.len());
        let output = registry.encode();
        for name in [ACTIVE_USERS, DB_SIZE, ASSIGNMENTS_SUBMITTED] {
            assert!(output.contains(&format!("# TYPE {name} gauge")), "{name}");
        }
        assert!(output.contains("# TYPE moodledb_exporter_up gauge"));
    }

    #[test]
    fn test_scalar_skips_absent_and_non_finite() {
        let registry = MetricRegistry::new().unwrap();
        assert!(registry.set_scalar(AVG_TIME_ON_SITE, Some(420.5)).unwrap());
        assert!(!registry.set_scalar(AVG_TIME_ON_SITE, None).unwrap());
        assert!(!registry.set_scalar(AVG_TIME_ON_SITE, Some(f64::NAN)).unwrap());
        assert!(!registry.set_scalar(AVG_TIME_ON_SITE, Some(f64::INFINITY)).unwrap());
        assert_eq!(registry.value(AVG_TIME_ON_SITE, &[]), Some(420.5));
    }

    #[test]
    fn test_label_arity_is_enforced() {
        let registry = MetricRegistry::new().unwrap();
        let err = registry
            .set_labeled(ENROLLED_PER_COURSE, &labels(&["1"]), 3.0)
            .unwrap_err();
        assert!(matches!(
            err,
            MetricError::LabelArity {
                expected: 2,
                got: 1,
                ..
            }
        ));
        assert!(registry.set_labeled(ALL_USERS, &labels(&["1"]), 3.0).is_err());
        assert!(registry.set_scalar(QUIZ_ATTEMPTS, Some(1.0)).is_err());
        assert!(matches!(
            registry.set_scalar("moodle_unknown", Some(1.0)),
            Err(MetricError::UnknownMetric(_))
        ));
        assert_eq!(registry.series_count(ENROLLED_PER_COURSE), 0);
    }

    #[test]
    fn test_renamed_entity_keeps_one_series() {
        let registry = MetricRegistry::new().unwrap();
        registry
            .set_labeled(ENROLLED_PER_COURSE, &labels(&["7", "Algebra I"]), 30.0)
            .unwrap();
        registry
            .set_labeled(ENROLLED_PER_COURSE, &labels(&["7", "Algebra I"]), 31.0)
            .unwrap();
        assert_eq!(registry.series_count(ENROLLED_PER_COURSE), 1);

        registry
            .set_labeled(ENROLLED_PER_COURSE, &labels(&["7", "Linear Algebra"]), 32.0)
            .unwrap();
        assert_eq!(registry.series_count(ENROLLED_PER_COURSE), 1);
        assert_eq!(registry.value(ENROLLED_PER_COURSE, &["7", "Algebra I"]), None);
        assert_eq!(
            registry.value(ENROLLED_PER_COURSE, &["7", "Linear Algebra"]),
            Some(32.0)
        );
    }

    #[test]
    fn test_rename_tolerates_missing_stale_series() {
        let registry = MetricRegistry::new().unwrap();
        registry
            .set_labeled(CERTIFICATION_ACHIEVEMENTS, &labels(&["3", "First Aid"]), 4.0)
            .unwrap();
        match registry.series(CERTIFICATION_ACHIEVEMENTS).unwrap() {
            Series::Labeled { vec, .. } => vec.remove_label_values(&["3", "First Aid"]).unwrap(),
            Series::Scalar(_) => panic!("expected a labeled metric"),
        }

        let written = registry
            .set_labeled(CERTIFICATION_ACHIEVEMENTS, &labels(&["3", "First Aid Level 2"]), 5.0)
            .unwrap();
        assert!(written);
        assert_eq!(registry.series_count(CERTIFICATION_ACHIEVEMENTS), 1);
        assert_eq!(
            registry.value(CERTIFICATION_ACHIEVEMENTS, &["3", "First Aid Level 2"]),
            Some(5.0)
        );
    }

    #[test]
    fn test_value_does_not_create_series() {
        let registry = MetricRegistry::new().unwrap();
        assert_eq!(registry.value(QUIZ_SUCCESS_RATE, &["4"]), None);
        assert_eq!(registry.series_count(QUIZ_SUCCESS_RATE), 0);
        assert!(!registry.encode().contains(QUIZ_SUCCESS_RATE));
    }

    #[test]
    fn test_labeled_exposition_format() {
        let registry = MetricRegistry::new().unwrap();
        registry
            .apply(&Update::Labeled {
                metric: ENROLLED_PER_COURSE,
                labels: labels(&["1", "Intro"]),
                value: 10.0,
            })
            .unwrap();
        let output = registry.encode();
        assert!(output.contains("# HELP moodle_enrolled_per_course Number of users enrolled per course"));
        assert!(output.contains(r#"moodle_enrolled_per_course{courseid="1",coursename="Intro"} 10"#));
    }

    #[test]
    fn test_self_metrics() {
        let registry = MetricRegistry::new().unwrap();
        assert!(!registry.is_up());
        registry.set_up(true);
        assert!(registry.is_up());
        registry.record_query_failure("issued_badges");
        registry.record_query_failure("issued_badges");
        assert_eq!(registry.query_failures("issued_badges"), 2);
        registry.record_tick(Duration::from_millis(250), 1_700_000_000);
        let output = registry.encode();
        assert!(output.contains("moodledb_exporter_up 1"));
        assert!(output.contains("moodledb_exporter_last_tick_timestamp_seconds 1700000000"));
        assert!(output.contains(r#"moodledb_exporter_query_failures_total{group="issued_badges"} 2"#));
    }
}
