//! Metric validation
//!
//! Validation is pure, stateless, and cheap: the success path performs no
//! allocation, and rules are evaluated in a fixed order with fail-fast
//! semantics (name allowlist, required labels, value range, future bound,
//! past bound).

use crate::ingest::pipeline::MetricPoint;
use crate::storage::types::now_nanos;
use std::collections::HashSet;
use thiserror::Error;

/// Why a metric was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("metric name '{0}' not allowed")]
    InvalidName(String),

    #[error("required label '{0}' missing")]
    MissingRequiredLabel(String),

    #[error("value {0} outside allowed range")]
    ValueOutOfRange(f64),

    #[error("timestamp too far in the future")]
    FutureTimestamp,

    #[error("timestamp too far in the past")]
    PastTimestamp,
}

/// Validator configuration
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Reject |value| above this bound; non-finite values always fail
    pub max_value_range: f64,
    /// When non-empty, only these metric names are accepted
    pub allowed_metrics: Vec<String>,
    /// Label keys that must be present (any value, including empty)
    pub required_labels: Vec<String>,
    /// Accept timestamps up to this far ahead of now
    pub future_tolerance: std::time::Duration,
    /// Accept timestamps up to this far behind now
    pub past_tolerance: std::time::Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_value_range: 1e12,
            allowed_metrics: Vec::new(),
            required_labels: Vec::new(),
            future_tolerance: std::time::Duration::from_secs(3600),
            past_tolerance: std::time::Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Stateless metric validator.
#[derive(Debug, Clone)]
pub struct Validator {
    max_value_range: f64,
    allowed_metrics: HashSet<String>,
    required_labels: Vec<String>,
    future_tolerance_nanos: i64,
    past_tolerance_nanos: i64,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            max_value_range: config.max_value_range,
            allowed_metrics: config.allowed_metrics.into_iter().collect(),
            required_labels: config.required_labels,
            future_tolerance_nanos: config.future_tolerance.as_nanos() as i64,
            past_tolerance_nanos: config.past_tolerance.as_nanos() as i64,
        }
    }

    /// Validate a single metric, failing fast on the first broken rule.
    pub fn validate(&self, metric: &MetricPoint) -> Result<(), ValidationError> {
        if !self.allowed_metrics.is_empty() && !self.allowed_metrics.contains(&metric.name) {
            return Err(ValidationError::InvalidName(metric.name.clone()));
        }

        for label in &self.required_labels {
            if !metric.labels.contains_key(label) {
                return Err(ValidationError::MissingRequiredLabel(label.clone()));
            }
        }

        if !metric.value.is_finite() || metric.value.abs() > self.max_value_range {
            return Err(ValidationError::ValueOutOfRange(metric.value));
        }

        let now = now_nanos();
        if metric.timestamp > now + self.future_tolerance_nanos {
            return Err(ValidationError::FutureTimestamp);
        }
        if metric.timestamp < now - self.past_tolerance_nanos {
            return Err(ValidationError::PastTimestamp);
        }

        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{Labels, NANOS_PER_SEC};

    fn metric(name: &str, value: f64, timestamp: i64) -> MetricPoint {
        MetricPoint {
            name: name.to_string(),
            value,
            timestamp,
            labels: Labels::new(),
        }
    }

    #[test]
    fn default_accepts_reasonable_metrics() {
        let validator = Validator::default();
        assert!(validator.validate(&metric("cpu", 42.0, now_nanos())).is_ok());
    }

    #[test]
    fn allowlist_rejects_unknown_names() {
        let validator = Validator::new(ValidatorConfig {
            allowed_metrics: vec!["cpu".to_string()],
            ..Default::default()
        });

        assert!(validator.validate(&metric("cpu", 1.0, now_nanos())).is_ok());
        assert_eq!(
            validator.validate(&metric("mem", 1.0, now_nanos())),
            Err(ValidationError::InvalidName("mem".to_string()))
        );
    }

    #[test]
    fn required_labels_must_be_present() {
        let validator = Validator::new(ValidatorConfig {
            required_labels: vec!["host".to_string()],
            ..Default::default()
        });

        let mut m = metric("cpu", 1.0, now_nanos());
        assert_eq!(
            validator.validate(&m),
            Err(ValidationError::MissingRequiredLabel("host".to_string()))
        );

        // Any value is acceptable, including empty.
        m.labels.insert("host".to_string(), String::new());
        assert!(validator.validate(&m).is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let validator = Validator::default();
        let now = now_nanos();

        assert!(validator.validate(&metric("cpu", 1e12, now)).is_ok());
        assert!(validator.validate(&metric("cpu", -1e12, now)).is_ok());
        assert!(matches!(
            validator.validate(&metric("cpu", 1e13, now)),
            Err(ValidationError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            validator.validate(&metric("cpu", f64::NAN, now)),
            Err(ValidationError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            validator.validate(&metric("cpu", f64::INFINITY, now)),
            Err(ValidationError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            validator.validate(&metric("cpu", f64::NEG_INFINITY, now)),
            Err(ValidationError::ValueOutOfRange(_))
        ));
    }

    #[test]
    fn timestamps_outside_tolerances_are_rejected() {
        let validator = Validator::default();
        let now = now_nanos();
        let hour = 3600 * NANOS_PER_SEC;
        let day = 24 * hour;

        assert!(validator.validate(&metric("cpu", 1.0, now + hour / 2)).is_ok());
        assert_eq!(
            validator.validate(&metric("cpu", 1.0, now + 2 * hour)),
            Err(ValidationError::FutureTimestamp)
        );

        assert!(validator.validate(&metric("cpu", 1.0, now - 6 * day)).is_ok());
        assert_eq!(
            validator.validate(&metric("cpu", 1.0, now - 8 * day)),
            Err(ValidationError::PastTimestamp)
        );
    }

    #[test]
    fn rules_are_evaluated_in_order() {
        // A metric breaking several rules reports the name failure first.
        let validator = Validator::new(ValidatorConfig {
            allowed_metrics: vec!["cpu".to_string()],
            required_labels: vec!["host".to_string()],
            ..Default::default()
        });

        assert_eq!(
            validator.validate(&metric("mem", f64::NAN, 0)),
            Err(ValidationError::InvalidName("mem".to_string()))
        );
    }
}
