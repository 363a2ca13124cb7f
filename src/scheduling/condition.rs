//! Distribution condition evaluation.
//!
//! Decides whether a due report should actually be sent this cycle. Any
//! internal evaluation error fails OPEN: an extra delivery is acceptable,
//! a silently dropped one is not.

use crate::error::{AppError, AppResult};
use crate::delivery::ReportPayload;
use crate::models::{DistributionCondition, ThresholdOperator};

/// Returns whether the report should be sent.
///
/// An absent condition always sends. Evaluation errors (missing metric,
/// malformed descriptor) are logged as warnings and resolve to "send".
pub fn should_send(
    condition: Option<&DistributionCondition>,
    payload: &ReportPayload,
    previous_fingerprint: Option<&str>,
) -> bool {
    let Some(condition) = condition else {
        return true;
    };

    match evaluate(condition, payload, previous_fingerprint) {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Distribution condition evaluation failed, sending anyway"
            );
            true
        }
    }
}

fn evaluate(
    condition: &DistributionCondition,
    payload: &ReportPayload,
    previous_fingerprint: Option<&str>,
) -> AppResult<bool> {
    match condition {
        DistributionCondition::Always => Ok(true),

        DistributionCondition::Threshold {
            metric,
            operator,
            bound,
        } => {
            let value = metric_value(payload, metric)?;
            Ok(match operator {
                ThresholdOperator::Gt => value > *bound,
                ThresholdOperator::Gte => value >= *bound,
                ThresholdOperator::Lt => value < *bound,
                ThresholdOperator::Lte => value <= *bound,
            })
        }

        DistributionCondition::ChangeDetection => {
            let current = payload.fingerprint();
            Ok(match previous_fingerprint {
                // Nothing sent yet: the first payload is always a change
                None => true,
                Some(previous) => previous != current,
            })
        }

        DistributionCondition::Exception { metric, min, max } => {
            let value = metric_value(payload, metric)?;
            Ok(value < *min || value > *max)
        }
    }
}

fn metric_value(payload: &ReportPayload, metric: &str) -> AppResult<f64> {
    payload
        .metrics
        .get(metric)
        .copied()
        .ok_or_else(|| AppError::BadRequest {
            message: format!("Report payload has no metric named '{}'", metric),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_with_metric(name: &str, value: f64) -> ReportPayload {
        let mut payload = ReportPayload::new(json!({ "rows": [] }));
        payload.metrics.insert(name.to_string(), value);
        payload
    }

    #[test]
    fn test_absent_condition_sends() {
        let payload = ReportPayload::new(json!({}));
        assert!(should_send(None, &payload, None));
    }

    #[test]
    fn test_always_sends() {
        let payload = ReportPayload::new(json!({}));
        assert!(should_send(
            Some(&DistributionCondition::Always),
            &payload,
            None
        ));
    }

    #[test]
    fn test_threshold_crossed_sends() {
        let condition = DistributionCondition::Threshold {
            metric: "total_revenue".to_string(),
            operator: ThresholdOperator::Gte,
            bound: 1000.0,
        };
        let payload = payload_with_metric("total_revenue", 1500.0);
        assert!(should_send(Some(&condition), &payload, None));
    }

    #[test]
    fn test_threshold_below_bound_skips() {
        let condition = DistributionCondition::Threshold {
            metric: "total_revenue".to_string(),
            operator: ThresholdOperator::Gte,
            bound: 1000.0,
        };
        let payload = payload_with_metric("total_revenue", 999.99);
        assert!(!should_send(Some(&condition), &payload, None));
    }

    #[test]
    fn test_threshold_missing_metric_fails_open() {
        let condition = DistributionCondition::Threshold {
            metric: "missing_metric".to_string(),
            operator: ThresholdOperator::Gt,
            bound: 1.0,
        };
        let payload = ReportPayload::new(json!({}));
        // Evaluation error must resolve to "send", never a silent drop
        assert!(should_send(Some(&condition), &payload, None));
    }

    #[test]
    fn test_change_detection_first_send() {
        let payload = ReportPayload::new(json!({ "rows": [1, 2, 3] }));
        assert!(should_send(
            Some(&DistributionCondition::ChangeDetection),
            &payload,
            None
        ));
    }

    #[test]
    fn test_change_detection_unchanged_payload_skips() {
        let payload = ReportPayload::new(json!({ "rows": [1, 2, 3] }));
        let previous = payload.fingerprint();
        assert!(!should_send(
            Some(&DistributionCondition::ChangeDetection),
            &payload,
            Some(&previous)
        ));
    }

    #[test]
    fn test_change_detection_changed_payload_sends() {
        let previous = ReportPayload::new(json!({ "rows": [1, 2, 3] })).fingerprint();
        let payload = ReportPayload::new(json!({ "rows": [1, 2, 3, 4] }));
        assert!(should_send(
            Some(&DistributionCondition::ChangeDetection),
            &payload,
            Some(&previous)
        ));
    }

    #[test]
    fn test_exception_inside_range_skips() {
        let condition = DistributionCondition::Exception {
            metric: "error_rate".to_string(),
            min: 0.0,
            max: 5.0,
        };
        let payload = payload_with_metric("error_rate", 2.5);
        assert!(!should_send(Some(&condition), &payload, None));
    }

    #[test]
    fn test_exception_out_of_range_sends() {
        let condition = DistributionCondition::Exception {
            metric: "error_rate".to_string(),
            min: 0.0,
            max: 5.0,
        };
        let payload = payload_with_metric("error_rate", 7.1);
        assert!(should_send(Some(&condition), &payload, None));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = ReportPayload::new(json!({ "b": 2, "a": 1 }));
        let b = ReportPayload::new(json!({ "a": 1, "b": 2 }));
        // serde_json maps are ordered, so logically equal payloads hash equal
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
