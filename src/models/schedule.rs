//! Report schedule models for database operations.
//!
//! This module provides the schedule entity plus the typed boundary structs
//! (recipients, distribution conditions) that are stored as JSONB columns.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::ValidateEmail;

use crate::error::{AppError, AppResult};

// ============================================================================
// Enums
// ============================================================================

/// Cadence family governing when a schedule becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::ScheduleFrequency")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "DAILY"),
            Frequency::Weekly => write!(f, "WEEKLY"),
            Frequency::Monthly => write!(f, "MONTHLY"),
            Frequency::Custom => write!(f, "CUSTOM"),
        }
    }
}

/// Lifecycle status of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::ScheduleStatus")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Cancelled,
}

/// Output format of the rendered report artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::ReportFormat")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportFormat {
    Pdf,
    Excel,
    Csv,
}

impl ReportFormat {
    /// File extension used when naming the mailed attachment.
    pub fn file_extension(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Excel => "xlsx",
            ReportFormat::Csv => "csv",
        }
    }

    /// MIME content type of the mailed attachment.
    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ReportFormat::Csv => "text/csv",
        }
    }
}

// ============================================================================
// Recipients (JSONB boundary type)
// ============================================================================

/// Recipient set stored as JSONB on both schedules and delivery logs.
///
/// Parsed and validated at the service boundary; never passed around as an
/// untyped map internally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
}

impl Recipients {
    /// Parse a JSONB value into a typed recipient set.
    pub fn from_json(value: &JsonValue) -> AppResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| AppError::Validation {
            field: "recipients".to_string(),
            reason: format!("Invalid recipients: {}", e),
        })
    }

    /// Convert to JSONB for database storage.
    pub fn to_json(&self) -> AppResult<JsonValue> {
        serde_json::to_value(self).map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })
    }

    /// Validates that at least one primary recipient exists and every
    /// address is a syntactically valid email.
    pub fn validate(&self) -> AppResult<()> {
        if self.to.is_empty() {
            return Err(AppError::Validation {
                field: "recipients.to".to_string(),
                reason: "At least one primary recipient is required".to_string(),
            });
        }

        for address in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            if !address.validate_email() {
                return Err(AppError::Validation {
                    field: "recipients".to_string(),
                    reason: format!("Invalid email address: {}", address),
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// Distribution condition (JSONB boundary type)
// ============================================================================

/// Comparison operator for threshold conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdOperator {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Predicate gating whether a due report is actually sent this cycle.
///
/// Stored as tagged JSONB (`{"type": "THRESHOLD", ...}`) on the schedule and
/// validated at create/update time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionCondition {
    Always,
    Threshold {
        metric: String,
        operator: ThresholdOperator,
        bound: f64,
    },
    ChangeDetection,
    Exception {
        metric: String,
        min: f64,
        max: f64,
    },
}

impl DistributionCondition {
    /// Parse a JSONB value into a typed condition.
    pub fn from_json(value: &JsonValue) -> AppResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| AppError::Validation {
            field: "distribution_condition".to_string(),
            reason: format!("Invalid distribution condition: {}", e),
        })
    }

    /// Convert to JSONB for database storage.
    pub fn to_json(&self) -> AppResult<JsonValue> {
        serde_json::to_value(self).map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })
    }

    /// Validates condition parameters beyond what the tagged deserialization
    /// already enforces.
    pub fn validate(&self) -> AppResult<()> {
        match self {
            DistributionCondition::Threshold { metric, .. } => {
                if metric.is_empty() {
                    return Err(AppError::Validation {
                        field: "distribution_condition.metric".to_string(),
                        reason: "Threshold metric name cannot be empty".to_string(),
                    });
                }
            }
            DistributionCondition::Exception { metric, min, max } => {
                if metric.is_empty() {
                    return Err(AppError::Validation {
                        field: "distribution_condition.metric".to_string(),
                        reason: "Exception metric name cannot be empty".to_string(),
                    });
                }
                if min > max {
                    return Err(AppError::Validation {
                        field: "distribution_condition".to_string(),
                        reason: format!("Exception range is inverted: min {} > max {}", min, max),
                    });
                }
            }
            DistributionCondition::Always | DistributionCondition::ChangeDetection => {}
        }
        Ok(())
    }
}

// ============================================================================
// ReportSchedule Models (Query/Insert/Update)
// ============================================================================

/// ReportSchedule query model for SELECT operations
#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::report_schedules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ReportSchedule {
    pub id: i32,
    pub report_id: String,
    pub report_type: String,
    pub user_id: String,
    pub frequency: Frequency,
    pub cron_expression: Option<String>,
    pub timezone: String,
    pub format: ReportFormat,
    pub recipients: JsonValue,
    pub distribution_condition: Option<JsonValue>,
    pub status: ScheduleStatus,
    pub last_run_at: Option<NaiveDateTime>,
    pub next_run_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ReportSchedule {
    /// Typed view of the recipients JSONB column.
    pub fn recipients(&self) -> AppResult<Recipients> {
        Recipients::from_json(&self.recipients)
    }

    /// Typed view of the distribution condition, if one is configured.
    pub fn distribution_condition(&self) -> AppResult<Option<DistributionCondition>> {
        self.distribution_condition
            .as_ref()
            .map(DistributionCondition::from_json)
            .transpose()
    }
}

/// NewReportSchedule insert model for INSERT operations
#[derive(Debug, Insertable, Clone)]
#[diesel(table_name = crate::schema::report_schedules)]
pub struct NewReportSchedule {
    pub report_id: String,
    pub report_type: String,
    pub user_id: String,
    pub frequency: Frequency,
    pub cron_expression: Option<String>,
    pub timezone: String,
    pub format: ReportFormat,
    pub recipients: JsonValue,
    pub distribution_condition: Option<JsonValue>,
    pub status: ScheduleStatus,
    pub next_run_at: Option<NaiveDateTime>,
}

/// UpdateReportSchedule model for UPDATE operations
#[derive(Debug, AsChangeset, Clone, Default)]
#[diesel(table_name = crate::schema::report_schedules)]
pub struct UpdateReportSchedule {
    pub frequency: Option<Frequency>,
    pub cron_expression: Option<Option<String>>,
    pub timezone: Option<String>,
    pub format: Option<ReportFormat>,
    pub recipients: Option<JsonValue>,
    pub distribution_condition: Option<Option<JsonValue>>,
    pub status: Option<ScheduleStatus>,
    pub next_run_at: Option<Option<NaiveDateTime>>,
    pub updated_at: Option<NaiveDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recipients_from_json() {
        let value = json!({
            "to": ["ops@example.com"],
            "cc": ["lead@example.com"],
        });

        let recipients = Recipients::from_json(&value).unwrap();
        assert_eq!(recipients.to, vec!["ops@example.com"]);
        assert_eq!(recipients.cc, vec!["lead@example.com"]);
        assert!(recipients.bcc.is_empty());
    }

    #[test]
    fn test_recipients_missing_to_is_rejected() {
        let value = json!({ "cc": ["lead@example.com"] });
        assert!(Recipients::from_json(&value).is_err());
    }

    #[test]
    fn test_recipients_validate_requires_primary() {
        let recipients = Recipients {
            to: vec![],
            cc: vec!["lead@example.com".to_string()],
            bcc: vec![],
        };
        assert!(recipients.validate().is_err());
    }

    #[test]
    fn test_recipients_validate_rejects_malformed_address() {
        let recipients = Recipients {
            to: vec!["not-an-email".to_string()],
            cc: vec![],
            bcc: vec![],
        };
        assert!(recipients.validate().is_err());
    }

    #[test]
    fn test_condition_tagged_parse() {
        let value = json!({
            "type": "THRESHOLD",
            "metric": "total_revenue",
            "operator": "GTE",
            "bound": 10000.0,
        });

        let condition = DistributionCondition::from_json(&value).unwrap();
        assert_eq!(
            condition,
            DistributionCondition::Threshold {
                metric: "total_revenue".to_string(),
                operator: ThresholdOperator::Gte,
                bound: 10000.0,
            }
        );
    }

    #[test]
    fn test_condition_unknown_type_is_rejected() {
        let value = json!({ "type": "SOMETIMES" });
        assert!(DistributionCondition::from_json(&value).is_err());
    }

    #[test]
    fn test_condition_exception_inverted_range() {
        let condition = DistributionCondition::Exception {
            metric: "error_rate".to_string(),
            min: 5.0,
            max: 1.0,
        };
        assert!(condition.validate().is_err());
    }

    #[test]
    fn test_condition_roundtrip_is_stable() {
        let condition = DistributionCondition::ChangeDetection;
        let value = condition.to_json().unwrap();
        assert_eq!(value, json!({ "type": "CHANGE_DETECTION" }));
        assert_eq!(DistributionCondition::from_json(&value).unwrap(), condition);
    }

    #[test]
    fn test_format_content_types() {
        assert_eq!(ReportFormat::Pdf.content_type(), "application/pdf");
        assert_eq!(ReportFormat::Csv.content_type(), "text/csv");
        assert_eq!(ReportFormat::Excel.file_extension(), "xlsx");
    }
}
