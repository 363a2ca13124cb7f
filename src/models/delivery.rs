//! Delivery log models for database operations.
//!
//! One `DeliveryLog` row is created per attempted send (not per schedule
//! tick) and mutated by the delivery tracker as the attempt progresses
//! through its state machine.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// Enums
// ============================================================================

/// Status of a delivery log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::DeliveryStatus")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    PermanentlyFailed,
    Bounced,
    Skipped,
}

impl DeliveryStatus {
    /// Terminal states never re-enter the retry pipeline.
    ///
    /// `Sent` may still transition to `Bounced` via transport feedback, but
    /// no retry timer is ever armed for it.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending | DeliveryStatus::Failed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "PENDING"),
            DeliveryStatus::Sent => write!(f, "SENT"),
            DeliveryStatus::Failed => write!(f, "FAILED"),
            DeliveryStatus::PermanentlyFailed => write!(f, "PERMANENTLY_FAILED"),
            DeliveryStatus::Bounced => write!(f, "BOUNCED"),
            DeliveryStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Bounce classification reported by the transport feedback channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BounceType {
    Hard,
    Soft,
}

// ============================================================================
// DeliveryLog Models (Query/Insert/Update)
// ============================================================================

/// DeliveryLog query model for SELECT operations
#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::delivery_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryLog {
    pub id: i64,
    pub schedule_id: Option<i32>,
    pub report_id: String,
    pub recipients: JsonValue,
    pub format: crate::models::ReportFormat,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub error_message: Option<String>,
    pub sent_at: Option<NaiveDateTime>,
    pub metadata: JsonValue,
    pub created_at: NaiveDateTime,
}

/// NewDeliveryLog insert model for INSERT operations
#[derive(Debug, Insertable, Clone)]
#[diesel(table_name = crate::schema::delivery_logs)]
pub struct NewDeliveryLog {
    pub schedule_id: Option<i32>,
    pub report_id: String,
    pub recipients: JsonValue,
    pub format: crate::models::ReportFormat,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub metadata: JsonValue,
}

/// UpdateDeliveryLog model for UPDATE operations
#[derive(Debug, AsChangeset, Clone, Default)]
#[diesel(table_name = crate::schema::delivery_logs)]
pub struct UpdateDeliveryLog {
    pub status: Option<DeliveryStatus>,
    pub attempt_count: Option<i32>,
    pub error_message: Option<Option<String>>,
    pub sent_at: Option<Option<NaiveDateTime>>,
    pub metadata: Option<JsonValue>,
}

// ============================================================================
// Aggregated statistics
// ============================================================================

/// Per-schedule delivery statistics aggregated from the log history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub pending: usize,
    pub skipped: usize,
    pub success_rate: f64,
}

impl DeliveryStats {
    /// Aggregates statistics from a set of log statuses.
    ///
    /// `success_rate` is `sent / total * 100`, and exactly `0` for an empty
    /// history. Bounced and permanently failed deliveries count as failed.
    pub fn from_statuses(statuses: &[DeliveryStatus]) -> Self {
        let total = statuses.len();
        let mut sent = 0;
        let mut failed = 0;
        let mut pending = 0;
        let mut skipped = 0;

        for status in statuses {
            match status {
                DeliveryStatus::Sent => sent += 1,
                DeliveryStatus::Failed
                | DeliveryStatus::PermanentlyFailed
                | DeliveryStatus::Bounced => failed += 1,
                DeliveryStatus::Pending => pending += 1,
                DeliveryStatus::Skipped => skipped += 1,
            }
        }

        let success_rate = if total == 0 {
            0.0
        } else {
            sent as f64 / total as f64 * 100.0
        };

        Self {
            total,
            sent,
            failed,
            pending,
            skipped,
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_empty_history_is_zero_not_nan() {
        let stats = DeliveryStats::from_statuses(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(!stats.success_rate.is_nan());
    }

    #[test]
    fn test_stats_mixed_history() {
        let statuses = [
            DeliveryStatus::Sent,
            DeliveryStatus::Sent,
            DeliveryStatus::Failed,
            DeliveryStatus::Pending,
            DeliveryStatus::Skipped,
        ];

        let stats = DeliveryStats::from_statuses(&statuses);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.success_rate, 40.0);
    }

    #[test]
    fn test_stats_counts_terminal_failures_as_failed() {
        let statuses = [
            DeliveryStatus::PermanentlyFailed,
            DeliveryStatus::Bounced,
            DeliveryStatus::Sent,
        ];

        let stats = DeliveryStats::from_statuses(&statuses);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.sent, 1);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::Failed.is_terminal());
        assert!(DeliveryStatus::Sent.is_terminal());
        assert!(DeliveryStatus::PermanentlyFailed.is_terminal());
        assert!(DeliveryStatus::Bounced.is_terminal());
        assert!(DeliveryStatus::Skipped.is_terminal());
    }
}
