//! Schedule service for business logic.
//!
//! The administrative surface exposed to the surrounding application:
//! create/update/delete, pause/resume/cancel, execute-now, and delivery
//! history and statistics. Configuration errors are rejected here,
//! synchronously, so they never reach the dispatcher.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;

use crate::delivery::DeliveryTracker;
use crate::error::{AppError, AppResult};
use crate::models::{
    DeliveryLog, DeliveryStats, DistributionCondition, Frequency, NewReportSchedule, Recipients,
    ReportFormat, ReportSchedule, ScheduleStatus, UpdateReportSchedule,
};
use crate::repositories::ScheduleRepository;
use crate::scheduling::{Dispatcher, next_run};

/// Default number of history entries returned when no limit is given.
const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Request to create a new report schedule.
#[derive(Debug, Clone)]
pub struct CreateScheduleRequest {
    pub report_id: String,
    pub report_type: String,
    pub user_id: String,
    pub frequency: Frequency,
    pub cron_expression: Option<String>,
    /// IANA timezone name; defaults to UTC.
    pub timezone: Option<String>,
    pub format: ReportFormat,
    pub recipients: Recipients,
    pub distribution_condition: Option<DistributionCondition>,
}

/// Request to update an existing report schedule. `None` fields are left
/// unchanged; the double options clear nullable columns explicitly.
#[derive(Debug, Clone, Default)]
pub struct UpdateScheduleRequest {
    pub frequency: Option<Frequency>,
    pub cron_expression: Option<Option<String>>,
    pub timezone: Option<String>,
    pub format: Option<ReportFormat>,
    pub recipients: Option<Recipients>,
    pub distribution_condition: Option<Option<DistributionCondition>>,
}

/// Schedule service handling the administrative operations.
#[derive(Clone)]
pub struct ScheduleService {
    schedules: ScheduleRepository,
    tracker: Arc<DeliveryTracker>,
    dispatcher: Arc<Dispatcher>,
}

impl ScheduleService {
    pub fn new(
        schedules: ScheduleRepository,
        tracker: Arc<DeliveryTracker>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            schedules,
            tracker,
            dispatcher,
        }
    }

    // ========================================================================
    // Schedule management
    // ========================================================================

    /// Creates a new schedule with its first `next_run_at` computed from
    /// "now". The schedule starts ACTIVE.
    pub async fn create_schedule(
        &self,
        request: CreateScheduleRequest,
    ) -> AppResult<ReportSchedule> {
        request.recipients.validate()?;
        if let Some(ref condition) = request.distribution_condition {
            condition.validate()?;
        }

        let timezone = request.timezone.unwrap_or_else(|| "UTC".to_string());
        validate_timezone(&timezone)?;
        validate_cadence(request.frequency, request.cron_expression.as_deref())?;

        let now = Utc::now();
        let first_run = next_run(
            request.frequency,
            request.cron_expression.as_deref(),
            &timezone,
            now,
        );

        let new_schedule = NewReportSchedule {
            report_id: request.report_id,
            report_type: request.report_type,
            user_id: request.user_id,
            frequency: request.frequency,
            cron_expression: request.cron_expression,
            timezone,
            format: request.format,
            recipients: request.recipients.to_json()?,
            distribution_condition: request
                .distribution_condition
                .as_ref()
                .map(DistributionCondition::to_json)
                .transpose()?,
            status: ScheduleStatus::Active,
            next_run_at: Some(first_run.naive_utc()),
        };

        let schedule = self.schedules.create(new_schedule).await?;
        tracing::info!(
            schedule_id = schedule.id,
            report_type = %schedule.report_type,
            frequency = %schedule.frequency,
            "Schedule created"
        );
        Ok(schedule)
    }

    /// Updates a schedule. When any cadence field changes, `next_run_at` is
    /// recomputed from "now".
    pub async fn update_schedule(
        &self,
        id: i32,
        request: UpdateScheduleRequest,
    ) -> AppResult<ReportSchedule> {
        let existing = self.schedules.get_by_id(id).await?;

        if let Some(ref recipients) = request.recipients {
            recipients.validate()?;
        }
        if let Some(Some(ref condition)) = request.distribution_condition {
            condition.validate()?;
        }
        if let Some(ref timezone) = request.timezone {
            validate_timezone(timezone)?;
        }

        let frequency = request.frequency.unwrap_or(existing.frequency);
        let cron_expression = match &request.cron_expression {
            Some(value) => value.clone(),
            None => existing.cron_expression.clone(),
        };
        let timezone = request
            .timezone
            .clone()
            .unwrap_or_else(|| existing.timezone.clone());
        validate_cadence(frequency, cron_expression.as_deref())?;

        let cadence_changed = request.frequency.is_some()
            || request.cron_expression.is_some()
            || request.timezone.is_some();

        let next_run_at = if cadence_changed {
            Some(Some(
                next_run(frequency, cron_expression.as_deref(), &timezone, Utc::now()).naive_utc(),
            ))
        } else {
            None
        };

        let update = UpdateReportSchedule {
            frequency: request.frequency,
            cron_expression: request.cron_expression,
            timezone: request.timezone,
            format: request.format,
            recipients: request
                .recipients
                .as_ref()
                .map(Recipients::to_json)
                .transpose()?,
            distribution_condition: match request.distribution_condition {
                None => None,
                Some(None) => Some(None),
                Some(Some(condition)) => Some(Some(condition.to_json()?)),
            },
            status: None,
            next_run_at,
            updated_at: Some(Utc::now().naive_utc()),
        };

        self.schedules.update(id, update).await
    }

    pub async fn delete_schedule(&self, id: i32) -> AppResult<()> {
        self.schedules.delete(id).await?;
        tracing::info!(schedule_id = id, "Schedule deleted");
        Ok(())
    }

    pub async fn get_schedule(&self, id: i32) -> AppResult<ReportSchedule> {
        self.schedules.get_by_id(id).await
    }

    pub async fn list_schedules_by_user(&self, user_id: &str) -> AppResult<Vec<ReportSchedule>> {
        self.schedules.list_by_user(user_id).await
    }

    // ========================================================================
    // Lifecycle transitions
    // ========================================================================

    /// Pauses a schedule. `next_run_at` is retained but the dispatcher skips
    /// PAUSED schedules until resumed.
    pub async fn pause_schedule(&self, id: i32) -> AppResult<ReportSchedule> {
        self.set_status(id, ScheduleStatus::Paused).await
    }

    /// Resumes a paused schedule. `next_run_at` is recomputed from "now" so
    /// a long pause does not cause an immediate stale fire.
    pub async fn resume_schedule(&self, id: i32) -> AppResult<ReportSchedule> {
        let schedule = self.schedules.get_by_id(id).await?;

        let next = next_run(
            schedule.frequency,
            schedule.cron_expression.as_deref(),
            &schedule.timezone,
            Utc::now(),
        );

        self.schedules
            .update(
                id,
                UpdateReportSchedule {
                    status: Some(ScheduleStatus::Active),
                    next_run_at: Some(Some(next.naive_utc())),
                    updated_at: Some(Utc::now().naive_utc()),
                    ..Default::default()
                },
            )
            .await
    }

    /// Cancels a schedule permanently. A CANCELLED schedule is never
    /// selected by the dispatcher again.
    pub async fn cancel_schedule(&self, id: i32) -> AppResult<ReportSchedule> {
        self.set_status(id, ScheduleStatus::Cancelled).await
    }

    async fn set_status(&self, id: i32, status: ScheduleStatus) -> AppResult<ReportSchedule> {
        let schedule = self
            .schedules
            .update(
                id,
                UpdateReportSchedule {
                    status: Some(status),
                    updated_at: Some(Utc::now().naive_utc()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(schedule_id = id, status = ?status, "Schedule status changed");
        Ok(schedule)
    }

    // ========================================================================
    // Execution and history
    // ========================================================================

    /// Runs a schedule immediately, bypassing the clock but going through
    /// the same condition-evaluate, deliver, reschedule path.
    ///
    /// Pause gates execution, not merely display: a non-ACTIVE schedule is
    /// refused and its `next_run_at` is left untouched.
    pub async fn execute_now(&self, id: i32) -> AppResult<()> {
        let schedule = self.schedules.get_by_id(id).await?;
        ensure_runnable(schedule.status)?;
        self.dispatcher.run_schedule(schedule).await
    }

    /// Delivery history for a schedule, newest first.
    pub async fn delivery_history(
        &self,
        schedule_id: i32,
        limit: Option<i64>,
    ) -> AppResult<Vec<DeliveryLog>> {
        self.tracker
            .history(schedule_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await
    }

    /// Aggregated delivery statistics for a schedule.
    pub async fn delivery_stats(&self, schedule_id: i32) -> AppResult<DeliveryStats> {
        self.tracker.stats(schedule_id).await
    }
}

/// Only ACTIVE schedules may run, whether from the clock or execute-now.
fn ensure_runnable(status: ScheduleStatus) -> AppResult<()> {
    match status {
        ScheduleStatus::Active => Ok(()),
        ScheduleStatus::Paused => Err(AppError::BadRequest {
            message: "Cannot execute a paused schedule".to_string(),
        }),
        ScheduleStatus::Cancelled => Err(AppError::BadRequest {
            message: "Cannot execute a cancelled schedule".to_string(),
        }),
    }
}

fn validate_timezone(timezone: &str) -> AppResult<()> {
    chrono_tz::Tz::from_str(timezone)
        .map(|_| ())
        .map_err(|_| AppError::Validation {
            field: "timezone".to_string(),
            reason: format!("Unknown timezone: {}", timezone),
        })
}

/// Rejects unparseable cron expressions for CUSTOM schedules at the
/// boundary. Rows that predate this check still degrade to the daily
/// cadence at dispatch time rather than crashing the loop.
fn validate_cadence(frequency: Frequency, cron_expression: Option<&str>) -> AppResult<()> {
    if frequency != Frequency::Custom {
        return Ok(());
    }

    let Some(expression) = cron_expression.filter(|e| !e.trim().is_empty()) else {
        // Allowed: documented degraded mode falls back to daily
        return Ok(());
    };

    cron::Schedule::from_str(expression)
        .map(|_| ())
        .map_err(|e| AppError::Validation {
            field: "cron_expression".to_string(),
            reason: format!("Invalid cron expression: {}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_runnable_gates_paused_and_cancelled() {
        assert!(ensure_runnable(ScheduleStatus::Active).is_ok());
        assert!(ensure_runnable(ScheduleStatus::Paused).is_err());
        assert!(ensure_runnable(ScheduleStatus::Cancelled).is_err());
    }

    #[test]
    fn test_validate_timezone() {
        assert!(validate_timezone("UTC").is_ok());
        assert!(validate_timezone("America/Los_Angeles").is_ok());
        assert!(validate_timezone("Nowhere/Special").is_err());
    }

    #[test]
    fn test_validate_cadence_rejects_bad_custom_expression() {
        assert!(validate_cadence(Frequency::Custom, Some("every day at nine")).is_err());
        assert!(validate_cadence(Frequency::Custom, Some("0 0 9 * * *")).is_ok());
    }

    #[test]
    fn test_validate_cadence_allows_missing_expression() {
        // Degrades to daily at dispatch time instead of failing
        assert!(validate_cadence(Frequency::Custom, None).is_ok());
        assert!(validate_cadence(Frequency::Custom, Some("  ")).is_ok());
    }

    #[test]
    fn test_validate_cadence_ignores_expression_for_fixed_frequencies() {
        assert!(validate_cadence(Frequency::Daily, Some("garbage")).is_ok());
    }
}
