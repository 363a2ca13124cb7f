//! Schedule repository for async database operations.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::db::AsyncDbPool;
use crate::error::{AppError, AppResult};
use crate::models::{NewReportSchedule, ReportSchedule, ScheduleStatus, UpdateReportSchedule};
use crate::schema::report_schedules;

#[derive(Clone)]
pub struct ScheduleRepository {
    pool: AsyncDbPool,
}

impl ScheduleRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, schedule: NewReportSchedule) -> AppResult<ReportSchedule> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        diesel::insert_into(report_schedules::table)
            .values(&schedule)
            .returning(ReportSchedule::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(AppError::from)
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<ReportSchedule> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        report_schedules::table
            .find(id)
            .select(ReportSchedule::as_select())
            .first(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => AppError::NotFound {
                    entity: "Schedule".to_string(),
                    field: "id".to_string(),
                    value: id.to_string(),
                },
                _ => AppError::from(e),
            })
    }

    pub async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<ReportSchedule>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        report_schedules::table
            .filter(report_schedules::user_id.eq(user_id))
            .order(report_schedules::created_at.desc())
            .select(ReportSchedule::as_select())
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }

    /// Returns all ACTIVE schedules whose next run timestamp has elapsed.
    ///
    /// PAUSED and CANCELLED schedules are never selected; a schedule without
    /// a computed `next_run_at` is not yet dispatchable.
    pub async fn due(&self, now: NaiveDateTime) -> AppResult<Vec<ReportSchedule>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        report_schedules::table
            .filter(report_schedules::status.eq(ScheduleStatus::Active))
            .filter(report_schedules::next_run_at.le(now))
            .order(report_schedules::next_run_at.asc())
            .select(ReportSchedule::as_select())
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }

    pub async fn update(
        &self,
        id: i32,
        update: UpdateReportSchedule,
    ) -> AppResult<ReportSchedule> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        diesel::update(report_schedules::table.find(id))
            .set(&update)
            .returning(ReportSchedule::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => AppError::NotFound {
                    entity: "Schedule".to_string(),
                    field: "id".to_string(),
                    value: id.to_string(),
                },
                _ => AppError::from(e),
            })
    }

    /// Persists the run bookkeeping after a dispatch cycle.
    ///
    /// Advancing `next_run_at` past "now" is what prevents the next
    /// dispatcher tick from reselecting the schedule.
    pub async fn update_run_times(
        &self,
        id: i32,
        last_run_at: NaiveDateTime,
        next_run_at: NaiveDateTime,
    ) -> AppResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        diesel::update(report_schedules::table.find(id))
            .set((
                report_schedules::last_run_at.eq(last_run_at),
                report_schedules::next_run_at.eq(next_run_at),
                report_schedules::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(())
    }

    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        let deleted = diesel::delete(report_schedules::table.find(id))
            .execute(&mut conn)
            .await
            .map_err(AppError::from)?;

        if deleted == 0 {
            Err(AppError::NotFound {
                entity: "Schedule".to_string(),
                field: "id".to_string(),
                value: id.to_string(),
            })
        } else {
            Ok(())
        }
    }
}
