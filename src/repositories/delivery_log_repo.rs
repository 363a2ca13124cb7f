//! Delivery log repository for async database operations.
//!
//! Provides operations for the delivery_logs table, the audit trail of every
//! attempted send.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::Value as JsonValue;

use crate::db::AsyncDbPool;
use crate::error::{AppError, AppResult};
use crate::models::{DeliveryLog, DeliveryStatus, NewDeliveryLog, UpdateDeliveryLog};
use crate::schema::delivery_logs;

/// Delivery log repository
#[derive(Clone)]
pub struct DeliveryLogRepository {
    pool: AsyncDbPool,
}

impl DeliveryLogRepository {
    /// Creates a new DeliveryLogRepository with the given connection pool.
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    /// Creates a new delivery log entry
    pub async fn create(&self, new_log: NewDeliveryLog) -> AppResult<DeliveryLog> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        diesel::insert_into(delivery_logs::table)
            .values(&new_log)
            .returning(DeliveryLog::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(AppError::from)
    }

    pub async fn get_by_id(&self, id: i64) -> AppResult<DeliveryLog> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        delivery_logs::table
            .find(id)
            .select(DeliveryLog::as_select())
            .first(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => AppError::NotFound {
                    entity: "DeliveryLog".to_string(),
                    field: "id".to_string(),
                    value: id.to_string(),
                },
                _ => AppError::from(e),
            })
    }

    pub async fn update(&self, id: i64, update: UpdateDeliveryLog) -> AppResult<DeliveryLog> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        diesel::update(delivery_logs::table.find(id))
            .set(&update)
            .returning(DeliveryLog::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => AppError::NotFound {
                    entity: "DeliveryLog".to_string(),
                    field: "id".to_string(),
                    value: id.to_string(),
                },
                _ => AppError::from(e),
            })
    }

    /// Returns delivery history for a schedule, newest first.
    pub async fn list_by_schedule(
        &self,
        schedule_id: i32,
        limit: i64,
    ) -> AppResult<Vec<DeliveryLog>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        delivery_logs::table
            .filter(delivery_logs::schedule_id.eq(schedule_id))
            .order(delivery_logs::created_at.desc())
            .limit(limit)
            .select(DeliveryLog::as_select())
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }

    /// Loads only the status column for a schedule's full history, for
    /// statistics aggregation.
    pub async fn statuses_by_schedule(&self, schedule_id: i32) -> AppResult<Vec<DeliveryStatus>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        delivery_logs::table
            .filter(delivery_logs::schedule_id.eq(schedule_id))
            .select(delivery_logs::status)
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }

    /// Returns the metadata of the most recent successfully sent delivery
    /// for a schedule. Used by change detection to compare payload
    /// fingerprints across cycles.
    pub async fn last_sent_metadata(&self, schedule_id: i32) -> AppResult<Option<JsonValue>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        delivery_logs::table
            .filter(delivery_logs::schedule_id.eq(schedule_id))
            .filter(delivery_logs::status.eq(DeliveryStatus::Sent))
            .order(delivery_logs::created_at.desc())
            .select(delivery_logs::metadata)
            .first(&mut conn)
            .await
            .optional()
            .map_err(AppError::from)
    }

    /// Returns all non-terminal logs still below the attempt ceiling.
    ///
    /// Used at boot to re-arm retry timers lost with the previous process.
    pub async fn recoverable(&self, max_attempts: i32) -> AppResult<Vec<DeliveryLog>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        delivery_logs::table
            .filter(
                delivery_logs::status.eq(DeliveryStatus::Pending).or(
                    delivery_logs::status
                        .eq(DeliveryStatus::Failed)
                        .and(delivery_logs::attempt_count.lt(max_attempts)),
                ),
            )
            .order(delivery_logs::created_at.asc())
            .select(DeliveryLog::as_select())
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }

    /// Deletes terminal logs older than the retention period.
    ///
    /// Non-terminal rows are excluded so an active retry timer never loses
    /// its backing row.
    pub async fn cleanup_old_logs(&self, retention_days: i64) -> AppResult<usize> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        let cutoff = Utc::now().naive_utc() - Duration::days(retention_days);

        diesel::delete(
            delivery_logs::table.filter(
                delivery_logs::created_at
                    .lt(cutoff)
                    .and(delivery_logs::status.ne(DeliveryStatus::Pending))
                    .and(delivery_logs::status.ne(DeliveryStatus::Failed)),
            ),
        )
        .execute(&mut conn)
        .await
        .map_err(AppError::from)
    }
}
