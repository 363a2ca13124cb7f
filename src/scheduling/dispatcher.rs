//! Dispatcher: discovers due schedules and initiates delivery.
//!
//! Runs one pass per clock tick. Within a pass schedules are processed
//! sequentially and independently; a slow delivery for one schedule delays
//! but never blocks the others, and the per-schedule guard keeps
//! overlapping passes from double-sending.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use crate::delivery::DeliveryTracker;
use crate::error::AppResult;
use crate::models::ReportSchedule;
use crate::repositories::ScheduleRepository;
use crate::scheduling::next_run::next_run;

pub struct Dispatcher {
    schedules: ScheduleRepository,
    tracker: Arc<DeliveryTracker>,
    in_flight: DashMap<i32, ()>,
}

impl Dispatcher {
    pub fn new(schedules: ScheduleRepository, tracker: Arc<DeliveryTracker>) -> Arc<Self> {
        Arc::new(Self {
            schedules,
            tracker,
            in_flight: DashMap::new(),
        })
    }

    /// One dispatcher pass: select ACTIVE schedules whose `next_run_at` has
    /// elapsed and run each through the delivery pipeline.
    ///
    /// Returns the number of due schedules found.
    pub async fn poll_once(&self) -> AppResult<usize> {
        let now = Utc::now();
        let due = self.schedules.due(now.naive_utc()).await?;
        let count = due.len();

        if count > 0 {
            tracing::debug!(count, "Dispatching due schedules");
        }

        for schedule in due {
            let schedule_id = schedule.id;
            if let Err(e) = self.run_schedule(schedule).await {
                tracing::error!(schedule_id, error = %e, "Schedule dispatch failed");
            }
        }

        Ok(count)
    }

    /// Runs the full pipeline for one schedule: deliver, then advance the
    /// schedule clock. Also the entry point for execute-now.
    ///
    /// The same schedule is never processed concurrently; a second caller
    /// finds the guard held and backs off.
    pub async fn run_schedule(&self, schedule: ReportSchedule) -> AppResult<()> {
        if self.in_flight.insert(schedule.id, ()).is_some() {
            tracing::debug!(
                schedule_id = schedule.id,
                "Schedule already being processed, skipping"
            );
            return Ok(());
        }

        let result = self.process(&schedule).await;
        self.in_flight.remove(&schedule.id);
        result
    }

    async fn process(&self, schedule: &ReportSchedule) -> AppResult<()> {
        let now = Utc::now();

        // Delivery failures are fully recorded on the log row and retried by
        // the tracker on its own timeline; they must not stall rescheduling.
        if let Err(e) = self.tracker.start_delivery(schedule).await {
            tracing::error!(
                schedule_id = schedule.id,
                error = %e,
                "Delivery pipeline error"
            );
        }

        // Recompute unconditionally: a failed or skipped send must not make
        // the schedule re-fire on the next tick.
        let next = next_run(
            schedule.frequency,
            schedule.cron_expression.as_deref(),
            &schedule.timezone,
            now,
        );

        self.schedules
            .update_run_times(schedule.id, now.naive_utc(), next.naive_utc())
            .await
    }
}
