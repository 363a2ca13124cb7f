//! Schedule clock built on tokio-cron-scheduler.
//!
//! Hosts the periodic dispatcher tick and the daily delivery log retention
//! sweep. The tick interval is tunable and not load-bearing for
//! correctness; due schedules missed by one tick are picked up by the next.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler as TokioCronScheduler};

use crate::config::SchedulerConfig;
use crate::delivery::DeliveryTracker;
use crate::error::{AppError, AppResult};
use crate::scheduling::dispatcher::Dispatcher;

pub struct ScheduleClock {
    scheduler: Arc<Mutex<TokioCronScheduler>>,
    dispatcher: Arc<Dispatcher>,
    tracker: Arc<DeliveryTracker>,
    config: SchedulerConfig,
}

impl ScheduleClock {
    pub async fn new(
        dispatcher: Arc<Dispatcher>,
        tracker: Arc<DeliveryTracker>,
        config: SchedulerConfig,
    ) -> AppResult<Self> {
        let scheduler = TokioCronScheduler::new()
            .await
            .map_err(|e| AppError::Internal {
                source: anyhow::Error::from(e),
            })?;

        Ok(Self {
            scheduler: Arc::new(Mutex::new(scheduler)),
            dispatcher,
            tracker,
            config,
        })
    }

    /// Registers the tick and sweep jobs and starts the clock.
    pub async fn start(&self) -> AppResult<()> {
        self.register_dispatch_tick().await?;
        self.register_retention_sweep().await?;

        self.scheduler
            .lock()
            .await
            .start()
            .await
            .map_err(|e| AppError::Internal {
                source: anyhow::Error::from(e),
            })?;

        tracing::info!(
            tick_seconds = self.config.tick_seconds,
            "Schedule clock started"
        );
        Ok(())
    }

    /// Stop the clock gracefully
    pub async fn stop(&self) -> AppResult<()> {
        self.scheduler
            .lock()
            .await
            .shutdown()
            .await
            .map_err(|e| AppError::Internal {
                source: anyhow::Error::from(e),
            })?;
        Ok(())
    }

    async fn register_dispatch_tick(&self) -> AppResult<()> {
        let dispatcher = Arc::clone(&self.dispatcher);

        let tick = Job::new_repeated_async(
            Duration::from_secs(self.config.tick_seconds),
            move |_uuid, _lock| {
                let dispatcher = Arc::clone(&dispatcher);
                Box::pin(async move {
                    if let Err(e) = dispatcher.poll_once().await {
                        tracing::error!(error = %e, "Dispatcher pass failed");
                    }
                })
            },
        )
        .map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;

        self.add_job(tick).await
    }

    async fn register_retention_sweep(&self) -> AppResult<()> {
        let tracker = Arc::clone(&self.tracker);
        let retention_days = self.config.retention_days;

        let sweep = Job::new_async(
            self.config.retention_sweep_cron.as_str(),
            move |_uuid, _lock| {
                let tracker = Arc::clone(&tracker);
                Box::pin(async move {
                    if let Err(e) = tracker.cleanup_old_logs(retention_days).await {
                        tracing::error!(error = %e, "Retention sweep failed");
                    }
                })
            },
        )
        .map_err(|e| AppError::BadRequest {
            message: format!("Invalid retention sweep cron expression: {}", e),
        })?;

        self.add_job(sweep).await
    }

    async fn add_job(&self, job: Job) -> AppResult<()> {
        self.scheduler
            .lock()
            .await
            .add(job)
            .await
            .map_err(|e| AppError::Internal {
                source: anyhow::Error::from(e),
            })?;
        Ok(())
    }
}
