//! Application state wiring.
//!
//! Builds the repository, tracker, dispatcher, and service graph from a
//! database pool and loaded settings. Cloning is cheap since everything
//! shares `Arc`-backed pools.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::db::AsyncDbPool;
use crate::delivery::{
    DeliveryTracker, MailSender, ReportGenerator, RetryPolicy, StubReportGenerator, build_mailer,
};
use crate::error::AppResult;
use crate::repositories::Repositories;
use crate::scheduling::Dispatcher;
use crate::services::Services;

/// Application state containing all shared services and resources.
#[derive(Clone)]
pub struct AppState {
    /// All business logic services
    pub services: Services,
    /// Direct access to the database connection pool
    pub db_pool: AsyncDbPool,
    /// Delivery tracker owning the retry timers
    pub tracker: Arc<DeliveryTracker>,
    /// Dispatcher handling due-schedule processing
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Creates application state with the default collaborators: the mailer
    /// selected from SMTP configuration and the stub report generator.
    pub fn new(pool: AsyncDbPool, settings: &Settings) -> AppResult<Self> {
        let mailer = build_mailer(&settings.smtp)?;
        Ok(Self::with_collaborators(
            pool,
            settings,
            Arc::new(StubReportGenerator),
            mailer,
        ))
    }

    /// Creates application state with host-provided collaborators.
    ///
    /// The surrounding application injects its real report generator and,
    /// if desired, a custom mail transport.
    pub fn with_collaborators(
        pool: AsyncDbPool,
        settings: &Settings,
        generator: Arc<dyn ReportGenerator>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        let repos = Repositories::new(pool.clone());

        let tracker = DeliveryTracker::new(
            repos.delivery_logs.clone(),
            generator,
            mailer,
            RetryPolicy::from_config(&settings.delivery),
            Duration::from_secs(settings.delivery.timeout_seconds),
        );

        let dispatcher = Dispatcher::new(repos.schedules.clone(), Arc::clone(&tracker));
        let services = Services::new(repos, Arc::clone(&tracker), Arc::clone(&dispatcher));

        Self {
            services,
            db_pool: pool,
            tracker,
            dispatcher,
        }
    }
}
