//! Service layer for business logic operations.
//!
//! Services encapsulate business logic and coordinate between repositories,
//! the delivery tracker, and the dispatcher.

mod schedule_service;

pub use schedule_service::{CreateScheduleRequest, ScheduleService, UpdateScheduleRequest};

use std::sync::Arc;

use crate::delivery::DeliveryTracker;
use crate::repositories::Repositories;
use crate::scheduling::Dispatcher;

/// Aggregates all services for convenient access.
#[derive(Clone)]
pub struct Services {
    pub schedules: ScheduleService,
}

impl Services {
    /// Creates a new Services instance.
    pub fn new(
        repos: Repositories,
        tracker: Arc<DeliveryTracker>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            schedules: ScheduleService::new(repos.schedules, tracker, dispatcher),
        }
    }
}
