//! Repository layer for data access operations.
//!
//! Provides async CRUD operations for schedules and delivery logs. These are
//! the only mutation paths for shared state; neither the dispatcher nor the
//! tracker keeps authoritative state in memory.

mod delivery_log_repo;
mod schedule_repo;

pub use delivery_log_repo::DeliveryLogRepository;
pub use schedule_repo::ScheduleRepository;

use crate::db::AsyncDbPool;

/// Aggregates all repositories for convenient access.
///
/// Since `AsyncDbPool` uses `Arc` internally, cloning is cheap.
#[derive(Clone)]
pub struct Repositories {
    pub schedules: ScheduleRepository,
    pub delivery_logs: DeliveryLogRepository,
}

impl Repositories {
    /// Creates a new Repositories instance with all repositories initialized.
    pub fn new(pool: AsyncDbPool) -> Self {
        Self {
            schedules: ScheduleRepository::new(pool.clone()),
            delivery_logs: DeliveryLogRepository::new(pool),
        }
    }
}
