//! Data models for report schedules and delivery logs.

mod delivery;
mod schedule;

pub use delivery::{
    BounceType, DeliveryLog, DeliveryStats, DeliveryStatus, NewDeliveryLog, UpdateDeliveryLog,
};
pub use schedule::{
    DistributionCondition, Frequency, NewReportSchedule, Recipients, ReportFormat, ReportSchedule,
    ScheduleStatus, ThresholdOperator, UpdateReportSchedule,
};
