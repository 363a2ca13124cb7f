//! Delivery pipeline: report generation, mail transport, and the
//! state-machine tracker that drives every send attempt to a terminal state.

mod generator;
mod mailer;
mod tracker;

pub use generator::{ReportGenerator, ReportPayload, StubReportGenerator};
pub use mailer::{
    ConsoleMailer, MailMetadata, MailSender, ReportArtifact, SendOutcome, SmtpMailer, build_mailer,
};
pub use tracker::{DeliveryTracker, FailureDisposition, RetryPolicy};
