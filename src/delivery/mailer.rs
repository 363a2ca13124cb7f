//! Mail transport abstraction and SMTP implementation.
//!
//! The tracker only cares about the three-way outcome: delivered, transient
//! failure (retried with backoff), or permanent failure (recorded once,
//! never retried). Transport details stay behind the `MailSender` trait.

use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::delivery::generator::ReportPayload;
use crate::error::{AppError, AppResult};
use crate::models::{Recipients, ReportFormat};

/// Outcome of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Transport hiccup; the delivery enters the retry path.
    Transient(String),
    /// Unrecoverable (e.g. malformed address, SMTP 5xx); recorded once
    /// without consuming retry budget.
    Permanent(String),
}

/// Rendered report ready to be attached to a message.
#[derive(Debug, Clone)]
pub struct ReportArtifact {
    pub filename: String,
    pub content_type: &'static str,
    pub content: Vec<u8>,
}

impl ReportArtifact {
    /// Assembles the attachment for a payload.
    ///
    /// Document rendering proper is an external concern; the artifact body
    /// here is the serialized payload. Filenames follow the
    /// `report-{type}-{date}.{ext}` convention.
    pub fn from_payload(
        payload: &ReportPayload,
        report_type: &str,
        format: ReportFormat,
        date: NaiveDate,
    ) -> Self {
        let content = serde_json::to_vec_pretty(&payload.data).unwrap_or_default();
        Self {
            filename: format!(
                "report-{}-{}.{}",
                report_type,
                date.format("%Y-%m-%d"),
                format.file_extension()
            ),
            content_type: format.content_type(),
            content,
        }
    }
}

/// Subject and body accompanying the attachment.
#[derive(Debug, Clone)]
pub struct MailMetadata {
    pub subject: String,
    pub body: String,
}

/// Transmits a rendered report artifact to a recipient set.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(
        &self,
        recipients: &Recipients,
        artifact: &ReportArtifact,
        metadata: &MailMetadata,
    ) -> SendOutcome;
}

// ============================================================================
// SMTP implementation
// ============================================================================

/// SMTP mail sender built on lettre's async transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> AppResult<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host).map_err(
            |e| AppError::Configuration {
                key: "smtp.host".to_string(),
                source: anyhow::Error::from(e),
            },
        )?;

        builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            config,
        })
    }

    /// Builds the outgoing message.
    ///
    /// Returns the human-readable reason on failure; every construction
    /// error (malformed address, bad attachment) is permanent.
    fn build_message(
        &self,
        recipients: &Recipients,
        artifact: &ReportArtifact,
        metadata: &MailMetadata,
    ) -> Result<Message, String> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_address)
            .parse()
            .map_err(|e| format!("Invalid sender address: {}", e))?;

        let mut builder = Message::builder().from(from).subject(metadata.subject.clone());

        for address in &recipients.to {
            let mailbox: Mailbox = address
                .parse()
                .map_err(|e| format!("Invalid recipient address '{}': {}", address, e))?;
            builder = builder.to(mailbox);
        }
        for address in &recipients.cc {
            let mailbox: Mailbox = address
                .parse()
                .map_err(|e| format!("Invalid cc address '{}': {}", address, e))?;
            builder = builder.cc(mailbox);
        }
        for address in &recipients.bcc {
            let mailbox: Mailbox = address
                .parse()
                .map_err(|e| format!("Invalid bcc address '{}': {}", address, e))?;
            builder = builder.bcc(mailbox);
        }

        let content_type = ContentType::parse(artifact.content_type)
            .map_err(|e| format!("Invalid attachment content type: {}", e))?;

        let attachment =
            Attachment::new(artifact.filename.clone()).body(artifact.content.clone(), content_type);

        builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(metadata.body.clone()))
                    .singlepart(attachment),
            )
            .map_err(|e| format!("Failed to assemble message: {}", e))
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(
        &self,
        recipients: &Recipients,
        artifact: &ReportArtifact,
        metadata: &MailMetadata,
    ) -> SendOutcome {
        let message = match self.build_message(recipients, artifact, metadata) {
            Ok(message) => message,
            Err(reason) => return SendOutcome::Permanent(reason),
        };

        match self.transport.send(message).await {
            Ok(_) => SendOutcome::Delivered,
            Err(e) if e.is_permanent() => SendOutcome::Permanent(e.to_string()),
            Err(e) => SendOutcome::Transient(e.to_string()),
        }
    }
}

// ============================================================================
// Console fallback
// ============================================================================

/// Fallback sender used when SMTP credentials are not configured.
///
/// Logs the rendered message instead of transmitting it, so development
/// environments can exercise the pipeline without a relay.
#[derive(Debug, Default)]
pub struct ConsoleMailer;

#[async_trait]
impl MailSender for ConsoleMailer {
    async fn send(
        &self,
        recipients: &Recipients,
        artifact: &ReportArtifact,
        metadata: &MailMetadata,
    ) -> SendOutcome {
        tracing::info!(
            to = ?recipients.to,
            cc = ?recipients.cc,
            bcc = ?recipients.bcc,
            subject = %metadata.subject,
            attachment = %artifact.filename,
            size = artifact.content.len(),
            "SMTP not configured, writing delivery to log"
        );
        SendOutcome::Delivered
    }
}

/// Selects the transport implementation from configuration.
pub fn build_mailer(config: &SmtpConfig) -> AppResult<std::sync::Arc<dyn MailSender>> {
    if config.is_configured() {
        Ok(std::sync::Arc::new(SmtpMailer::new(config.clone())?))
    } else {
        tracing::warn!("SMTP credentials not configured, using console output");
        Ok(std::sync::Arc::new(ConsoleMailer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact() -> ReportArtifact {
        ReportArtifact::from_payload(
            &ReportPayload::new(json!({ "rows": [] })),
            "credentialing",
            ReportFormat::Pdf,
            NaiveDate::from_ymd_opt(2025, 6, 20).unwrap(),
        )
    }

    fn metadata() -> MailMetadata {
        MailMetadata {
            subject: "credentialing report".to_string(),
            body: "Your scheduled report is attached.".to_string(),
        }
    }

    #[test]
    fn test_artifact_naming_convention() {
        let artifact = artifact();
        assert_eq!(artifact.filename, "report-credentialing-2025-06-20.pdf");
        assert_eq!(artifact.content_type, "application/pdf");
    }

    #[tokio::test]
    async fn test_build_message_rejects_malformed_recipient() {
        let mailer = SmtpMailer::new(SmtpConfig::default()).unwrap();
        let recipients = Recipients {
            to: vec!["definitely not an address".to_string()],
            cc: vec![],
            bcc: vec![],
        };

        let result = mailer.build_message(&recipients, &artifact(), &metadata());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_message_with_full_recipient_set() {
        let mailer = SmtpMailer::new(SmtpConfig::default()).unwrap();
        let recipients = Recipients {
            to: vec!["ops@example.com".to_string()],
            cc: vec!["lead@example.com".to_string()],
            bcc: vec!["audit@example.com".to_string()],
        };

        let result = mailer.build_message(&recipients, &artifact(), &metadata());
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_console_mailer_always_delivers() {
        let mailer = ConsoleMailer;
        let recipients = Recipients {
            to: vec!["ops@example.com".to_string()],
            cc: vec![],
            bcc: vec![],
        };

        let outcome = mailer.send(&recipients, &artifact(), &metadata()).await;
        assert_eq!(outcome, SendOutcome::Delivered);
    }
}
