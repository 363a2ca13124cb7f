//! Delivery tracking state machine.
//!
//! Each delivery log row walks `PENDING -> SENT`, `PENDING -> SKIPPED`, or
//! `PENDING -> FAILED -> {FAILED | PERMANENTLY_FAILED | SENT}`, with
//! `SENT -> BOUNCED` driven out-of-band by transport feedback. Retries run
//! on their own deferred timers, decoupled from the dispatcher tick, and
//! are reconstructed from persisted rows on boot.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Value as JsonValue, json};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::DeliveryConfig;
use crate::delivery::generator::{ReportGenerator, ReportPayload};
use crate::delivery::mailer::{MailMetadata, MailSender, ReportArtifact, SendOutcome};
use crate::error::AppResult;
use crate::models::{
    BounceType, DeliveryLog, DeliveryStats, DeliveryStatus, NewDeliveryLog, Recipients,
    ReportSchedule, UpdateDeliveryLog,
};
use crate::repositories::DeliveryLogRepository;
use crate::scheduling::condition;

const META_REPORT_TYPE: &str = "report_type";
const META_PARAMETERS: &str = "parameters";
const META_CONTENT_HASH: &str = "content_hash";
const META_BOUNCE_TYPE: &str = "bounce_type";
const META_BOUNCE_MESSAGE: &str = "bounce_message";
const META_INVALID_RECIPIENTS: &str = "invalid_recipients";

// ============================================================================
// Retry policy
// ============================================================================

/// What happens to a delivery after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Arm a deferred retry after the given delay.
    Retry { delay: Duration },
    /// The attempt ceiling is reached; the delivery is permanently failed.
    GiveUp,
}

/// Bounded-backoff retry policy.
///
/// Backoff tiers apply after the 1st, 2nd, ... failures; failures beyond
/// the last tier reuse the final value. The attempt that would exceed
/// `max_attempts` is never made.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: i32, backoff_seconds: &[u64]) -> Self {
        let backoff = if backoff_seconds.is_empty() {
            vec![Duration::from_secs(60)]
        } else {
            backoff_seconds.iter().map(|s| Duration::from_secs(*s)).collect()
        };

        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(config.max_attempts, &config.backoff_seconds)
    }

    /// Delay armed after the n-th failure (1-based), clamped to the last tier.
    pub fn backoff_after_failure(&self, failure_number: i32) -> Duration {
        let index = (failure_number.max(1) as usize - 1).min(self.backoff.len() - 1);
        self.backoff[index]
    }

    /// Disposition for a delivery whose attempt number `attempt_count` just
    /// failed transiently.
    pub fn disposition_after_failure(&self, attempt_count: i32) -> FailureDisposition {
        if attempt_count >= self.max_attempts {
            FailureDisposition::GiveUp
        } else {
            FailureDisposition::Retry {
                delay: self.backoff_after_failure(attempt_count),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, &[60, 300, 900])
    }
}

// ============================================================================
// Delivery tracker
// ============================================================================

/// Manages every delivery attempt from creation to terminal state.
pub struct DeliveryTracker {
    logs: DeliveryLogRepository,
    generator: Arc<dyn ReportGenerator>,
    mailer: Arc<dyn MailSender>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    retry_timers: DashMap<i64, JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl DeliveryTracker {
    pub fn new(
        logs: DeliveryLogRepository,
        generator: Arc<dyn ReportGenerator>,
        mailer: Arc<dyn MailSender>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            logs,
            generator,
            mailer,
            policy,
            attempt_timeout,
            retry_timers: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Creates a delivery log for a due schedule and runs the first attempt:
    /// generate, evaluate the distribution condition, then send.
    ///
    /// All outcomes are recorded on the log row; the caller (dispatcher or
    /// execute-now) advances the schedule regardless of what happens here.
    pub async fn start_delivery(self: &Arc<Self>, schedule: &ReportSchedule) -> AppResult<()> {
        let new_log = NewDeliveryLog {
            schedule_id: Some(schedule.id),
            report_id: schedule.report_id.clone(),
            recipients: schedule.recipients.clone(),
            format: schedule.format,
            status: DeliveryStatus::Pending,
            attempt_count: 1,
            metadata: json!({
                META_REPORT_TYPE: schedule.report_type,
                META_PARAMETERS: {},
            }),
        };

        let log = self.logs.create(new_log).await?;
        tracing::debug!(delivery_id = log.id, schedule_id = schedule.id, "Delivery created");

        self.execute_attempt(log, Some(schedule)).await
    }

    /// Runs one generate-and-send attempt for a delivery log.
    ///
    /// `schedule` is present only on the first attempt of a scheduled
    /// delivery; condition evaluation happens exactly once per cycle and is
    /// never repeated on retries or recovery.
    async fn execute_attempt(
        self: &Arc<Self>,
        log: DeliveryLog,
        schedule: Option<&ReportSchedule>,
    ) -> AppResult<()> {
        let report_type = log
            .metadata
            .get(META_REPORT_TYPE)
            .and_then(JsonValue::as_str)
            .unwrap_or(&log.report_id)
            .to_string();
        let parameters = log
            .metadata
            .get(META_PARAMETERS)
            .cloned()
            .unwrap_or_else(|| json!({}));

        // Generate. A generator hard failure is permanent; a timeout is a
        // transient failure like any transport hiccup.
        let generated = timeout(
            self.attempt_timeout,
            self.generator.generate(&report_type, &parameters),
        )
        .await;

        let payload = match generated {
            Err(_) => {
                return self
                    .record_transient_failure(&log, "Report generation timed out")
                    .await;
            }
            Ok(Err(e)) => {
                return self
                    .record_permanent_failure(&log, &format!("Report generation failed: {}", e))
                    .await;
            }
            Ok(Ok(payload)) => payload,
        };

        if let Some(schedule) = schedule {
            if !self.evaluate_condition(schedule, &payload).await {
                return self.mark_skipped(&log).await;
            }
        }

        let recipients = match Recipients::from_json(&log.recipients) {
            Ok(recipients) => recipients,
            Err(e) => {
                return self
                    .record_permanent_failure(&log, &format!("Invalid recipient snapshot: {}", e))
                    .await;
            }
        };

        let now = Utc::now();
        let artifact = ReportArtifact::from_payload(&payload, &report_type, log.format, now.date_naive());
        let metadata = MailMetadata {
            subject: format!("{} report - {}", report_type, now.format("%Y-%m-%d")),
            body: "Your scheduled report has been generated and is attached to this email."
                .to_string(),
        };

        let outcome = match timeout(
            self.attempt_timeout,
            self.mailer.send(&recipients, &artifact, &metadata),
        )
        .await
        {
            Err(_) => SendOutcome::Transient("Mail transport timed out".to_string()),
            Ok(outcome) => outcome,
        };

        match outcome {
            SendOutcome::Delivered => self.record_sent(&log, &payload).await,
            SendOutcome::Permanent(reason) => self.record_permanent_failure(&log, &reason).await,
            SendOutcome::Transient(reason) => self.record_transient_failure(&log, &reason).await,
        }
    }

    /// Evaluates the schedule's distribution condition against the fresh
    /// payload. Parse errors and history lookup errors fail open.
    async fn evaluate_condition(&self, schedule: &ReportSchedule, payload: &ReportPayload) -> bool {
        let parsed = match schedule.distribution_condition() {
            Ok(condition) => condition,
            Err(e) => {
                tracing::warn!(
                    schedule_id = schedule.id,
                    error = %e,
                    "Unreadable distribution condition, sending anyway"
                );
                return true;
            }
        };

        let previous_fingerprint = match self.logs.last_sent_metadata(schedule.id).await {
            Ok(metadata) => metadata.and_then(|m| {
                m.get(META_CONTENT_HASH)
                    .and_then(JsonValue::as_str)
                    .map(String::from)
            }),
            Err(e) => {
                tracing::warn!(
                    schedule_id = schedule.id,
                    error = %e,
                    "Could not load previous delivery fingerprint, sending anyway"
                );
                None
            }
        };

        condition::should_send(parsed.as_ref(), payload, previous_fingerprint.as_deref())
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    async fn record_sent(&self, log: &DeliveryLog, payload: &ReportPayload) -> AppResult<()> {
        let metadata = merge_objects(
            log.metadata.clone(),
            json!({ META_CONTENT_HASH: payload.fingerprint() }),
        );

        self.logs
            .update(
                log.id,
                UpdateDeliveryLog {
                    status: Some(DeliveryStatus::Sent),
                    sent_at: Some(Some(Utc::now().naive_utc())),
                    error_message: Some(None),
                    metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            delivery_id = log.id,
            attempt = log.attempt_count,
            "Delivery sent"
        );
        Ok(())
    }

    /// Condition not met: terminal, the mail sender is never invoked and
    /// `sent_at` stays null.
    async fn mark_skipped(&self, log: &DeliveryLog) -> AppResult<()> {
        self.logs
            .update(
                log.id,
                UpdateDeliveryLog {
                    status: Some(DeliveryStatus::Skipped),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(delivery_id = log.id, "Delivery skipped, condition not met");
        Ok(())
    }

    async fn record_permanent_failure(&self, log: &DeliveryLog, reason: &str) -> AppResult<()> {
        self.logs
            .update(
                log.id,
                UpdateDeliveryLog {
                    status: Some(DeliveryStatus::PermanentlyFailed),
                    error_message: Some(Some(reason.to_string())),
                    ..Default::default()
                },
            )
            .await?;

        tracing::error!(
            delivery_id = log.id,
            attempt = log.attempt_count,
            reason,
            "Delivery permanently failed"
        );
        Ok(())
    }

    /// Records a transient failure and either arms a deferred retry or, at
    /// the attempt ceiling, forces `PERMANENTLY_FAILED`.
    async fn record_transient_failure(
        self: &Arc<Self>,
        log: &DeliveryLog,
        reason: &str,
    ) -> AppResult<()> {
        match self.policy.disposition_after_failure(log.attempt_count) {
            FailureDisposition::GiveUp => {
                self.record_permanent_failure(
                    log,
                    &format!("Retries exhausted after {} attempts: {}", log.attempt_count, reason),
                )
                .await
            }
            FailureDisposition::Retry { delay } => {
                self.logs
                    .update(
                        log.id,
                        UpdateDeliveryLog {
                            status: Some(DeliveryStatus::Failed),
                            attempt_count: Some(log.attempt_count + 1),
                            error_message: Some(Some(reason.to_string())),
                            ..Default::default()
                        },
                    )
                    .await?;

                tracing::warn!(
                    delivery_id = log.id,
                    attempt = log.attempt_count,
                    retry_in_secs = delay.as_secs(),
                    reason,
                    "Delivery failed, retry armed"
                );

                self.arm_retry(log.id, delay);
                Ok(())
            }
        }
    }

    // ========================================================================
    // Deferred retries
    // ========================================================================

    /// Arms a one-shot deferred task that re-runs the delivery after the
    /// backoff delay. Timers are addressable by delivery id so an armed
    /// retry can be observed and is idempotent per delivery.
    fn arm_retry(self: &Arc<Self>, delivery_id: i64, delay: Duration) {
        let tracker = Arc::clone(self);
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            tracker.retry_timers.remove(&delivery_id);
            if let Err(e) = tracker.resume(delivery_id).await {
                tracing::error!(delivery_id, error = %e, "Retry attempt failed to run");
            }
        });

        if let Some(previous) = self.retry_timers.insert(delivery_id, handle) {
            previous.abort();
        }
    }

    /// Re-runs a non-terminal delivery. Used by retry timers and boot
    /// recovery; terminal rows are left untouched.
    pub async fn resume(self: &Arc<Self>, delivery_id: i64) -> AppResult<()> {
        let log = self.logs.get_by_id(delivery_id).await?;

        if log.status.is_terminal() {
            tracing::debug!(
                delivery_id,
                status = %log.status,
                "Delivery already terminal, nothing to resume"
            );
            return Ok(());
        }

        self.execute_attempt(log, None).await
    }

    /// Re-arms retry timers for every non-terminal delivery below the
    /// attempt ceiling. Called once at boot so in-flight deliveries survive
    /// a process restart.
    pub async fn recover_inflight(self: &Arc<Self>) -> AppResult<usize> {
        let rows = self.logs.recoverable(self.policy.max_attempts).await?;
        let count = rows.len();

        for log in rows {
            let delay = match log.status {
                // Crashed mid-attempt: run again right away
                DeliveryStatus::Pending => Duration::ZERO,
                _ => self.policy.backoff_after_failure(log.attempt_count - 1),
            };
            self.arm_retry(log.id, delay);
        }

        if count > 0 {
            tracing::info!(count, "Re-armed retry timers for in-flight deliveries");
        }
        Ok(count)
    }

    /// Number of currently armed retry timers.
    pub fn armed_retries(&self) -> usize {
        self.retry_timers.len()
    }

    /// Cancels all armed retry timers. Pending rows are picked up again by
    /// `recover_inflight` on the next boot.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.retry_timers.clear();
    }

    // ========================================================================
    // Transport feedback
    // ========================================================================

    /// Handles an asynchronous bounce notification for a sent delivery.
    ///
    /// Only `SENT` deliveries can bounce. A hard bounce additionally records
    /// the recipient addresses as invalid in the log metadata for future
    /// suppression tooling.
    pub async fn record_bounce(
        &self,
        delivery_id: i64,
        bounce_type: BounceType,
        message: &str,
    ) -> AppResult<()> {
        let log = self.logs.get_by_id(delivery_id).await?;

        if log.status != DeliveryStatus::Sent {
            tracing::warn!(
                delivery_id,
                status = %log.status,
                "Ignoring bounce for delivery that is not SENT"
            );
            return Ok(());
        }

        let mut patch = json!({
            META_BOUNCE_TYPE: bounce_type,
            META_BOUNCE_MESSAGE: message,
        });

        if bounce_type == BounceType::Hard {
            let invalid = Recipients::from_json(&log.recipients)
                .map(|r| r.to)
                .unwrap_or_default();
            patch[META_INVALID_RECIPIENTS] = json!(invalid);
        }

        self.logs
            .update(
                delivery_id,
                UpdateDeliveryLog {
                    status: Some(DeliveryStatus::Bounced),
                    error_message: Some(Some(message.to_string())),
                    metadata: Some(merge_objects(log.metadata, patch)),
                    ..Default::default()
                },
            )
            .await?;

        tracing::warn!(delivery_id, ?bounce_type, "Delivery bounced");
        Ok(())
    }

    // ========================================================================
    // History, statistics, retention
    // ========================================================================

    /// Delivery history for a schedule, newest first.
    pub async fn history(&self, schedule_id: i32, limit: i64) -> AppResult<Vec<DeliveryLog>> {
        self.logs.list_by_schedule(schedule_id, limit).await
    }

    /// Aggregated delivery statistics for a schedule.
    pub async fn stats(&self, schedule_id: i32) -> AppResult<DeliveryStats> {
        let statuses = self.logs.statuses_by_schedule(schedule_id).await?;
        Ok(DeliveryStats::from_statuses(&statuses))
    }

    /// Purges terminal delivery logs older than the retention period.
    /// Active retry timers are unaffected: non-terminal rows are excluded.
    pub async fn cleanup_old_logs(&self, retention_days: i64) -> AppResult<usize> {
        let deleted = self.logs.cleanup_old_logs(retention_days).await?;
        if deleted > 0 {
            tracing::info!(deleted, retention_days, "Purged old delivery logs");
        }
        Ok(deleted)
    }
}

/// Shallow-merges `patch` into `base` when both are JSON objects; otherwise
/// `patch` wins.
fn merge_objects(base: JsonValue, patch: JsonValue) -> JsonValue {
    match (base, patch) {
        (JsonValue::Object(mut base), JsonValue::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
            JsonValue::Object(base)
        }
        (_, patch) => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_tiers() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after_failure(1), Duration::from_secs(60));
        assert_eq!(policy.backoff_after_failure(2), Duration::from_secs(300));
        assert_eq!(policy.backoff_after_failure(3), Duration::from_secs(900));
        // Beyond the last tier the final value is reused
        assert_eq!(policy.backoff_after_failure(7), Duration::from_secs(900));
    }

    #[test]
    fn test_disposition_retries_below_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.disposition_after_failure(1),
            FailureDisposition::Retry {
                delay: Duration::from_secs(60)
            }
        );
        assert_eq!(
            policy.disposition_after_failure(2),
            FailureDisposition::Retry {
                delay: Duration::from_secs(300)
            }
        );
    }

    #[test]
    fn test_disposition_gives_up_at_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.disposition_after_failure(3), FailureDisposition::GiveUp);
        assert_eq!(policy.disposition_after_failure(4), FailureDisposition::GiveUp);
    }

    #[test]
    fn test_single_attempt_policy_never_retries() {
        let policy = RetryPolicy::new(1, &[60]);
        assert_eq!(policy.disposition_after_failure(1), FailureDisposition::GiveUp);
    }

    #[test]
    fn test_fail_twice_then_succeed_reaches_attempt_three() {
        // Walk the bookkeeping the tracker performs for the
        // fail/fail/succeed scenario and check the observable trail.
        let policy = RetryPolicy::default();
        let mut attempt_count = 1;
        let mut delays = Vec::new();

        for _ in 0..2 {
            match policy.disposition_after_failure(attempt_count) {
                FailureDisposition::Retry { delay } => {
                    delays.push(delay);
                    attempt_count += 1;
                }
                FailureDisposition::GiveUp => panic!("ceiling reached too early"),
            }
        }

        // Third attempt succeeds; the count is left where the failures put it
        assert_eq!(attempt_count, 3);
        assert_eq!(
            delays,
            vec![Duration::from_secs(60), Duration::from_secs(300)]
        );
    }

    #[test]
    fn test_attempt_count_never_exceeds_ceiling() {
        let policy = RetryPolicy::default();
        let mut attempt_count = 1;

        loop {
            match policy.disposition_after_failure(attempt_count) {
                FailureDisposition::Retry { .. } => attempt_count += 1,
                FailureDisposition::GiveUp => break,
            }
        }

        assert_eq!(attempt_count, policy.max_attempts);
    }

    #[test]
    fn test_merge_objects_overwrites_and_preserves() {
        let base = json!({ "report_type": "credentialing", "content_hash": "old" });
        let patch = json!({ "content_hash": "new", "bounce_type": "HARD" });

        let merged = merge_objects(base, patch);
        assert_eq!(merged["report_type"], "credentialing");
        assert_eq!(merged["content_hash"], "new");
        assert_eq!(merged["bounce_type"], "HARD");
    }

    #[test]
    fn test_merge_objects_non_object_patch_wins() {
        let merged = merge_objects(json!({ "a": 1 }), json!(null));
        assert_eq!(merged, json!(null));
    }
}
