//! Dispatch cycle.
//!
//! One cycle drains the queue within a time budget:
//! 1. Claim a batch of due jobs (atomic, store-side)
//! 2. For each job, in claim order: resolve contact → mint magic link if the
//!    template needs one → render → send → mark sent / mark failed
//! 3. Pause between batches for provider rate limits, then claim again
//!
//! A failing job never stops the batch. A failing claim ends the cycle and is
//! reported in the summary.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use hotelops_common::config::AppConfig;
use hotelops_common::types::{Channel, NotificationJob};

use crate::error::DispatchError;
use crate::identity::{MagicLinkIssuer, SupabaseAdminIssuer};
use crate::queue::{NotificationStore, PgNotificationStore, RetryPolicy};
use crate::senders::{EmailSender, MessageSender, WhatsAppSender};
use crate::templates::{self, RenderContext, needs_magic_link};

/// Time budget and batching for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleOptions {
    pub max_runtime: Duration,
    pub batch_size: i64,
    pub inter_batch_delay: Duration,
}

impl CycleOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_runtime: Duration::from_millis(config.dispatch_max_runtime_ms),
            batch_size: config.dispatch_batch_size.max(1),
            inter_batch_delay: Duration::from_millis(config.dispatch_inter_batch_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Sent,
    Failed,
}

/// Outcome of one job within a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub id: Uuid,
    pub channel: Channel,
    pub template_code: String,
    pub status: JobOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a cycle. `processed == sent + failed`, one entry per claimed job.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub success: bool,
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub batches: usize,
    pub results: Vec<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleSummary {
    fn new() -> Self {
        Self {
            success: true,
            processed: 0,
            sent: 0,
            failed: 0,
            batches: 0,
            results: Vec::new(),
            error: None,
        }
    }

    fn record(&mut self, result: JobResult) {
        self.processed += 1;
        match result.status {
            JobOutcome::Sent => self.sent += 1,
            JobOutcome::Failed => self.failed += 1,
        }
        self.results.push(result);
    }
}

/// Drives the claim → send → commit loop against a store and channel senders.
pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    whatsapp: Option<Arc<dyn MessageSender>>,
    email: Option<Arc<dyn MessageSender>>,
    identity: Option<Arc<dyn MagicLinkIssuer>>,
    app_url: String,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self {
            store,
            whatsapp: None,
            email: None,
            identity: None,
            app_url: String::new(),
        }
    }

    pub fn with_whatsapp(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.whatsapp = Some(sender);
        self
    }

    pub fn with_email(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.email = Some(sender);
        self
    }

    pub fn with_identity(mut self, issuer: Arc<dyn MagicLinkIssuer>) -> Self {
        self.identity = Some(issuer);
        self
    }

    pub fn with_app_url(mut self, app_url: impl Into<String>) -> Self {
        self.app_url = app_url.into();
        self
    }

    /// Wire the Postgres store and every provider that has credentials.
    /// Providers without credentials stay absent; their jobs fail individually.
    pub fn from_config(pool: PgPool, config: &AppConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        let store = PgNotificationStore::new(
            pool,
            RetryPolicy {
                backoff_secs: config.notify_retry_backoff_secs,
                max_retries: config.notify_max_retries,
                stale_after_secs: config.notify_stale_processing_secs,
            },
        );
        let mut dispatcher = Dispatcher::new(Arc::new(store)).with_app_url(&config.public_app_url);

        match WhatsAppSender::from_config(client.clone(), config) {
            Some(sender) => dispatcher = dispatcher.with_whatsapp(Arc::new(sender)),
            None => tracing::warn!("WhatsApp credentials missing, WhatsApp jobs will fail"),
        }
        match EmailSender::from_config(client.clone(), config) {
            Some(sender) => dispatcher = dispatcher.with_email(Arc::new(sender)),
            None => tracing::warn!("Email provider not configured, email jobs will fail"),
        }
        if let Some(issuer) = SupabaseAdminIssuer::from_config(client, config) {
            dispatcher = dispatcher.with_identity(Arc::new(issuer));
        }

        Ok(dispatcher)
    }

    /// Run one dispatch cycle.
    pub async fn run_cycle(&self, opts: CycleOptions) -> CycleSummary {
        let started = Instant::now();
        let mut summary = CycleSummary::new();

        while started.elapsed() < opts.max_runtime {
            let jobs = match self.store.claim_pending(opts.batch_size).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim notifications, ending cycle");
                    summary.success = false;
                    summary.error = Some(e.to_string());
                    break;
                }
            };

            if jobs.is_empty() {
                tracing::debug!("Notification queue drained");
                break;
            }

            summary.batches += 1;
            tracing::info!(batch = summary.batches, jobs = jobs.len(), "Claimed notifications");

            for job in jobs {
                let span = tracing::info_span!(
                    "notification",
                    job_id = %job.id,
                    channel = %job.channel,
                    template_code = %job.template_code,
                    retry_count = job.retry_count
                );
                let result = self.process_job(&job).instrument(span).await;
                summary.record(result);
            }

            // Only pause if there is budget left to poll again.
            if started.elapsed() + opts.inter_batch_delay >= opts.max_runtime {
                break;
            }
            tokio::time::sleep(opts.inter_batch_delay).await;
        }

        tracing::info!(
            processed = summary.processed,
            sent = summary.sent,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Dispatch cycle finished"
        );
        summary
    }

    async fn process_job(&self, job: &NotificationJob) -> JobResult {
        match self.deliver(job).await {
            Ok(()) => {
                let error = match self.store.mark_sent(job.id).await {
                    Ok(()) => {
                        tracing::info!("Notification sent");
                        None
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "Notification sent but not marked; it is resent once its claim goes stale"
                        );
                        Some(format!("sent, but marking failed: {}", e))
                    }
                };
                JobResult {
                    id: job.id,
                    channel: job.channel,
                    template_code: job.template_code.clone(),
                    status: JobOutcome::Sent,
                    error,
                }
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(error = %message, "Notification failed, scheduled for retry");
                if let Err(mark_err) = self.store.mark_failed(job.id, &message).await {
                    tracing::error!(error = %mark_err, "Failed to record notification failure");
                }
                JobResult {
                    id: job.id,
                    channel: job.channel,
                    template_code: job.template_code.clone(),
                    status: JobOutcome::Failed,
                    error: Some(message),
                }
            }
        }
    }

    async fn deliver(&self, job: &NotificationJob) -> Result<(), DispatchError> {
        let contact = self
            .store
            .resolve_contact(job.booking_id)
            .await?
            .ok_or(DispatchError::BookingNotFound(job.booking_id))?;

        let guest_email = contact
            .guest_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());
        let guest_phone = contact
            .guest_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let (recipient, sender) = match job.channel {
            Channel::Email => (
                guest_email.ok_or(DispatchError::MissingContact("Guest email missing"))?,
                self.email
                    .as_ref()
                    .ok_or(DispatchError::MissingCredential("Email provider"))?,
            ),
            Channel::Whatsapp => (
                guest_phone.ok_or(DispatchError::MissingContact("Guest phone missing"))?,
                self.whatsapp
                    .as_ref()
                    .ok_or(DispatchError::MissingCredential("WhatsApp credentials"))?,
            ),
        };

        let mut payload = job.payload.clone();
        if needs_magic_link(&job.template_code) {
            let issuer = self
                .identity
                .as_ref()
                .ok_or(DispatchError::MissingCredential("Identity provider"))?;
            let email = guest_email.ok_or(DispatchError::MissingContact("Guest email missing"))?;
            let link = issuer
                .generate_magic_link(email, job.payload_str("redirect_to"))
                .await?;
            match payload.as_object_mut() {
                Some(map) => {
                    map.insert("link".to_string(), serde_json::Value::String(link));
                }
                None => payload = serde_json::json!({ "link": link }),
            }
        }

        let ctx = RenderContext {
            contact: &contact,
            payload: &payload,
            app_url: &self.app_url,
        };
        let message = templates::render(&job.template_code, job.channel, &ctx)?;

        sender.send(recipient, &message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use hotelops_common::types::{ContactDetails, NotificationStatus};

    use crate::templates::RenderedMessage;

    const BACKOFF_SECS: i64 = 300;

    #[derive(Default)]
    struct MemoryStore {
        jobs: Mutex<Vec<NotificationJob>>,
        contacts: HashMap<Uuid, ContactDetails>,
        claim_fails: bool,
    }

    impl MemoryStore {
        fn job(&self, id: Uuid) -> NotificationJob {
            self.jobs
                .lock()
                .unwrap()
                .iter()
                .find(|j| j.id == id)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl NotificationStore for MemoryStore {
        async fn claim_pending(&self, limit: i64) -> Result<Vec<NotificationJob>, DispatchError> {
            if self.claim_fails {
                return Err(DispatchError::Store(sqlx::Error::PoolTimedOut));
            }
            let now = Utc::now();
            let mut jobs = self.jobs.lock().unwrap();
            let mut claimed = Vec::new();
            for job in jobs.iter_mut() {
                if claimed.len() as i64 >= limit {
                    break;
                }
                if job.status == NotificationStatus::Pending && job.next_attempt_at <= now {
                    job.status = NotificationStatus::Processing;
                    claimed.push(job.clone());
                }
            }
            Ok(claimed)
        }

        async fn resolve_contact(
            &self,
            booking_id: Uuid,
        ) -> Result<Option<ContactDetails>, DispatchError> {
            Ok(self.contacts.get(&booking_id).cloned())
        }

        async fn mark_sent(&self, id: Uuid) -> Result<(), DispatchError> {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                job.status = NotificationStatus::Sent;
                job.sent_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), DispatchError> {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                job.status = NotificationStatus::Pending;
                job.retry_count += 1;
                job.last_error = Some(error.to_string());
                job.next_attempt_at = Utc::now() + chrono::Duration::seconds(BACKOFF_SECS);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, RenderedMessage)>>,
        reject: bool,
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send(
            &self,
            recipient: &str,
            message: &RenderedMessage,
        ) -> Result<(), DispatchError> {
            if self.reject {
                return Err(DispatchError::Provider {
                    provider: "Test",
                    status: 400,
                    body: "rejected".to_string(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.clone()));
            Ok(())
        }
    }

    struct FixedIssuer;

    #[async_trait]
    impl MagicLinkIssuer for FixedIssuer {
        async fn generate_magic_link(
            &self,
            email: &str,
            _redirect_to: Option<&str>,
        ) -> Result<String, DispatchError> {
            Ok(format!("https://auth.example.com/verify?email={}", email))
        }
    }

    fn contact(email: Option<&str>, phone: Option<&str>) -> ContactDetails {
        ContactDetails {
            booking_code: "BK-1".to_string(),
            guest_name: "Ana Souza".to_string(),
            guest_email: email.map(str::to_string),
            guest_phone: phone.map(str::to_string),
            hotel_name: "Pousada Mar".to_string(),
        }
    }

    fn job(
        booking_id: Uuid,
        channel: Channel,
        template_code: &str,
        payload: serde_json::Value,
    ) -> NotificationJob {
        let now = Utc::now() - chrono::Duration::seconds(1);
        NotificationJob {
            id: Uuid::new_v4(),
            booking_id,
            channel,
            template_code: template_code.to_string(),
            payload,
            status: NotificationStatus::Pending,
            retry_count: 0,
            next_attempt_at: now,
            last_error: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn opts(max_runtime: Duration, batch_size: i64) -> CycleOptions {
        CycleOptions {
            max_runtime,
            batch_size,
            inter_batch_delay: Duration::ZERO,
        }
    }

    fn store_with(
        jobs: Vec<NotificationJob>,
        contacts: Vec<(Uuid, ContactDetails)>,
    ) -> Arc<MemoryStore> {
        Arc::new(MemoryStore {
            jobs: Mutex::new(jobs),
            contacts: contacts.into_iter().collect(),
            claim_fails: false,
        })
    }

    #[tokio::test]
    async fn test_missing_guest_email_requeues_job() {
        let booking = Uuid::new_v4();
        let j = job(booking, Channel::Email, "precheckin_link", json!({"link": "https://g/p"}));
        let id = j.id;
        let store = store_with(vec![j], vec![(booking, contact(None, Some("+5511999990000")))]);
        let email = Arc::new(RecordingSender::default());
        let dispatcher = Dispatcher::new(store.clone()).with_email(email.clone());

        let started: DateTime<Utc> = Utc::now();
        let summary = dispatcher.run_cycle(opts(Duration::from_secs(5), 10)).await;

        assert!(summary.success);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results[0].error.as_deref(), Some("Guest email missing"));

        let after = store.job(id);
        assert_eq!(after.status, NotificationStatus::Pending);
        assert_eq!(after.retry_count, 1);
        assert!(after.next_attempt_at > started);
        assert_eq!(after.last_error.as_deref(), Some("Guest email missing"));
        assert!(email.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_runtime_processes_nothing() {
        let booking = Uuid::new_v4();
        let store = store_with(
            vec![job(booking, Channel::Email, "checkout_thanks", json!({}))],
            vec![(booking, contact(Some("ana@example.com"), None))],
        );
        let dispatcher = Dispatcher::new(store.clone())
            .with_email(Arc::new(RecordingSender::default()));

        let summary = dispatcher.run_cycle(opts(Duration::ZERO, 10)).await;
        assert!(summary.success);
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.batches, 0);
        assert!(summary.results.is_empty());
    }

    #[tokio::test]
    async fn test_sent_jobs_are_not_reclaimed() {
        let booking = Uuid::new_v4();
        let store = store_with(
            vec![job(booking, Channel::Email, "checkout_thanks", json!({}))],
            vec![(booking, contact(Some("ana@example.com"), None))],
        );
        let email = Arc::new(RecordingSender::default());
        let dispatcher = Dispatcher::new(store.clone()).with_email(email.clone());

        let first = dispatcher.run_cycle(opts(Duration::from_secs(5), 10)).await;
        assert_eq!(first.sent, 1);
        let second = dispatcher.run_cycle(opts(Duration::from_secs(5), 10)).await;
        assert_eq!(second.processed, 0);
        assert_eq!(email.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_within_a_batch() {
        let good = Uuid::new_v4();
        let no_phone = Uuid::new_v4();
        let jobs = vec![
            job(good, Channel::Email, "booking_confirmation", json!({})),
            job(no_phone, Channel::Whatsapp, "checkout_thanks", json!({})),
            job(Uuid::new_v4(), Channel::Email, "checkout_thanks", json!({})),
            job(good, Channel::Whatsapp, "request_update", json!({"status": "Accepted"})),
        ];
        let store = store_with(
            jobs,
            vec![
                (good, contact(Some("ana@example.com"), Some("+55 11 99999-0000"))),
                (no_phone, contact(Some("bo@example.com"), None)),
            ],
        );
        let email = Arc::new(RecordingSender::default());
        let whatsapp = Arc::new(RecordingSender::default());
        let dispatcher = Dispatcher::new(store.clone())
            .with_email(email.clone())
            .with_whatsapp(whatsapp.clone());

        let summary = dispatcher.run_cycle(opts(Duration::from_secs(5), 10)).await;

        assert_eq!(summary.processed, 4);
        assert_eq!(summary.sent + summary.failed, summary.processed);
        assert_eq!(summary.sent, 2);
        let errors: Vec<_> = summary
            .results
            .iter()
            .filter_map(|r| r.error.as_deref())
            .collect();
        assert!(errors.contains(&"Guest phone missing"));
        assert!(errors.iter().any(|e| e.starts_with("Booking ") && e.ends_with("not found")));
        assert_eq!(email.sent.lock().unwrap().len(), 1);
        assert_eq!(whatsapp.sent.lock().unwrap()[0].0, "+55 11 99999-0000");
    }

    #[tokio::test]
    async fn test_results_follow_claim_order_across_batches() {
        let booking = Uuid::new_v4();
        let jobs: Vec<NotificationJob> = (0..5)
            .map(|_| job(booking, Channel::Email, "checkout_thanks", json!({})))
            .collect();
        let ids: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
        let store = store_with(jobs, vec![(booking, contact(Some("ana@example.com"), None))]);
        let dispatcher = Dispatcher::new(store.clone())
            .with_email(Arc::new(RecordingSender::default()));

        let summary = dispatcher.run_cycle(opts(Duration::from_secs(5), 2)).await;

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.processed, 5);
        let order: Vec<Uuid> = summary.results.iter().map(|r| r.id).collect();
        assert_eq!(order, ids);
    }

    #[tokio::test]
    async fn test_claim_failure_is_reported_not_thrown() {
        let store = Arc::new(MemoryStore {
            claim_fails: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(store);

        let summary = dispatcher.run_cycle(opts(Duration::from_secs(5), 10)).await;
        assert!(!summary.success);
        assert_eq!(summary.processed, 0);
        assert!(summary.error.is_some());
    }

    #[tokio::test]
    async fn test_provider_rejection_requeues() {
        let booking = Uuid::new_v4();
        let j = job(booking, Channel::Email, "checkout_thanks", json!({}));
        let id = j.id;
        let store = store_with(vec![j], vec![(booking, contact(Some("ana@example.com"), None))]);
        let dispatcher = Dispatcher::new(store.clone()).with_email(Arc::new(RecordingSender {
            reject: true,
            ..Default::default()
        }));

        let summary = dispatcher.run_cycle(opts(Duration::from_secs(5), 10)).await;
        assert_eq!(summary.failed, 1);
        let after = store.job(id);
        assert_eq!(after.retry_count, 1);
        assert!(after.last_error.unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_the_job() {
        let booking = Uuid::new_v4();
        let store = store_with(
            vec![job(booking, Channel::Whatsapp, "checkout_thanks", json!({}))],
            vec![(booking, contact(None, Some("+5511999990000")))],
        );
        let dispatcher = Dispatcher::new(store);

        let summary = dispatcher.run_cycle(opts(Duration::from_secs(5), 10)).await;
        assert_eq!(
            summary.results[0].error.as_deref(),
            Some("WhatsApp credentials not configured")
        );
    }

    #[tokio::test]
    async fn test_magic_link_is_spliced_into_payload() {
        let booking = Uuid::new_v4();
        let store = store_with(
            vec![job(booking, Channel::Email, "magic_login", json!({}))],
            vec![(booking, contact(Some("ana@example.com"), None))],
        );
        let email = Arc::new(RecordingSender::default());
        let dispatcher = Dispatcher::new(store)
            .with_email(email.clone())
            .with_identity(Arc::new(FixedIssuer));

        let summary = dispatcher.run_cycle(opts(Duration::from_secs(5), 10)).await;
        assert_eq!(summary.sent, 1);
        let sent = email.sent.lock().unwrap();
        assert!(
            sent[0]
                .1
                .text
                .contains("https://auth.example.com/verify?email=ana@example.com")
        );
    }

    #[tokio::test]
    async fn test_magic_link_without_identity_provider_fails() {
        let booking = Uuid::new_v4();
        let store = store_with(
            vec![job(booking, Channel::Email, "magic_login", json!({}))],
            vec![(booking, contact(Some("ana@example.com"), None))],
        );
        let dispatcher = Dispatcher::new(store).with_email(Arc::new(RecordingSender::default()));

        let summary = dispatcher.run_cycle(opts(Duration::from_secs(5), 10)).await;
        assert_eq!(
            summary.results[0].error.as_deref(),
            Some("Identity provider not configured")
        );
    }

    #[test]
    fn test_summary_serializes_contract_fields() {
        let mut summary = CycleSummary::new();
        summary.record(JobResult {
            id: Uuid::nil(),
            channel: Channel::Email,
            template_code: "checkout_thanks".to_string(),
            status: JobOutcome::Sent,
            error: None,
        });
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["processed"], 1);
        assert_eq!(json["results"][0]["status"], "sent");
        assert_eq!(json["results"][0]["channel"], "email");
        assert!(json.get("error").is_none());
    }
}
