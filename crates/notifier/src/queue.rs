//! Notification queue store.
//!
//! The queue lives in Postgres. Claiming is a single call to the
//! `claim_pending_notifications` function, which uses `FOR UPDATE SKIP LOCKED`
//! so concurrent workers never receive the same row. Retry bookkeeping
//! (`retry_count`, `next_attempt_at`) is done by `mark_notification_failed`.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use hotelops_common::types::{ContactDetails, NewNotificationJob, NotificationJob};

use crate::error::DispatchError;

/// Claim/commit contract the dispatcher drives.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Atomically take up to `limit` due jobs, marking them `processing`.
    /// Jobs stuck in `processing` past the stale window are taken again.
    async fn claim_pending(&self, limit: i64) -> Result<Vec<NotificationJob>, DispatchError>;

    /// Guest and hotel contact details for a booking.
    async fn resolve_contact(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<ContactDetails>, DispatchError>;

    async fn mark_sent(&self, id: Uuid) -> Result<(), DispatchError>;

    /// Requeue with backoff and an incremented retry counter.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), DispatchError>;
}

/// Retry timing handed to the queue functions.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff_secs: i32,
    /// Retries allowed after the first attempt. `None` retries indefinitely.
    pub max_retries: Option<i32>,
    /// How long a job may sit in `processing` before another claim takes it.
    pub stale_after_secs: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_secs: 300,
            max_retries: None,
            stale_after_secs: 900,
        }
    }
}

/// Postgres-backed queue.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Insert a job, immediately eligible for claiming.
    pub async fn enqueue(&self, job: &NewNotificationJob) -> Result<NotificationJob, DispatchError> {
        let payload = if job.payload.is_null() {
            serde_json::json!({})
        } else {
            job.payload.clone()
        };

        let row: NotificationJob = sqlx::query_as(
            r#"
            INSERT INTO notification_queue (id, booking_id, channel, template_code, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.booking_id)
        .bind(job.channel)
        .bind(&job.template_code)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            job_id = %row.id,
            channel = %row.channel,
            template_code = %row.template_code,
            "Notification enqueued"
        );
        Ok(row)
    }

    /// Fetch a job by ID (used by tests and diagnostics).
    pub async fn get(&self, id: Uuid) -> Result<Option<NotificationJob>, DispatchError> {
        let job = sqlx::query_as("SELECT * FROM notification_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn claim_pending(&self, limit: i64) -> Result<Vec<NotificationJob>, DispatchError> {
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let jobs: Vec<NotificationJob> =
            sqlx::query_as("SELECT * FROM claim_pending_notifications($1, $2)")
                .bind(limit)
                .bind(self.retry.stale_after_secs)
                .fetch_all(&self.pool)
                .await?;
        Ok(jobs)
    }

    async fn resolve_contact(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<ContactDetails>, DispatchError> {
        let contact = sqlx::query_as(
            r#"
            SELECT b.booking_code,
                   b.guest_name,
                   b.email AS guest_email,
                   b.phone AS guest_phone,
                   h.name AS hotel_name
            FROM bookings b
            JOIN hotels h ON h.id = b.hotel_id
            WHERE b.id = $1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(contact)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), DispatchError> {
        sqlx::query("SELECT mark_notification_sent($1)")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), DispatchError> {
        sqlx::query("SELECT mark_notification_failed($1, $2, $3, $4)")
            .bind(id)
            .bind(error)
            .bind(self.retry.backoff_secs)
            .bind(self.retry.max_retries)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
