use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery medium for a guest notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Email,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Whatsapp => write!(f, "whatsapp"),
            Channel::Email => write!(f, "email"),
        }
    }
}

/// Queue status of a notification job.
///
/// A job that failed but will be retried sits in `Pending` with a bumped
/// `retry_count` and a future `next_attempt_at`. `Failed` is only reached
/// when a retry cap is configured and exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Processing => write!(f, "processing"),
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A row of `notification_queue`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationJob {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub channel: Channel,
    pub template_code: String,
    /// Free-form template inputs (`link`, `token`, `guest_name`, `redirect_to`, ...)
    pub payload: serde_json::Value,
    pub status: NotificationStatus,
    pub retry_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationJob {
    /// Look up a string field in the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Parameters for enqueuing a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotificationJob {
    pub booking_id: Uuid,
    pub channel: Channel,
    pub template_code: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Guest and hotel contact details for a booking.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContactDetails {
    pub booking_code: String,
    pub guest_name: String,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub hotel_name: String,
}
