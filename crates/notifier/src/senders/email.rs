//! Transactional email sender (Resend API).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use hotelops_common::config::AppConfig;

use super::{MessageSender, error_body};
use crate::error::DispatchError;
use crate::templates::RenderedMessage;

pub struct EmailSender {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// Success responses carry `id`; some failures arrive as 200 with `error`.
#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: Option<String>,
    error: Option<serde_json::Value>,
}

impl EmailSender {
    pub fn new(client: Client, api_url: String, api_key: String, from: String) -> Self {
        Self {
            client,
            api_url,
            api_key,
            from,
        }
    }

    /// Build a sender when the API key and sender address are configured.
    pub fn from_config(client: Client, config: &AppConfig) -> Option<Self> {
        match (&config.resend_api_key, &config.email_from) {
            (Some(key), Some(from)) => Some(Self::new(
                client,
                config.resend_api_url.clone(),
                key.clone(),
                from.clone(),
            )),
            _ => None,
        }
    }
}

#[async_trait]
impl MessageSender for EmailSender {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), DispatchError> {
        let recipient = recipient.trim();
        if !recipient.contains('@') {
            return Err(DispatchError::MissingContact("Guest email invalid"));
        }

        let request = SendEmailRequest {
            from: &self.from,
            to: vec![recipient],
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        };

        let res = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = error_body(res).await;
            tracing::warn!(status = status.as_u16(), body = %body, "Email send failed");
            return Err(DispatchError::Provider {
                provider: "Email provider",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SendEmailResponse = res.json().await.unwrap_or(SendEmailResponse {
            id: None,
            error: None,
        });
        if let Some(error) = parsed.error.filter(|e| !e.is_null()) {
            return Err(DispatchError::Provider {
                provider: "Email provider",
                status: status.as_u16(),
                body: error.to_string(),
            });
        }

        tracing::debug!(email_id = ?parsed.id, "Email accepted");
        Ok(())
    }
}
