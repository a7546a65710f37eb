//! WhatsApp Business Cloud API sender.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use hotelops_common::config::AppConfig;

use super::{MessageSender, error_body};
use crate::error::DispatchError;
use crate::templates::RenderedMessage;

pub struct WhatsAppSender {
    client: Client,
    api_base: String,
    phone_number_id: String,
    token: String,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    messaging_product: &'static str,
    to: String,
    #[serde(rename = "type")]
    kind: &'static str,
    text: TextBody<'a>,
}

impl WhatsAppSender {
    pub fn new(client: Client, api_base: String, phone_number_id: String, token: String) -> Self {
        Self {
            client,
            api_base,
            phone_number_id,
            token,
        }
    }

    /// Build a sender when both the token and sender number are configured.
    pub fn from_config(client: Client, config: &AppConfig) -> Option<Self> {
        match (&config.whatsapp_token, &config.whatsapp_phone_number_id) {
            (Some(token), Some(phone_number_id)) => Some(Self::new(
                client,
                config.whatsapp_api_base.clone(),
                phone_number_id.clone(),
                token.clone(),
            )),
            _ => None,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/messages",
            self.api_base.trim_end_matches('/'),
            self.phone_number_id
        )
    }
}

/// Reduce a phone number to the digits the API expects (`+55 (11) 9…` → `55119…`).
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 7 { None } else { Some(digits) }
}

#[async_trait]
impl MessageSender for WhatsAppSender {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), DispatchError> {
        let to = normalize_phone(recipient)
            .ok_or(DispatchError::MissingContact("Guest phone invalid"))?;

        let request = SendMessageRequest {
            messaging_product: "whatsapp",
            to,
            kind: "text",
            text: TextBody {
                body: &message.text,
            },
        };

        let res = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = error_body(res).await;
            tracing::warn!(status, body = %body, "WhatsApp send failed");
            return Err(DispatchError::Provider {
                provider: "WhatsApp",
                status,
                body,
            });
        }

        tracing::debug!("WhatsApp message accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(
            normalize_phone("+55 (11) 99999-0000"),
            Some("5511999990000".to_string())
        );
        assert_eq!(normalize_phone("12-34"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn test_request_shape() {
        let request = SendMessageRequest {
            messaging_product: "whatsapp",
            to: "5511999990000".to_string(),
            kind: "text",
            text: TextBody { body: "hello" },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "messaging_product": "whatsapp",
                "to": "5511999990000",
                "type": "text",
                "text": { "body": "hello" }
            })
        );
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        let sender = WhatsAppSender::new(
            Client::new(),
            "https://graph.facebook.com/v19.0/".to_string(),
            "12345".to_string(),
            "token".to_string(),
        );
        assert_eq!(
            sender.endpoint(),
            "https://graph.facebook.com/v19.0/12345/messages"
        );
    }
}
