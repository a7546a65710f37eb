//! Channel senders.

pub mod email;
pub mod whatsapp;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::templates::RenderedMessage;

pub use email::EmailSender;
pub use whatsapp::WhatsAppSender;

/// Delivers a rendered message to one recipient over one provider.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), DispatchError>;
}

/// Read a provider's error body for logging, bounded in size.
pub(crate) async fn error_body(res: reqwest::Response) -> String {
    let mut body = res.text().await.unwrap_or_default();
    if body.len() > 500 {
        let mut cut = 500;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
