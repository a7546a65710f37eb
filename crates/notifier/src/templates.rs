//! Message templates.
//!
//! Each template code produces a subject, a plain-text body (WhatsApp) and an
//! HTML body (email) from the job payload and the booking's contact details.

use serde::Serialize;

use hotelops_common::types::{Channel, ContactDetails};

use crate::error::DispatchError;

/// Template codes whose link is a one-time login link minted at send time.
pub const MAGIC_LINK_TEMPLATES: &[&str] = &["magic_login"];

pub fn needs_magic_link(template_code: &str) -> bool {
    MAGIC_LINK_TEMPLATES.contains(&template_code)
}

/// Rendered message, ready for any channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Inputs shared by every template.
pub struct RenderContext<'a> {
    pub contact: &'a ContactDetails,
    pub payload: &'a serde_json::Value,
    /// Base URL of the guest app, for links built from a token.
    pub app_url: &'a str,
}

impl RenderContext<'_> {
    fn field(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Name used in the greeting. `payload.guest_name` is used as given; the
    /// booking's stored name is shortened to its first word.
    fn salutation(&self) -> &str {
        self.field("guest_name").unwrap_or_else(|| {
            self.contact
                .guest_name
                .split_whitespace()
                .next()
                .unwrap_or("Guest")
        })
    }

    /// `payload.link`, or a link under the guest app built from `payload.token`.
    fn link_or_token(&self, token_path: &str) -> Option<String> {
        self.field("link").map(str::to_string).or_else(|| {
            self.field("token").map(|token| {
                format!(
                    "{}/{}/{}",
                    self.app_url.trim_end_matches('/'),
                    token_path,
                    token
                )
            })
        })
    }
}

struct Draft {
    subject: String,
    lines: Vec<String>,
    link: Option<(String, String)>,
}

/// Render `template_code` for `channel`.
pub fn render(
    template_code: &str,
    channel: Channel,
    ctx: &RenderContext<'_>,
) -> Result<RenderedMessage, DispatchError> {
    let hotel = ctx.contact.hotel_name.as_str();
    let code = ctx.contact.booking_code.as_str();
    let greeting = format!("Hi {},", ctx.salutation());

    let draft = match template_code {
        "precheckin_link" => {
            let link = ctx.link_or_token("precheckin").ok_or_else(|| {
                DispatchError::Template("precheckin_link requires a link or token".to_string())
            })?;
            Draft {
                subject: format!("Complete your pre-check-in at {}", hotel),
                lines: vec![
                    greeting,
                    format!(
                        "Save time at arrival: complete your online pre-check-in for booking {}.",
                        code
                    ),
                ],
                link: Some(("Start pre-check-in".to_string(), link)),
            }
        }
        "booking_confirmation" => {
            let mut lines = vec![
                greeting,
                format!("Your booking {} at {} is confirmed.", code, hotel),
            ];
            if let (Some(check_in), Some(check_out)) = (ctx.field("check_in"), ctx.field("check_out"))
            {
                lines.push(format!("Stay: {} to {}.", check_in, check_out));
            }
            Draft {
                subject: format!("Booking {} confirmed", code),
                lines,
                link: ctx
                    .link_or_token("booking")
                    .map(|link| ("View your booking".to_string(), link)),
            }
        }
        "magic_login" => {
            let link = ctx.field("link").ok_or_else(|| {
                DispatchError::Template("magic_login requires a sign-in link".to_string())
            })?;
            Draft {
                subject: format!("Your sign-in link for {}", hotel),
                lines: vec![
                    greeting,
                    "Use the link below to open your guest portal. It can be used once."
                        .to_string(),
                ],
                link: Some(("Sign in".to_string(), link.to_string())),
            }
        }
        "request_update" => {
            let service = ctx.field("service").unwrap_or("service");
            let status = ctx.field("status").ok_or_else(|| {
                DispatchError::Template("request_update requires a status".to_string())
            })?;
            Draft {
                subject: format!("Update on your {} request", service),
                lines: vec![
                    greeting,
                    format!("Your {} request is now {}.", service, status),
                ],
                link: ctx
                    .field("link")
                    .map(|link| ("Track your request".to_string(), link.to_string())),
            }
        }
        "checkout_thanks" => Draft {
            subject: format!("Thank you for staying at {}", hotel),
            lines: vec![
                greeting,
                format!(
                    "Thank you for staying with us at {}. We hope to welcome you again soon.",
                    hotel
                ),
            ],
            link: ctx
                .field("review_link")
                .map(|link| ("Leave a review".to_string(), link.to_string())),
        },
        other => {
            let message = ctx.field("message").ok_or_else(|| {
                DispatchError::Template(format!("Unknown template code '{}'", other))
            })?;
            Draft {
                subject: ctx
                    .field("subject")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Message from {}", hotel)),
                lines: vec![greeting, message.to_string()],
                link: ctx
                    .field("link")
                    .map(|link| ("Open".to_string(), link.to_string())),
            }
        }
    };

    Ok(finish(draft, channel, hotel))
}

fn finish(draft: Draft, channel: Channel, hotel: &str) -> RenderedMessage {
    let mut text = draft.lines.join("\n\n");
    if let Some((label, url)) = &draft.link {
        text.push_str(&format!("\n\n{}: {}", label, url));
    }
    if channel == Channel::Whatsapp {
        text = format!("*{}*\n\n{}", hotel, text);
    }

    let mut html = String::new();
    for line in &draft.lines {
        html.push_str(&format!("<p>{}</p>", escape_html(line)));
    }
    if let Some((label, url)) = &draft.link {
        html.push_str(&format!(
            "<p><a href=\"{}\">{}</a></p>",
            escape_html(url),
            escape_html(label)
        ));
    }
    html.push_str(&format!("<p>{}</p>", escape_html(hotel)));

    RenderedMessage {
        subject: draft.subject,
        text,
        html,
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
