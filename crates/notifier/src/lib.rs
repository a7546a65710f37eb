//! Notification dispatch: claim queued guest notifications, render them per
//! channel, deliver through WhatsApp or email, and record the outcome.

pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod queue;
pub mod senders;
pub mod templates;
