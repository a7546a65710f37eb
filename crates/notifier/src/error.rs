use thiserror::Error;

/// Failures while delivering a single notification, or claiming a batch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Booking {0} not found")]
    BookingNotFound(uuid::Uuid),

    /// A contact field the channel needs is absent. The message is shown verbatim.
    #[error("{0}")]
    MissingContact(&'static str),

    #[error("{0} not configured")]
    MissingCredential(&'static str),

    #[error("Template error: {0}")]
    Template(String),

    #[error("{provider} rejected the message (status {status}): {body}")]
    Provider {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Identity provider error: {0}")]
    Identity(String),
}
