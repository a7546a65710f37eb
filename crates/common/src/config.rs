use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the ticket change feed.
    /// When unset, ticket events are only delivered within the current process.
    pub redis_url: Option<String>,

    /// JWT secret for staff authentication
    pub jwt_secret: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the API server listens on
    pub api_port: u16,

    /// WhatsApp Business API bearer token
    pub whatsapp_token: Option<String>,

    /// WhatsApp Business sender phone number ID
    pub whatsapp_phone_number_id: Option<String>,

    /// WhatsApp Graph API base URL
    pub whatsapp_api_base: String,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Resend send endpoint
    pub resend_api_url: String,

    /// Email sender address
    pub email_from: Option<String>,

    /// Identity provider base URL (magic-link generation)
    pub supabase_url: Option<String>,

    /// Identity provider service-role key
    pub supabase_service_role_key: Option<String>,

    /// Public guest app URL used to build links in messages
    pub public_app_url: String,

    /// Maximum jobs claimed per batch
    pub dispatch_batch_size: i64,

    /// Time budget of a single dispatch cycle in milliseconds
    pub dispatch_max_runtime_ms: u64,

    /// Pause between batches in milliseconds (provider rate limits)
    pub dispatch_inter_batch_delay_ms: u64,

    /// How often the standalone worker starts a cycle, in milliseconds
    pub dispatch_poll_interval_ms: u64,

    /// Delay before a failed notification becomes claimable again
    pub notify_retry_backoff_secs: i32,

    /// Optional cap on retries after the first attempt; unset means failed
    /// jobs are retried indefinitely
    pub notify_max_retries: Option<i32>,

    /// Seconds a job may stay `processing` before it is claimed again
    pub notify_stale_processing_secs: i32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: optional("REDIS_URL"),
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 20)?,
            api_port: parse_or("API_PORT", 3000)?,
            whatsapp_token: optional("WHATSAPP_TOKEN"),
            whatsapp_phone_number_id: optional("WHATSAPP_PHONE_NUMBER_ID"),
            whatsapp_api_base: std::env::var("WHATSAPP_API_BASE")
                .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".to_string()),
            resend_api_key: optional("RESEND_API_KEY"),
            resend_api_url: std::env::var("RESEND_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com/emails".to_string()),
            email_from: optional("EMAIL_FROM"),
            supabase_url: optional("SUPABASE_URL"),
            supabase_service_role_key: optional("SUPABASE_SERVICE_ROLE_KEY"),
            public_app_url: std::env::var("PUBLIC_APP_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            dispatch_batch_size: parse_or("DISPATCH_BATCH_SIZE", 10)?,
            dispatch_max_runtime_ms: parse_or("DISPATCH_MAX_RUNTIME_MS", 50_000)?,
            dispatch_inter_batch_delay_ms: parse_or("DISPATCH_INTER_BATCH_DELAY_MS", 1_000)?,
            dispatch_poll_interval_ms: parse_or("DISPATCH_POLL_INTERVAL_MS", 60_000)?,
            notify_retry_backoff_secs: parse_or("NOTIFY_RETRY_BACKOFF_SECS", 300)?,
            notify_max_retries: match optional("NOTIFY_MAX_RETRIES") {
                Some(raw) => Some(raw.parse().map_err(|_| {
                    anyhow::anyhow!("NOTIFY_MAX_RETRIES must be a valid i32")
                })?),
                None => None,
            },
            notify_stale_processing_secs: parse_or("NOTIFY_STALE_PROCESSING_SECS", 900)?,
        })
    }
}

/// Read a variable, treating empty values as unset.
fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
{
    match optional(key) {
        Some(raw) => raw.parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                key,
                std::any::type_name::<T>()
            )
        }),
        None => Ok(default),
    }
}
