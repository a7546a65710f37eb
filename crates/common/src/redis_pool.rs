use redis::Client;
use redis::aio::ConnectionManager;

/// Redis handles used by the ticket change feed.
///
/// `publisher` is a reconnecting connection for `PUBLISH`; `client` opens the
/// dedicated pub/sub connection the feed listener subscribes on.
#[derive(Clone)]
pub struct RedisHandles {
    pub client: Client,
    pub publisher: ConnectionManager,
}

/// Connect to Redis for publishing and keep the client for subscriptions.
pub async fn connect(redis_url: &str) -> anyhow::Result<RedisHandles> {
    let client = Client::open(redis_url)?;
    let publisher = ConnectionManager::new(client.clone()).await?;

    tracing::info!("Connected to Redis");
    Ok(RedisHandles { client, publisher })
}
