//! HotelOps API server binary entrypoint.

use std::net::SocketAddr;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use hotelops_common::config::AppConfig;
use hotelops_common::db::{create_pool, run_migrations};
use hotelops_common::redis_pool;
use hotelops_engine::feed::{TicketFeed, run_redis_listener};
use hotelops_notifier::dispatcher::Dispatcher;

use hotelops_api::routes::create_router;
use hotelops_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "hotelops_api=debug,hotelops_engine=debug,hotelops_notifier=info,tower_http=debug",
            )
        }))
        .init();

    tracing::info!("Starting HotelOps API server...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config).await?;
    run_migrations(&pool).await?;

    let feed = match &config.redis_url {
        Some(url) => {
            let redis = redis_pool::connect(url).await?;
            let feed = TicketFeed::with_redis(redis.publisher.clone());
            spawn_feed_listener(redis.client, feed.clone());
            feed
        }
        None => {
            tracing::info!("REDIS_URL not set, ticket feed is in-process only");
            TicketFeed::local()
        }
    };

    let dispatcher = Dispatcher::from_config(pool.clone(), &config)?;
    let port = config.api_port;
    let state = AppState::new(pool, config, feed, dispatcher);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    Ok(())
}

/// Keep one Redis subscription alive for the lifetime of the process.
fn spawn_feed_listener(client: redis::Client, feed: TicketFeed) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = run_redis_listener(client.clone(), feed.clone()).await {
                tracing::warn!(error = %e, "Ticket feed listener stopped, reconnecting");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });
}
