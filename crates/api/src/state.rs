//! Shared application state for the Axum API server.

use std::sync::Arc;

use hotelops_common::config::AppConfig;
use hotelops_engine::feed::TicketFeed;
use hotelops_notifier::dispatcher::Dispatcher;
use sqlx::PgPool;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: AppConfig,
    /// Ticket change feed; SSE clients subscribe here.
    pub feed: TicketFeed,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, feed: TicketFeed, dispatcher: Dispatcher) -> Self {
        Self {
            pool,
            config,
            feed,
            dispatcher: Arc::new(dispatcher),
        }
    }
}
