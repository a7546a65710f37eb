pub mod dispatch;
pub mod health;
pub mod requests;
pub mod tickets;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(dispatch::router())
        .merge(tickets::router())
        .merge(requests::router())
        .with_state(state)
}
