//! Notification dispatch trigger.
//!
//! Invoked by a scheduler. Always answers 200 with the cycle summary; a
//! failed claim shows up as `success: false` in the body.

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};

use hotelops_notifier::dispatcher::CycleOptions;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/functions/dispatch-notifications", any(dispatch_notifications))
}

async fn dispatch_notifications(State(state): State<AppState>, method: Method) -> Response {
    if method == Method::OPTIONS {
        return (StatusCode::OK, "ok").into_response();
    }

    let opts = CycleOptions::from_config(&state.config);
    let summary = state.dispatcher.run_cycle(opts).await;
    Json(summary).into_response()
}
