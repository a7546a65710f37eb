//! Guest service-request routes. The booking code is the guest's credential.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use hotelops_common::error::AppError;
use hotelops_engine::feed::TicketEvent;
use hotelops_engine::tickets::{CreateTicketParams, TicketService};

use crate::routes::tickets::TicketView;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/requests", post(create_request))
        .route("/api/requests/{id}", get(get_request))
}

#[derive(Debug, Deserialize)]
struct GuestQuery {
    booking_code: String,
}

/// POST /api/requests — a guest opens a service request.
async fn create_request(
    State(state): State<AppState>,
    params: Result<Json<CreateTicketParams>, JsonRejection>,
) -> Result<(StatusCode, Json<TicketView>), AppError> {
    let Json(params) = params?;
    let ticket = TicketService::create(&state.pool, &params).await?;
    state.feed.publish(TicketEvent::created(ticket.clone())).await;
    Ok((StatusCode::CREATED, Json(TicketView::at(ticket, Utc::now()))))
}

/// GET /api/requests/:id?booking_code=... — status and SLA countdown.
async fn get_request(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<GuestQuery>, QueryRejection>,
) -> Result<Json<TicketView>, AppError> {
    let (Path(id), Query(query)) = (id?, query?);
    if query.booking_code.trim().is_empty() {
        return Err(AppError::Validation("booking_code is required".to_string()));
    }
    let ticket = TicketService::find_for_guest(&state.pool, id, &query.booking_code).await?;
    Ok(Json(TicketView::at(ticket, Utc::now())))
}
