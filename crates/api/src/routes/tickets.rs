//! Staff ticket routes: open-ticket board, transitions and the live change stream.

use std::convert::Infallible;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use hotelops_common::error::AppError;
use hotelops_engine::feed::{TicketEvent, TicketEventKind};
use hotelops_engine::lifecycle::{ServiceTicket, TicketAction, TicketStatus};
use hotelops_engine::sla::{SlaView, format_countdown, sla_view};
use hotelops_engine::tickets::TicketService;

use crate::middleware::auth::StaffUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tickets", get(list_tickets))
        .route("/api/tickets/stream", get(stream_tickets))
        .route("/api/tickets/{id}", get(get_ticket).patch(patch_ticket))
        .route("/api/tickets/{id}/{action}", post(apply_action))
}

/// A ticket with its SLA state and the transitions a client may offer.
#[derive(Debug, Serialize)]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: ServiceTicket,
    pub sla: SlaView,
    /// `MM:SS` remaining while the ticket is open.
    pub countdown: Option<String>,
    pub available_actions: Vec<TicketAction>,
}

impl TicketView {
    pub fn at(ticket: ServiceTicket, now: DateTime<Utc>) -> Self {
        let sla = sla_view(&ticket, now);
        let countdown = match sla {
            SlaView::Running { remaining_secs, .. } => Some(format_countdown(remaining_secs)),
            _ => None,
        };
        Self {
            available_actions: ticket.status.available_actions(),
            ticket,
            sla,
            countdown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HotelFilter {
    hotel_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct PatchTicket {
    status: String,
}

/// GET /api/tickets — open tickets, oldest first.
async fn list_tickets(
    State(state): State<AppState>,
    _staff: StaffUser,
    filter: Result<Query<HotelFilter>, QueryRejection>,
) -> Result<Json<Vec<TicketView>>, AppError> {
    let Query(filter) = filter?;
    let now = Utc::now();
    let tickets = TicketService::list_open(&state.pool, filter.hotel_id).await?;
    Ok(Json(
        tickets
            .into_iter()
            .map(|t| TicketView::at(t, now))
            .collect(),
    ))
}

/// GET /api/tickets/:id
async fn get_ticket(
    State(state): State<AppState>,
    _staff: StaffUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<TicketView>, AppError> {
    let Path(id) = id?;
    let ticket = TicketService::get(&state.pool, id).await?;
    Ok(Json(TicketView::at(ticket, Utc::now())))
}

/// POST /api/tickets/:id/:action — accept, start, resolve or cancel.
async fn apply_action(
    State(state): State<AppState>,
    staff: StaffUser,
    path: Result<Path<(Uuid, String)>, PathRejection>,
) -> Result<Json<TicketView>, AppError> {
    let Path((id, action)) = path?;
    let action = action
        .parse::<TicketAction>()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let ticket = TicketService::transition(&state.pool, id, action).await?;
    tracing::debug!(staff_id = %staff.staff_id, ticket_id = %id, action = %action, "Staff action applied");

    state
        .feed
        .publish(TicketEvent::transitioned(action, ticket.clone()))
        .await;
    Ok(Json(TicketView::at(ticket, Utc::now())))
}

/// PATCH /api/tickets/:id — legacy `{status}` body, held to the same edges.
async fn patch_ticket(
    State(state): State<AppState>,
    _staff: StaffUser,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<PatchTicket>, JsonRejection>,
) -> Result<Json<TicketView>, AppError> {
    let (Path(id), Json(body)) = (id?, body?);
    let target = body
        .status
        .parse::<TicketStatus>()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (action, ticket) = TicketService::set_status(&state.pool, id, target).await?;
    state
        .feed
        .publish(TicketEvent::transitioned(action, ticket.clone()))
        .await;
    Ok(Json(TicketView::at(ticket, Utc::now())))
}

/// GET /api/tickets/stream — Server-Sent Events for every ticket change.
///
/// A consumer that falls behind skips the missed events and keeps going;
/// it can re-list to resync.
async fn stream_tickets(
    State(state): State<AppState>,
    _staff: StaffUser,
    filter: Result<Query<HotelFilter>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Query(filter) = filter?;
    let rx = state.feed.subscribe();
    let hotel_id = filter.hotel_id;

    let stream = futures::stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(hotel) = hotel_id
                        && event.ticket.hotel_id != Some(hotel)
                    {
                        continue;
                    }
                    match sse_event(&event) {
                        Ok(sse) => return Some((Ok(sse), rx)),
                        Err(e) => tracing::warn!(error = %e, "Failed to encode ticket event"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Ticket stream consumer lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &TicketEvent) -> Result<Event, axum::Error> {
    let name = match event.kind {
        TicketEventKind::Created => "created",
        TicketEventKind::Transitioned => "transitioned",
    };
    Event::default()
        .event(name)
        .id(event.ticket.id.to_string())
        .json_data(event)
}
