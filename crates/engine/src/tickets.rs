//! Ticket service — persistence and server-side transition enforcement for
//! guest service requests.

use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use hotelops_common::error::AppError;

use crate::lifecycle::{
    RawTicketStatus, ServiceTicket, TicketAction, TicketRow, TicketStatus, default_sla_minutes,
};

/// Service layer for ticket reads and transitions.
pub struct TicketService;

/// Parameters for opening a new service request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicketParams {
    pub booking_code: String,
    pub room: String,
    pub service_key: String,
    pub note: Option<String>,
    /// When given, must match the booking's hotel.
    #[serde(default)]
    pub hotel_id: Option<Uuid>,
    /// Overrides the per-category default target.
    pub sla_minutes: Option<i32>,
}

impl CreateTicketParams {
    fn validate(&self) -> Result<(), AppError> {
        if self.booking_code.trim().is_empty() {
            return Err(AppError::Validation("booking_code is required".to_string()));
        }
        if self.room.trim().is_empty() {
            return Err(AppError::Validation("room is required".to_string()));
        }
        if self.service_key.trim().is_empty() {
            return Err(AppError::Validation("service_key is required".to_string()));
        }
        if let Some(minutes) = self.sla_minutes
            && minutes <= 0
        {
            return Err(AppError::Validation(
                "sla_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl TicketService {
    /// Open a ticket for a guest. The booking code must belong to a known booking.
    pub async fn create(
        pool: &PgPool,
        params: &CreateTicketParams,
    ) -> Result<ServiceTicket, AppError> {
        params.validate()?;

        let booking_code = params.booking_code.trim();
        let hotel_id: Option<(Uuid,)> =
            sqlx::query_as("SELECT hotel_id FROM bookings WHERE booking_code = $1")
                .bind(booking_code)
                .fetch_optional(pool)
                .await?;
        let (hotel_id,) = hotel_id.ok_or_else(|| {
            AppError::NotFound(format!("Booking {} not found", booking_code))
        })?;
        if let Some(claimed) = params.hotel_id
            && claimed != hotel_id
        {
            return Err(AppError::Validation(format!(
                "Booking {} does not belong to hotel {}",
                booking_code, claimed
            )));
        }

        let service_key = params.service_key.trim().to_ascii_lowercase();
        let sla_minutes = params
            .sla_minutes
            .unwrap_or_else(|| default_sla_minutes(&service_key));

        let row: TicketRow = sqlx::query_as(
            r#"
            INSERT INTO tickets (id, hotel_id, booking_code, room, service_key, note, status, sla_minutes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(hotel_id)
        .bind(booking_code)
        .bind(params.room.trim())
        .bind(&service_key)
        .bind(params.note.as_deref())
        .bind(RawTicketStatus::New)
        .bind(sla_minutes)
        .fetch_one(pool)
        .await?;

        tracing::info!(
            ticket_id = %row.id,
            service_key = %row.service_key,
            room = %row.room,
            sla_minutes,
            "Service request opened"
        );

        Ok(row.into())
    }

    /// Get a single ticket by ID.
    pub async fn get(pool: &PgPool, ticket_id: Uuid) -> Result<ServiceTicket, AppError> {
        let row: TicketRow = sqlx::query_as("SELECT * FROM tickets WHERE id = $1")
            .bind(ticket_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id)))?;

        Ok(row.into())
    }

    /// Get a ticket on behalf of a guest; the booking code acts as the credential.
    pub async fn find_for_guest(
        pool: &PgPool,
        ticket_id: Uuid,
        booking_code: &str,
    ) -> Result<ServiceTicket, AppError> {
        let row: TicketRow =
            sqlx::query_as("SELECT * FROM tickets WHERE id = $1 AND booking_code = $2")
                .bind(ticket_id)
                .bind(booking_code.trim())
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id)))?;

        Ok(row.into())
    }

    /// Open tickets (not Done or Cancelled), oldest first.
    pub async fn list_open(
        pool: &PgPool,
        hotel_id: Option<Uuid>,
    ) -> Result<Vec<ServiceTicket>, AppError> {
        let rows: Vec<TicketRow> = sqlx::query_as(
            r#"
            SELECT *
            FROM tickets
            WHERE status NOT IN ('resolved', 'closed', 'cancelled')
              AND ($1::uuid IS NULL OR hotel_id = $1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(hotel_id)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(ServiceTicket::from).collect())
    }

    /// Apply a staff action.
    ///
    /// The edge is validated against the state machine, and the write only
    /// lands if the stored status is still one the edge starts from. A
    /// concurrent change between read and write yields `Conflict`.
    pub async fn transition(
        pool: &PgPool,
        ticket_id: Uuid,
        action: TicketAction,
    ) -> Result<ServiceTicket, AppError> {
        let current = Self::get(pool, ticket_id).await?;
        let next = current
            .transition(action, Utc::now())
            .map_err(|e| AppError::Conflict(e.to_string()))?;

        let expected: Vec<String> = current
            .status
            .raw_variants()
            .iter()
            .map(|raw| raw.to_string())
            .collect();

        let row: Option<TicketRow> = sqlx::query_as(
            r#"
            UPDATE tickets
            SET status = $1,
                accepted_at = $2,
                started_at = $3,
                done_at = $4,
                cancelled_at = $5,
                updated_at = $6
            WHERE id = $7 AND status = ANY($8)
            RETURNING *
            "#,
        )
        .bind(next.status.to_raw())
        .bind(next.accepted_at)
        .bind(next.started_at)
        .bind(next.done_at)
        .bind(next.cancelled_at)
        .bind(next.updated_at)
        .bind(ticket_id)
        .bind(&expected)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            tracing::warn!(
                ticket_id = %ticket_id,
                action = %action,
                "Ticket changed concurrently, transition rejected"
            );
            return Err(AppError::Conflict(format!(
                "Ticket {} was modified concurrently; reload and retry",
                ticket_id
            )));
        };

        tracing::info!(
            ticket_id = %ticket_id,
            action = %action,
            from = %current.status,
            to = %next.status,
            "Ticket transitioned"
        );

        Ok(row.into())
    }

    /// Legacy shape: the client patches the status field directly. The target
    /// must be exactly one step away. Returns the action it resolved to.
    pub async fn set_status(
        pool: &PgPool,
        ticket_id: Uuid,
        target: TicketStatus,
    ) -> Result<(TicketAction, ServiceTicket), AppError> {
        let current = Self::get(pool, ticket_id).await?;
        let action = current
            .status
            .action_to(target)
            .map_err(|e| AppError::Conflict(e.to_string()))?;
        let ticket = Self::transition(pool, ticket_id, action).await?;
        Ok((action, ticket))
    }
}
