//! Service-request lifecycle — the ticket state machine.
//!
//! ```text
//! Requested --accept--> Accepted --start--> InProgress --resolve--> Done
//!     |                                         |
//!     +----------------cancel-------------------+--> Cancelled
//! ```
//!
//! Tickets are stored with the raw status vocabulary (`new`, `in_progress`,
//! `paused`, ...). `RawTicketStatus` ↔ `TicketStatus` below is the single
//! mapping between the two; nothing else should translate statuses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Ticket status as shown to staff and guests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    Requested,
    Accepted,
    InProgress,
    Done,
    Cancelled,
}

/// Ticket status as stored in the `tickets` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RawTicketStatus {
    New,
    Accepted,
    InProgress,
    Paused,
    Blocked,
    Resolved,
    Closed,
    Cancelled,
}

/// Staff action moving a ticket along one edge of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketAction {
    Accept,
    Start,
    Resolve,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {action} a ticket that is {from}")]
    Illegal {
        from: TicketStatus,
        action: TicketAction,
    },

    #[error("cannot move a ticket from {from} to {to} in one step")]
    NotAdjacent { from: TicketStatus, to: TicketStatus },

    #[error("unknown ticket status '{0}'")]
    UnknownStatus(String),

    #[error("unknown ticket action '{0}'")]
    UnknownAction(String),
}

impl TicketStatus {
    /// Resulting status of `action`, or an error if the edge does not exist.
    pub fn apply(self, action: TicketAction) -> Result<TicketStatus, TransitionError> {
        use TicketAction::*;
        use TicketStatus::*;

        match (self, action) {
            (Requested, Accept) => Ok(Accepted),
            (Accepted, Start) => Ok(InProgress),
            (InProgress, Resolve) => Ok(Done),
            (Requested, Cancel) | (InProgress, Cancel) => Ok(Cancelled),
            (from, action) => Err(TransitionError::Illegal { from, action }),
        }
    }

    /// The single forward action from this status.
    pub fn next_action(self) -> Option<TicketAction> {
        match self {
            TicketStatus::Requested => Some(TicketAction::Accept),
            TicketStatus::Accepted => Some(TicketAction::Start),
            TicketStatus::InProgress => Some(TicketAction::Resolve),
            TicketStatus::Done | TicketStatus::Cancelled => None,
        }
    }

    /// Every action a client may offer for this status: the forward step plus
    /// `Cancel` where it is legal. Never a skip or a regression.
    pub fn available_actions(self) -> Vec<TicketAction> {
        let mut actions: Vec<TicketAction> = self.next_action().into_iter().collect();
        if self.apply(TicketAction::Cancel).is_ok() {
            actions.push(TicketAction::Cancel);
        }
        actions
    }

    /// Map a "set the status to X" request onto the named action reaching X.
    pub fn action_to(self, target: TicketStatus) -> Result<TicketAction, TransitionError> {
        [
            TicketAction::Accept,
            TicketAction::Start,
            TicketAction::Resolve,
            TicketAction::Cancel,
        ]
        .into_iter()
        .find(|action| self.apply(*action) == Ok(target))
        .ok_or(TransitionError::NotAdjacent {
            from: self,
            to: target,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Done | TicketStatus::Cancelled)
    }

    /// Canonical stored form used for writes.
    pub fn to_raw(self) -> RawTicketStatus {
        match self {
            TicketStatus::Requested => RawTicketStatus::New,
            TicketStatus::Accepted => RawTicketStatus::Accepted,
            TicketStatus::InProgress => RawTicketStatus::InProgress,
            TicketStatus::Done => RawTicketStatus::Resolved,
            TicketStatus::Cancelled => RawTicketStatus::Cancelled,
        }
    }

    /// All stored forms that read back as this status.
    pub fn raw_variants(self) -> &'static [RawTicketStatus] {
        match self {
            TicketStatus::Requested => &[RawTicketStatus::New],
            TicketStatus::Accepted => &[RawTicketStatus::Accepted],
            TicketStatus::InProgress => &[
                RawTicketStatus::InProgress,
                RawTicketStatus::Paused,
                RawTicketStatus::Blocked,
            ],
            TicketStatus::Done => &[RawTicketStatus::Resolved, RawTicketStatus::Closed],
            TicketStatus::Cancelled => &[RawTicketStatus::Cancelled],
        }
    }
}

impl From<RawTicketStatus> for TicketStatus {
    fn from(raw: RawTicketStatus) -> Self {
        match raw {
            RawTicketStatus::New => TicketStatus::Requested,
            RawTicketStatus::Accepted => TicketStatus::Accepted,
            RawTicketStatus::InProgress | RawTicketStatus::Paused | RawTicketStatus::Blocked => {
                TicketStatus::InProgress
            }
            RawTicketStatus::Resolved | RawTicketStatus::Closed => TicketStatus::Done,
            RawTicketStatus::Cancelled => TicketStatus::Cancelled,
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketStatus::Requested => write!(f, "Requested"),
            TicketStatus::Accepted => write!(f, "Accepted"),
            TicketStatus::InProgress => write!(f, "InProgress"),
            TicketStatus::Done => write!(f, "Done"),
            TicketStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Accepts both vocabularies, case-insensitively.
impl std::str::FromStr for TicketStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        let status = match normalized.as_str() {
            "requested" | "new" => TicketStatus::Requested,
            "accepted" => TicketStatus::Accepted,
            "inprogress" | "in_progress" | "paused" | "blocked" => TicketStatus::InProgress,
            "done" | "resolved" | "closed" => TicketStatus::Done,
            "cancelled" | "canceled" => TicketStatus::Cancelled,
            _ => return Err(TransitionError::UnknownStatus(s.to_string())),
        };
        Ok(status)
    }
}

impl std::fmt::Display for RawTicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawTicketStatus::New => write!(f, "new"),
            RawTicketStatus::Accepted => write!(f, "accepted"),
            RawTicketStatus::InProgress => write!(f, "in_progress"),
            RawTicketStatus::Paused => write!(f, "paused"),
            RawTicketStatus::Blocked => write!(f, "blocked"),
            RawTicketStatus::Resolved => write!(f, "resolved"),
            RawTicketStatus::Closed => write!(f, "closed"),
            RawTicketStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::fmt::Display for TicketAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketAction::Accept => write!(f, "accept"),
            TicketAction::Start => write!(f, "start"),
            TicketAction::Resolve => write!(f, "resolve"),
            TicketAction::Cancel => write!(f, "cancel"),
        }
    }
}

impl std::str::FromStr for TicketAction {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(TicketAction::Accept),
            "start" => Ok(TicketAction::Start),
            "resolve" => Ok(TicketAction::Resolve),
            "cancel" => Ok(TicketAction::Cancel),
            _ => Err(TransitionError::UnknownAction(s.to_string())),
        }
    }
}

/// A guest service request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTicket {
    pub id: Uuid,
    pub hotel_id: Option<Uuid>,
    pub service_key: String,
    pub room: String,
    pub booking_code: String,
    pub note: Option<String>,
    pub status: TicketStatus,
    pub sla_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub done_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Row shape of the `tickets` table, before status normalization.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TicketRow {
    pub id: Uuid,
    pub hotel_id: Option<Uuid>,
    pub booking_code: String,
    pub room: String,
    pub service_key: String,
    pub note: Option<String>,
    pub status: RawTicketStatus,
    pub sla_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub done_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<TicketRow> for ServiceTicket {
    fn from(row: TicketRow) -> Self {
        Self {
            id: row.id,
            hotel_id: row.hotel_id,
            service_key: row.service_key,
            room: row.room,
            booking_code: row.booking_code,
            note: row.note,
            status: row.status.into(),
            sla_minutes: row.sla_minutes,
            created_at: row.created_at,
            accepted_at: row.accepted_at,
            started_at: row.started_at,
            done_at: row.done_at,
            cancelled_at: row.cancelled_at,
            updated_at: row.updated_at,
        }
    }
}

impl ServiceTicket {
    pub fn sla_deadline(&self) -> DateTime<Utc> {
        self.created_at + Duration::minutes(i64::from(self.sla_minutes))
    }

    /// Most recent lifecycle timestamp.
    pub fn last_event_at(&self) -> DateTime<Utc> {
        [self.accepted_at, self.started_at, self.done_at, self.cancelled_at]
            .into_iter()
            .flatten()
            .fold(self.created_at, |latest, t| latest.max(t))
    }

    /// Apply `action` at time `at`, returning the updated ticket.
    ///
    /// Only the timestamp owned by the edge is written. It is clamped to the
    /// latest existing lifecycle timestamp so the sequence never runs backwards.
    pub fn transition(
        &self,
        action: TicketAction,
        at: DateTime<Utc>,
    ) -> Result<ServiceTicket, TransitionError> {
        let status = self.status.apply(action)?;
        let at = at.max(self.last_event_at());

        let mut next = self.clone();
        next.status = status;
        next.updated_at = at;
        match action {
            TicketAction::Accept => next.accepted_at = Some(at),
            TicketAction::Start => next.started_at = Some(at),
            TicketAction::Resolve => next.done_at = Some(at),
            TicketAction::Cancel => next.cancelled_at = Some(at),
        }
        Ok(next)
    }
}

/// Default resolution target for a service category, in minutes.
pub fn default_sla_minutes(service_key: &str) -> i32 {
    match service_key.trim().to_ascii_lowercase().as_str() {
        "towels" | "amenities" | "toiletries" => 20,
        "housekeeping" | "cleaning" | "turndown" => 30,
        "room_service" | "kitchen" | "food" => 45,
        "maintenance" | "repair" => 60,
        "front_desk" | "wake_up_call" | "taxi" => 15,
        _ => 30,
    }
}
