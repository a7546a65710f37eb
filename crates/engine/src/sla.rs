//! SLA countdown for service tickets.
//!
//! Everything here is a pure function of the ticket and `now`; clients re-ask
//! once per second while a ticket is open and get the same answer for the same
//! instant.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::lifecycle::{ServiceTicket, TicketStatus};

/// SLA state of a ticket at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlaView {
    /// Ticket still open; `remaining_secs` is clamped at zero once overdue.
    Running {
        deadline: DateTime<Utc>,
        remaining_secs: i64,
        overdue: bool,
    },
    /// Done on or before the deadline.
    Met {
        deadline: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        margin_secs: i64,
    },
    /// Done after the deadline.
    Breached {
        deadline: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        overdue_secs: i64,
    },
    Cancelled,
}

/// Compute the SLA view of `ticket` at `now`.
pub fn sla_view(ticket: &ServiceTicket, now: DateTime<Utc>) -> SlaView {
    let deadline = ticket.sla_deadline();

    match ticket.status {
        TicketStatus::Cancelled => SlaView::Cancelled,
        TicketStatus::Done => {
            // A Done ticket read from legacy rows may lack done_at; judge it by
            // its last recorded update.
            let completed_at = ticket.done_at.unwrap_or(ticket.updated_at);
            let delta = (deadline - completed_at).num_seconds();
            if delta >= 0 {
                SlaView::Met {
                    deadline,
                    completed_at,
                    margin_secs: delta,
                }
            } else {
                SlaView::Breached {
                    deadline,
                    completed_at,
                    overdue_secs: -delta,
                }
            }
        }
        _ => {
            let left = (deadline - now).num_seconds();
            SlaView::Running {
                deadline,
                remaining_secs: left.max(0),
                overdue: left < 0,
            }
        }
    }
}

/// Render seconds as `MM:SS`, or `H:MM:SS` from one hour up.
pub fn format_countdown(secs: i64) -> String {
    let secs = secs.max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
