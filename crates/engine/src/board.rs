//! Optimistic ticket board for staff clients.
//!
//! A transition is modelled as a command with three states. While `Pending`
//! the board shows the optimistic ticket; on `Confirmed` the server's copy
//! replaces it; on `Rejected` the view snaps back to the authoritative copy the
//! caller re-fetched (or the last confirmed one).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::feed::TicketEvent;
use crate::lifecycle::{ServiceTicket, TicketAction, TransitionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CommandId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Pending,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone)]
struct Command {
    ticket_id: Uuid,
    action: TicketAction,
    state: CommandState,
    optimistic: ServiceTicket,
}

/// A ticket as the board currently displays it.
#[derive(Debug, Clone, Serialize)]
pub struct BoardEntry {
    pub ticket: ServiceTicket,
    /// State of the latest command issued for this ticket, if any.
    pub command: Option<CommandState>,
    pub pending_action: Option<TicketAction>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BoardError {
    #[error("ticket {0} is not on the board")]
    UnknownTicket(Uuid),

    #[error("unknown command {0:?}")]
    UnknownCommand(CommandId),

    #[error("ticket {0} already has a transition in flight")]
    Busy(Uuid),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Default)]
pub struct TicketBoard {
    confirmed: HashMap<Uuid, ServiceTicket>,
    commands: HashMap<CommandId, Command>,
    latest: HashMap<Uuid, CommandId>,
    next_id: u64,
}

impl TicketBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the board contents with a freshly fetched list.
    pub fn load(&mut self, tickets: Vec<ServiceTicket>) {
        self.confirmed = tickets.into_iter().map(|t| (t.id, t)).collect();
        self.commands.clear();
        self.latest.clear();
    }

    /// Start a transition: validate it locally and show it immediately.
    pub fn begin(
        &mut self,
        ticket_id: Uuid,
        action: TicketAction,
        now: DateTime<Utc>,
    ) -> Result<CommandId, BoardError> {
        if self.pending_for(ticket_id).is_some() {
            return Err(BoardError::Busy(ticket_id));
        }
        let base = self
            .confirmed
            .get(&ticket_id)
            .ok_or(BoardError::UnknownTicket(ticket_id))?;
        let optimistic = base.transition(action, now)?;

        let id = CommandId(self.next_id);
        self.next_id += 1;
        self.commands.insert(
            id,
            Command {
                ticket_id,
                action,
                state: CommandState::Pending,
                optimistic,
            },
        );
        self.latest.insert(ticket_id, id);
        Ok(id)
    }

    /// The server accepted the command and returned its copy of the ticket.
    pub fn confirm(
        &mut self,
        command: CommandId,
        authoritative: ServiceTicket,
    ) -> Result<(), BoardError> {
        let cmd = self
            .commands
            .get_mut(&command)
            .ok_or(BoardError::UnknownCommand(command))?;
        cmd.state = CommandState::Confirmed;
        let ticket_id = cmd.ticket_id;
        self.settle(ticket_id, authoritative);
        Ok(())
    }

    /// The server refused the command. `authoritative` is the re-fetched
    /// ticket; `None` keeps the last confirmed copy.
    pub fn reject(
        &mut self,
        command: CommandId,
        authoritative: Option<ServiceTicket>,
    ) -> Result<(), BoardError> {
        let cmd = self
            .commands
            .get_mut(&command)
            .ok_or(BoardError::UnknownCommand(command))?;
        cmd.state = CommandState::Rejected;
        let ticket_id = cmd.ticket_id;
        if let Some(ticket) = authoritative {
            self.settle(ticket_id, ticket);
        }
        Ok(())
    }

    /// Adopt a server copy once no command is in flight. Terminal tickets
    /// leave the board along with their command history.
    fn settle(&mut self, ticket_id: Uuid, ticket: ServiceTicket) {
        if ticket.status.is_terminal() {
            self.confirmed.remove(&ticket_id);
            if let Some(cmd) = self.latest.remove(&ticket_id) {
                self.commands.remove(&cmd);
            }
        } else {
            self.confirmed.insert(ticket_id, ticket);
        }
    }

    /// Merge a change from the feed. Terminal tickets leave the board.
    pub fn apply_event(&mut self, event: &TicketEvent) {
        let ticket = &event.ticket;
        if ticket.status.is_terminal() && self.pending_for(ticket.id).is_none() {
            self.confirmed.remove(&ticket.id);
            return;
        }
        self.confirmed.insert(ticket.id, ticket.clone());
    }

    /// What the board displays, oldest ticket first.
    pub fn entries(&self) -> Vec<BoardEntry> {
        let mut entries: Vec<BoardEntry> = self
            .confirmed
            .values()
            .map(|confirmed| {
                let cmd = self
                    .latest
                    .get(&confirmed.id)
                    .and_then(|id| self.commands.get(id));
                match cmd {
                    Some(cmd) if cmd.state == CommandState::Pending => BoardEntry {
                        ticket: cmd.optimistic.clone(),
                        command: Some(CommandState::Pending),
                        pending_action: Some(cmd.action),
                    },
                    Some(cmd) => BoardEntry {
                        ticket: confirmed.clone(),
                        command: Some(cmd.state),
                        pending_action: None,
                    },
                    None => BoardEntry {
                        ticket: confirmed.clone(),
                        command: None,
                        pending_action: None,
                    },
                }
            })
            .collect();
        entries.sort_by_key(|e| e.ticket.created_at);
        entries
    }

    pub fn get(&self, ticket_id: Uuid) -> Option<BoardEntry> {
        self.entries().into_iter().find(|e| e.ticket.id == ticket_id)
    }

    fn pending_for(&self, ticket_id: Uuid) -> Option<CommandId> {
        self.latest
            .get(&ticket_id)
            .copied()
            .filter(|id| {
                self.commands
                    .get(id)
                    .is_some_and(|c| c.state == CommandState::Pending)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TicketStatus;
    use chrono::Duration;

    fn make_ticket(status: TicketStatus, age_minutes: i64) -> ServiceTicket {
        let created = Utc::now() - Duration::minutes(age_minutes);
        ServiceTicket {
            id: Uuid::new_v4(),
            hotel_id: None,
            service_key: "maintenance".to_string(),
            room: "501".to_string(),
            booking_code: "BK-9".to_string(),
            note: Some("AC is noisy".to_string()),
            status,
            sla_minutes: 60,
            created_at: created,
            accepted_at: None,
            started_at: None,
            done_at: None,
            cancelled_at: None,
            updated_at: created,
        }
    }

    #[test]
    fn test_pending_shows_optimistic_state() {
        let ticket = make_ticket(TicketStatus::Requested, 5);
        let id = ticket.id;
        let mut board = TicketBoard::new();
        board.load(vec![ticket]);

        board.begin(id, TicketAction::Accept, Utc::now()).unwrap();
        let entry = board.get(id).unwrap();
        assert_eq!(entry.ticket.status, TicketStatus::Accepted);
        assert_eq!(entry.command, Some(CommandState::Pending));
        assert_eq!(entry.pending_action, Some(TicketAction::Accept));
    }

    #[test]
    fn test_confirm_adopts_server_copy() {
        let ticket = make_ticket(TicketStatus::Requested, 5);
        let id = ticket.id;
        let mut board = TicketBoard::new();
        board.load(vec![ticket.clone()]);

        let cmd = board.begin(id, TicketAction::Accept, Utc::now()).unwrap();
        let server = ticket.transition(TicketAction::Accept, Utc::now()).unwrap();
        board.confirm(cmd, server.clone()).unwrap();

        let entry = board.get(id).unwrap();
        assert_eq!(entry.ticket, server);
        assert_eq!(entry.command, Some(CommandState::Confirmed));
    }

    #[test]
    fn test_reject_snaps_back() {
        let ticket = make_ticket(TicketStatus::Requested, 5);
        let id = ticket.id;
        let mut board = TicketBoard::new();
        board.load(vec![ticket.clone()]);

        let cmd = board.begin(id, TicketAction::Accept, Utc::now()).unwrap();
        board.reject(cmd, None).unwrap();

        let entry = board.get(id).unwrap();
        assert_eq!(entry.ticket, ticket);
        assert_eq!(entry.command, Some(CommandState::Rejected));
    }

    #[test]
    fn test_reject_with_refetched_state() {
        let ticket = make_ticket(TicketStatus::Requested, 5);
        let id = ticket.id;
        let mut board = TicketBoard::new();
        board.load(vec![ticket.clone()]);

        // Someone else accepted it first; our accept loses.
        let cmd = board.begin(id, TicketAction::Accept, Utc::now()).unwrap();
        let other = ticket.transition(TicketAction::Accept, Utc::now()).unwrap();
        board.reject(cmd, Some(other.clone())).unwrap();

        assert_eq!(board.get(id).unwrap().ticket, other);
    }

    #[test]
    fn test_illegal_transition_never_becomes_pending() {
        let ticket = make_ticket(TicketStatus::Requested, 5);
        let id = ticket.id;
        let mut board = TicketBoard::new();
        board.load(vec![ticket]);

        let err = board.begin(id, TicketAction::Resolve, Utc::now()).unwrap_err();
        assert!(matches!(err, BoardError::Transition(_)));
        assert_eq!(board.get(id).unwrap().command, None);
    }

    #[test]
    fn test_one_command_in_flight_per_ticket() {
        let ticket = make_ticket(TicketStatus::Requested, 5);
        let id = ticket.id;
        let mut board = TicketBoard::new();
        board.load(vec![ticket]);

        board.begin(id, TicketAction::Accept, Utc::now()).unwrap();
        assert_eq!(
            board.begin(id, TicketAction::Cancel, Utc::now()),
            Err(BoardError::Busy(id))
        );
    }

    #[test]
    fn test_confirmed_terminal_ticket_leaves_board() {
        let ticket = make_ticket(TicketStatus::InProgress, 5);
        let id = ticket.id;
        let mut board = TicketBoard::new();
        board.load(vec![ticket.clone()]);

        let cmd = board.begin(id, TicketAction::Resolve, Utc::now()).unwrap();
        let done = ticket.transition(TicketAction::Resolve, Utc::now()).unwrap();
        board.confirm(cmd, done).unwrap();

        assert!(board.entries().is_empty());
        assert!(board.get(id).is_none());
    }

    #[test]
    fn test_terminal_event_during_pending_command_is_pruned_on_confirm() {
        let ticket = make_ticket(TicketStatus::Requested, 5);
        let id = ticket.id;
        let mut board = TicketBoard::new();
        board.load(vec![ticket.clone()]);

        let cmd = board.begin(id, TicketAction::Cancel, Utc::now()).unwrap();
        let cancelled = ticket.transition(TicketAction::Cancel, Utc::now()).unwrap();
        // The feed echoes our own change before the response lands.
        board.apply_event(&TicketEvent::transitioned(TicketAction::Cancel, cancelled.clone()));
        assert_eq!(board.entries().len(), 1);

        board.confirm(cmd, cancelled).unwrap();
        assert!(board.entries().is_empty());
    }

    #[test]
    fn test_reject_with_terminal_refetch_leaves_board() {
        let ticket = make_ticket(TicketStatus::Requested, 5);
        let id = ticket.id;
        let mut board = TicketBoard::new();
        board.load(vec![ticket.clone()]);

        // Guest cancelled while staff tried to accept.
        let cmd = board.begin(id, TicketAction::Accept, Utc::now()).unwrap();
        let cancelled = ticket.transition(TicketAction::Cancel, Utc::now()).unwrap();
        board.reject(cmd, Some(cancelled)).unwrap();

        assert!(board.get(id).is_none());
    }

    #[test]
    fn test_feed_events_merge_and_prune() {
        let old = make_ticket(TicketStatus::Requested, 10);
        let new = make_ticket(TicketStatus::Requested, 1);
        let mut board = TicketBoard::new();
        board.load(vec![old.clone()]);

        board.apply_event(&TicketEvent::created(new.clone()));
        let ids: Vec<Uuid> = board.entries().iter().map(|e| e.ticket.id).collect();
        assert_eq!(ids, vec![old.id, new.id]);

        let cancelled = old.transition(TicketAction::Cancel, Utc::now()).unwrap();
        board.apply_event(&TicketEvent::transitioned(TicketAction::Cancel, cancelled));
        let ids: Vec<Uuid> = board.entries().iter().map(|e| e.ticket.id).collect();
        assert_eq!(ids, vec![new.id]);
    }
}
