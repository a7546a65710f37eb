//! Service-request domain: the ticket state machine, SLA countdown,
//! persistence, change feed and the optimistic staff board.

pub mod board;
pub mod feed;
pub mod lifecycle;
pub mod sla;
pub mod tickets;
