//! Ticket change feed.
//!
//! One feed per process. Writers call [`TicketFeed::publish`]; readers call
//! [`TicketFeed::subscribe`] and receive every change from a shared broadcast
//! channel instead of polling the tickets table on their own timers.
//!
//! With Redis configured, events travel through the `tickets:changes` channel
//! so every API instance sees every change; a single listener task per
//! process ([`run_redis_listener`]) fans them into the local broadcast. Without
//! Redis, events go straight to the local broadcast.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::lifecycle::{ServiceTicket, TicketAction};

/// Redis pub/sub channel carrying ticket changes.
pub const TICKET_CHANNEL: &str = "tickets:changes";

/// Buffered events per subscriber before it starts lagging.
const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketEventKind {
    Created,
    Transitioned,
}

/// A change to a ticket, carrying the authoritative post-change state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketEvent {
    pub kind: TicketEventKind,
    pub action: Option<TicketAction>,
    pub ticket: ServiceTicket,
    pub at: DateTime<Utc>,
}

impl TicketEvent {
    pub fn created(ticket: ServiceTicket) -> Self {
        Self {
            kind: TicketEventKind::Created,
            action: None,
            at: ticket.created_at,
            ticket,
        }
    }

    pub fn transitioned(action: TicketAction, ticket: ServiceTicket) -> Self {
        Self {
            kind: TicketEventKind::Transitioned,
            action: Some(action),
            at: ticket.updated_at,
            ticket,
        }
    }
}

/// Fan-out hub for ticket changes.
#[derive(Clone)]
pub struct TicketFeed {
    tx: broadcast::Sender<TicketEvent>,
    publisher: Option<ConnectionManager>,
}

impl TicketFeed {
    /// In-process feed only.
    pub fn local() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            tx,
            publisher: None,
        }
    }

    /// Feed that publishes through Redis. Pair with [`run_redis_listener`] so
    /// events come back into [`TicketFeed::subscribe`].
    pub fn with_redis(publisher: ConnectionManager) -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            tx,
            publisher: Some(publisher),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers (for monitoring).
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish a change. Delivery failures are logged, never returned: the
    /// ticket write has already happened and readers resync on their next read.
    pub async fn publish(&self, event: TicketEvent) {
        match &self.publisher {
            Some(publisher) => {
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize ticket event");
                        return;
                    }
                };
                let mut conn = publisher.clone();
                if let Err(e) = conn.publish::<_, _, ()>(TICKET_CHANNEL, payload).await {
                    tracing::warn!(
                        error = %e,
                        ticket_id = %event.ticket.id,
                        "Redis publish failed, delivering locally"
                    );
                    self.fan_out(event);
                }
            }
            None => self.fan_out(event),
        }
    }

    /// Deliver an event to local subscribers.
    pub fn fan_out(&self, event: TicketEvent) {
        // Err only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

/// Subscribe to [`TICKET_CHANNEL`] once and forward every message into `feed`.
///
/// Runs until the connection drops; callers restart it.
pub async fn run_redis_listener(client: redis::Client, feed: TicketFeed) -> anyhow::Result<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(TICKET_CHANNEL).await?;
    tracing::info!(channel = TICKET_CHANNEL, "Ticket feed listener subscribed");

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable ticket feed message");
                continue;
            }
        };
        match serde_json::from_str::<TicketEvent>(&payload) {
            Ok(event) => feed.fan_out(event),
            Err(e) => tracing::warn!(error = %e, "Malformed ticket feed message"),
        }
    }

    anyhow::bail!("ticket feed subscription closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TicketStatus;
    use uuid::Uuid;

    fn make_ticket() -> ServiceTicket {
        let now = Utc::now();
        ServiceTicket {
            id: Uuid::new_v4(),
            hotel_id: None,
            service_key: "housekeeping".to_string(),
            room: "310".to_string(),
            booking_code: "BK-7".to_string(),
            note: None,
            status: TicketStatus::Requested,
            sla_minutes: 30,
            created_at: now,
            accepted_at: None,
            started_at: None,
            done_at: None,
            cancelled_at: None,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_local_feed_fans_out_to_every_subscriber() {
        let feed = TicketFeed::local();
        let mut a = feed.subscribe();
        let mut b = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);

        let event = TicketEvent::created(make_ticket());
        feed.publish(event.clone()).await;

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_harmless() {
        let feed = TicketFeed::local();
        feed.publish(TicketEvent::created(make_ticket())).await;
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let ticket = make_ticket()
            .transition(TicketAction::Accept, Utc::now())
            .unwrap();
        let event = TicketEvent::transitioned(TicketAction::Accept, ticket);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"transitioned\""));
        assert!(json.contains("\"action\":\"accept\""));
        let back: TicketEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
