//! The outbound queue: every envelope the hub sends leaves through here
//! rather than through a direct call into a client's sink, so a slow or
//! wedged client cannot block whichever task produced the message.

use std::sync::Arc;

use flockwave_protocol::Envelope;
use tokio::sync::mpsc;

use crate::client::Client;
use crate::error::HubError;

/// Who an outbound envelope is addressed to.
#[derive(Clone)]
pub enum Recipient {
    Unicast(RecipientRef),
    /// Every client of every channel type currently connected.
    Broadcast,
}

/// A single addressee, named either by a stable id the registry must still
/// resolve at send time, or by an already-resolved client handle.
#[derive(Clone)]
pub enum RecipientRef {
    ById(String),
    ByClient(Arc<dyn Client>),
}

impl From<&str> for RecipientRef {
    fn from(id: &str) -> Self {
        RecipientRef::ById(id.to_owned())
    }
}

impl From<String> for RecipientRef {
    fn from(id: String) -> Self {
        RecipientRef::ById(id)
    }
}

impl From<Arc<dyn Client>> for RecipientRef {
    fn from(client: Arc<dyn Client>) -> Self {
        RecipientRef::ByClient(client)
    }
}

/// One entry on the outbound queue: an envelope plus where it's going.
pub struct OutboundRequest {
    pub envelope: Envelope,
    pub recipient: Recipient,
}

pub type OutboundSender = mpsc::Sender<OutboundRequest>;
pub type OutboundReceiver = mpsc::Receiver<OutboundRequest>;

/// Builds the bounded channel the hub enqueues onto and the dispatch loop
/// drains, sized from [`crate::config::HubConfig::queue_capacity`].
pub fn channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity)
}

/// Enqueues `request`, translating a full queue into [`HubError::QueueFull`]
/// rather than blocking the caller. The queue is bounded with an explicit
/// backpressure signal instead of unbounded memory growth.
pub async fn enqueue(sender: &OutboundSender, request: OutboundRequest) -> Result<(), HubError> {
    sender
        .try_send(request)
        .map_err(|_| HubError::QueueFull)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flockwave_protocol::EnvelopeKind;

    fn envelope() -> Envelope {
        Envelope {
            id: "1".into(),
            body: serde_json::json!({"type": "PING"}),
            correlation_id: None,
            kind: EnvelopeKind::Notification,
        }
    }

    #[tokio::test]
    async fn enqueue_succeeds_while_capacity_remains() {
        let (tx, mut rx) = channel(1);
        enqueue(
            &tx,
            OutboundRequest {
                envelope: envelope(),
                recipient: Recipient::Broadcast,
            },
        )
        .await
        .expect("queue has room");

        let received = rx.recv().await.expect("receiver open");
        assert!(matches!(received.recipient, Recipient::Broadcast));
    }

    #[tokio::test]
    async fn enqueue_reports_queue_full_instead_of_blocking() {
        let (tx, _rx) = channel(1);
        enqueue(
            &tx,
            OutboundRequest {
                envelope: envelope(),
                recipient: Recipient::Broadcast,
            },
        )
        .await
        .unwrap();

        let result = enqueue(
            &tx,
            OutboundRequest {
                envelope: envelope(),
                recipient: Recipient::Broadcast,
            },
        )
        .await;
        assert!(matches!(result, Err(HubError::QueueFull)));
    }
}
