//! The incoming pipeline: validate an envelope, run it past the handler
//! table, and acknowledge the unhandled case.

use std::sync::Arc;

use flockwave_protocol::{Envelope, EnvelopeKind};
use futures::FutureExt;
use serde_json::Value;
use tracing::{info, warn};

use crate::client::Client;
use crate::handlers::HandlerResult;
use crate::hub::MessageHub;
use crate::outbound::{OutboundRequest, Recipient, RecipientRef};

const UNHANDLED_REASON: &str = "No handler managed to parse this message in the server";

/// Validates, dispatches, and (if nothing handled it) NAKs `raw`. Returns
/// whether some handler accepted responsibility for the message.
pub async fn handle_incoming_message(hub: &MessageHub, raw: Value, sender: Arc<dyn Client>) -> bool {
    let envelope = match hub.validator().validate(&raw) {
        Ok(envelope) => envelope,
        Err((err, id)) => {
            if let Some(id) = id {
                let pseudo_request = Envelope {
                    id,
                    body: raw.clone(),
                    correlation_id: None,
                    kind: EnvelopeKind::Request,
                };
                let reason = err.to_string();
                let nak = hub
                    .message_builder()
                    .acknowledge(&pseudo_request, false, Some(reason.as_str()));
                enqueue_to(hub, nak, sender.clone());
            }
            return false;
        }
    };

    if raw.get("error").is_some() {
        warn!(id = %envelope.id, "incoming envelope carries an error field");
        return true;
    }

    let message_type = envelope.message_type().unwrap_or("?").to_owned();
    info!(id = %envelope.id, message_type = %message_type, "Received {} message", message_type);

    let handlers = hub.handlers().snapshot_for(&message_type);
    let mut handled = false;

    for handler in &handlers {
        let outcome = std::panic::AssertUnwindSafe(handler.call(&envelope, sender.clone(), hub))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(id = %envelope.id, "handler panicked; treating as declined");
                HandlerResult::Declined
            }
        };

        match result {
            HandlerResult::Declined => {}
            HandlerResult::Handled => handled = true,
            HandlerResult::Body(body) => {
                let response = hub.message_builder().create_response_to(&envelope, body);
                enqueue_to(hub, response, sender.clone());
                handled = true;
            }
            HandlerResult::Response(response) => {
                debug_assert_eq!(response.correlation_id.as_deref(), Some(envelope.id.as_str()));
                enqueue_to(hub, response, sender.clone());
                handled = true;
            }
        }
    }

    if !handled {
        warn!(id = %envelope.id, message_type = %message_type, "no handler accepted this message");
        let nak = hub
            .message_builder()
            .acknowledge(&envelope, false, Some(UNHANDLED_REASON));
        enqueue_to(hub, nak, sender);
    }

    handled
}

/// Non-blocking unicast enqueue back to whoever sent the original message;
/// a full queue is logged and the response dropped rather than blocking
/// the incoming pipeline on a slow or wedged recipient.
fn enqueue_to(hub: &MessageHub, envelope: Envelope, recipient: Arc<dyn Client>) {
    let id = envelope.id.clone();
    if let Err(err) = hub.outbound().try_send(OutboundRequest {
        envelope,
        recipient: Recipient::Unicast(RecipientRef::ByClient(recipient)),
    }) {
        warn!(id = %id, error = %err, "dropping response: outbound queue is full");
    }
}
