//! The iterate adapter: a pull-style stream of `(body, sender, responder)`
//! triples for a chosen set of message types.

use std::sync::Arc;

use flockwave_protocol::Envelope;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::client::Client;
use crate::handlers::{HandlerGuard, HandlerResult, MessageHandler, TypeSelector};
use crate::hub::MessageHub;
use crate::outbound::{OutboundRequest, Recipient, RecipientRef};

/// One yielded item: the request body, who sent it, and a responder that
/// wraps a reply body as a response and enqueues it.
pub struct IterateItem {
    pub body: Value,
    pub sender: Arc<dyn Client>,
    pub responder: Responder,
}

/// Enqueues a reply to the request this item came from. Non-blocking: it
/// does not wait for delivery.
pub struct Responder {
    hub: Arc<MessageHub>,
    request: Envelope,
    recipient: Arc<dyn Client>,
}

impl Responder {
    pub fn respond(&self, body: Value) {
        let response = self.hub.message_builder().create_response_to(&self.request, body);
        let _ = self.hub.outbound().try_send(OutboundRequest {
            envelope: response,
            recipient: Recipient::Unicast(RecipientRef::ByClient(self.recipient.clone())),
        });
    }
}

struct PushingHandler {
    tx: mpsc::Sender<IterateItem>,
    hub: Arc<MessageHub>,
}

impl MessageHandler for PushingHandler {
    fn call<'a>(
        &'a self,
        envelope: &'a Envelope,
        sender: Arc<dyn Client>,
        _hub: &'a MessageHub,
    ) -> crate::client::BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let item = IterateItem {
                body: envelope.body.clone(),
                sender: sender.clone(),
                responder: Responder {
                    hub: self.hub.clone(),
                    request: envelope.clone(),
                    recipient: sender,
                },
            };
            // A full channel here means a slow consumer; this send
            // deliberately awaits, propagating back-pressure into the
            // incoming pipeline rather than dropping the message.
            let _ = self.tx.send(item).await;
            HandlerResult::Handled
        })
    }
}

/// A live iteration session: the handler stays registered for as long as
/// this guard and stream are alive, and unregisters on drop.
pub struct IterateStream {
    _guard: HandlerGuard,
    inner: ReceiverStream<IterateItem>,
}

impl IterateStream {
    pub async fn next(&mut self) -> Option<IterateItem> {
        use tokio_stream::StreamExt;
        self.inner.next().await
    }
}

/// Installs a scoped handler for `selector` that pushes every matching
/// envelope onto a bounded channel, and returns the receiving stream. The
/// handler always reports "handled" -- consumers cannot decline an item
/// once it is claimed.
pub fn iterate(hub: &Arc<MessageHub>, selector: TypeSelector) -> IterateStream {
    let (tx, rx) = mpsc::channel(hub.config().iterate_channel_capacity);
    let handler: Arc<dyn MessageHandler> = Arc::new(PushingHandler {
        tx,
        hub: hub.clone(),
    });
    let guard = hub.handlers().use_handler(handler, selector);

    IterateStream {
        _guard: guard,
        inner: ReceiverStream::new(rx),
    }
}
