//! The message hub itself: wires the envelope builder, handler registry,
//! outbound queue, broadcast plan cache, and rate limiter registry into one
//! object that collaborators hold an `Arc<MessageHub>` to.

use std::sync::{Arc, Mutex};

use flockwave_protocol::{DefaultValidator, Envelope, MessageBuilder, Validator};
use serde_json::Value;
use tracing::{info, warn};

use crate::broadcast::BroadcastPlanCache;
use crate::client::{Client, SinkError};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::handlers::{HandlerGuard, HandlerRegistry, MessageHandler, TypeSelector};
use crate::iterate::{iterate, IterateStream};
use crate::outbound::{self, OutboundReceiver, OutboundRequest, OutboundSender, Recipient, RecipientRef};
use crate::pipeline::handle_incoming_message;
use crate::rate_limiter::{RateLimiter, RateLimiterRequest, RateLimiters};
use crate::registries::{ChannelTypeRegistry, ClientRegistry};

/// The central asynchronous mailbox. Construct one per server process with
/// [`MessageHub::new`], register handlers and limiters, then drive it with
/// [`MessageHub::run`].
///
/// This is never cloned: the queue's receiving half can only be taken once,
/// so sharing happens by handing collaborators an `Arc<MessageHub>` rather
/// than a cheap `Clone` of it.
pub struct MessageHub {
    config: HubConfig,
    validator: Arc<dyn Validator>,
    message_builder: MessageBuilder,
    handlers: Arc<HandlerRegistry>,
    outbound_tx: OutboundSender,
    outbound_rx: Mutex<Option<OutboundReceiver>>,
    broadcast_plan: BroadcastPlanCache,
    client_registry: Arc<dyn ClientRegistry>,
    channel_type_registry: Arc<dyn ChannelTypeRegistry>,
    rate_limiters: RateLimiters,
}

impl MessageHub {
    pub fn new(
        config: HubConfig,
        client_registry: Arc<dyn ClientRegistry>,
        channel_type_registry: Arc<dyn ChannelTypeRegistry>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = outbound::channel(config.queue_capacity);
        Self {
            config,
            validator: Arc::new(DefaultValidator),
            message_builder: MessageBuilder::new(),
            handlers: Arc::new(HandlerRegistry::new()),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            broadcast_plan: BroadcastPlanCache::new(),
            client_registry,
            channel_type_registry,
            rate_limiters: RateLimiters::new(),
        }
    }

    /// Swaps in a schema-backed validator in place of [`DefaultValidator`].
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn validator(&self) -> &dyn Validator {
        self.validator.as_ref()
    }

    pub fn message_builder(&self) -> &MessageBuilder {
        &self.message_builder
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn outbound(&self) -> &OutboundSender {
        &self.outbound_tx
    }

    pub fn rate_limiters(&self) -> &RateLimiters {
        &self.rate_limiters
    }

    // -- Envelope Builder ----------------------------------------------

    pub fn create_notification(&self, body: Value) -> Envelope {
        self.message_builder.create_notification(body)
    }

    pub fn create_response_to(&self, request: &Envelope, body: Value) -> Envelope {
        self.message_builder.create_response_to(request, body)
    }

    pub fn acknowledge(&self, request: &Envelope, outcome: bool, reason: Option<&str>) -> Envelope {
        self.message_builder.acknowledge(request, outcome, reason)
    }

    // -- Outbound Queue --------------------------------------------------

    /// Non-blocking; fails fast with [`HubError::QueueFull`] if the queue
    /// has no room. Typical callers log and drop on failure.
    pub fn enqueue(&self, envelope: Envelope, recipient: Recipient) -> Result<(), HubError> {
        debug_assert!(
            !(matches!(recipient, Recipient::Broadcast) && envelope.correlation_id.is_some()),
            "a broadcast envelope must not carry a correlation id"
        );
        self.outbound_tx
            .try_send(OutboundRequest { envelope, recipient })
            .map_err(|_| HubError::QueueFull)
    }

    /// Blocking: awaits space in the queue rather than failing fast.
    pub async fn send(&self, envelope: Envelope, recipient: Recipient) -> Result<(), HubError> {
        self.outbound_tx
            .send(OutboundRequest { envelope, recipient })
            .await
            .map_err(|_| HubError::QueueFull)
    }

    /// Sugar for enqueueing a fresh notification to every connected client.
    /// Non-blocking, matching the rest of the enqueue family (see
    /// DESIGN.md for the rationale).
    pub fn enqueue_broadcast_message(&self, body: Value) -> Result<(), HubError> {
        let notification = self.create_notification(body);
        self.enqueue(notification, Recipient::Broadcast)
    }

    pub fn enqueue_message(&self, body: Value, to: RecipientRef) -> Result<(), HubError> {
        let notification = self.create_notification(body);
        self.enqueue(notification, Recipient::Unicast(to))
    }

    // -- Handler Registry ------------------------------------------------

    pub fn register_message_handler(&self, handler: Arc<dyn MessageHandler>, selector: TypeSelector) {
        self.handlers.register(handler, selector);
    }

    pub fn unregister_message_handler(&self, handler: &Arc<dyn MessageHandler>, selector: TypeSelector) {
        self.handlers.unregister(handler, selector);
    }

    pub fn use_handler(self: &Arc<Self>, handler: Arc<dyn MessageHandler>, selector: TypeSelector) -> HandlerGuard {
        self.handlers.use_handler(handler, selector)
    }

    // -- Iterate Adapter -------------------------------------------------

    pub fn iterate(self: &Arc<Self>, selector: TypeSelector) -> IterateStream {
        iterate(self, selector)
    }

    // -- Incoming Pipeline -----------------------------------------------

    pub async fn handle_incoming_message(&self, raw: Value, sender: Arc<dyn Client>) -> bool {
        handle_incoming_message(self, raw, sender).await
    }

    // -- Registry change notifications -----------------------------------

    pub fn notify_client_registry_changed(&self) {
        self.broadcast_plan.invalidate();
    }

    pub fn notify_channel_type_registry_changed(&self) {
        self.broadcast_plan.invalidate();
    }

    // -- Rate Limiter Framework -------------------------------------------

    pub fn register_rate_limiter(&self, name: impl Into<String>, limiter: Arc<dyn RateLimiter>) -> Result<(), HubError> {
        self.rate_limiters.register(name, limiter)
    }

    pub fn request_to_send(self: &Arc<Self>, name: &str, request: RateLimiterRequest) {
        self.rate_limiters.request_to_send(name, request, self.clone());
    }

    // -- Dispatch Loop -----------------------------------------------------

    /// Drives the outbound queue and every registered rate limiter
    /// concurrently until the queue is closed (every [`OutboundSender`]
    /// clone dropped) and all in-flight workers finish. Cancel the future
    /// driving this method to shut the hub down early -- there is no
    /// explicit stop signal, only future cancellation.
    pub async fn run(self: Arc<Self>) {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .expect("outbound receiver poisoned")
            .take()
            .expect("MessageHub::run called more than once");

        let mut tasks = tokio::task::JoinSet::new();

        let limiters_hub = self.clone();
        tasks.spawn(async move {
            let hub = limiters_hub.clone();
            limiters_hub.rate_limiters.run(hub).await;
        });

        while let Some(request) = outbound_rx.recv().await {
            let hub = self.clone();
            tasks.spawn(async move { hub.deliver(request).await });
        }

        while tasks.join_next().await.is_some() {}
    }

    async fn deliver(&self, request: OutboundRequest) {
        let OutboundRequest { envelope, recipient } = request;
        match recipient {
            Recipient::Unicast(reference) => self.deliver_unicast(envelope, reference).await,
            Recipient::Broadcast => self.deliver_broadcast(envelope).await,
        }
    }

    /// Unicast delivery.
    async fn deliver_unicast(&self, envelope: Envelope, reference: RecipientRef) {
        let client = match reference {
            RecipientRef::ByClient(client) => client,
            RecipientRef::ById(id) => match self.client_registry.lookup(&id) {
                Some(client) => client,
                None => {
                    warn!(id = %envelope.id, recipient = %id, "dropping message: unknown recipient");
                    return;
                }
            },
        };

        self.log_send(&envelope);

        match client.send(envelope.clone()).await {
            Ok(()) => {}
            Err(SinkError::Closed) => {
                warn!(id = %envelope.id, client = client.id(), "client disconnected; dropping message");
            }
            Err(SinkError::Other(detail)) => {
                warn!(id = %envelope.id, client = client.id(), error = %detail, "delivery failed");
            }
        }
    }

    /// Broadcast delivery.
    async fn deliver_broadcast(&self, envelope: Envelope) {
        self.log_send(&envelope);
        self.broadcast_plan
            .broadcast(&envelope, self.client_registry.as_ref(), self.channel_type_registry.as_ref())
            .await;
    }

    /// The ingress-style send log, suppressed for the high-frequency
    /// telemetry types already covered by rate-limiter logs, applied
    /// uniformly across unicast and broadcast delivery.
    fn log_send(&self, envelope: &Envelope) {
        let message_type = envelope.message_type().unwrap_or("?");
        if matches!(message_type, "UAV-INF" | "DEV-INF") {
            return;
        }
        let verb = if envelope.is_response() {
            "response"
        } else if envelope.is_notification() {
            "notification"
        } else {
            "message"
        };
        info!(id = %envelope.id, "Sending {} {}", message_type, verb);
    }
}
