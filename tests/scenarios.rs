//! End-to-end scenarios, S1-S6, against fake `Client`/`ClientRegistry`/
//! `ChannelTypeRegistry` implementations.
//!
//! # Scenarios
//! 1. Unhandled message produces an ACK-NAK.
//! 2. A dict-returning handler produces a correlated response.
//! 3. A handler panic does not stop the next handler from running.
//! 4. A client removed before a broadcast never receives it.
//! 5. The generic batching limiter emits on the cadence the spec prescribes.
//! 6. The connection-state limiter suppresses a settle-back-to-stable flap.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flockwave_hub::{
    BoxFuture, Broadcaster, Client, ConnectionLifecycleState, ConnectionStateRateLimiter,
    Envelope, GenericRateLimiter, HandlerResult, HubConfig, MessageHandler, MessageHub,
    RateLimiterRequest, Recipient, RecipientRef, SinkError,
};
use flockwave_hub::{ChannelType, ChannelTypeRegistry, ClientRegistry};

#[derive(Default)]
struct RecordingClient {
    id: String,
    channel_type: String,
    received: Arc<Mutex<Vec<Envelope>>>,
}

impl RecordingClient {
    fn new(id: &str, channel_type: &str) -> Self {
        Self {
            id: id.to_owned(),
            channel_type: channel_type.to_owned(),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn received(&self) -> Vec<Envelope> {
        self.received.lock().unwrap().clone()
    }
}

impl Client for RecordingClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), SinkError>> {
        self.received.lock().unwrap().push(envelope);
        Box::pin(async { Ok(()) })
    }
}

struct PlainChannelType(String);

impl ChannelType for PlainChannelType {
    fn id(&self) -> &str {
        &self.0
    }

    fn broadcaster(&self) -> Option<&dyn Broadcaster> {
        None
    }
}

#[derive(Default)]
struct InMemoryClientRegistry {
    clients: Mutex<HashMap<String, Arc<dyn Client>>>,
}

impl InMemoryClientRegistry {
    fn connect(&self, client: Arc<dyn Client>) {
        self.clients.lock().unwrap().insert(client.id().to_owned(), client);
    }

    fn disconnect(&self, id: &str) {
        self.clients.lock().unwrap().remove(id);
    }
}

impl ClientRegistry for InMemoryClientRegistry {
    fn lookup(&self, id: &str) -> Option<Arc<dyn Client>> {
        self.clients.lock().unwrap().get(id).cloned()
    }

    fn client_ids_for_channel_type(&self, channel_type: &str) -> Vec<String> {
        self.clients
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.channel_type() == channel_type)
            .map(|c| c.id().to_owned())
            .collect()
    }

    fn has_clients_for_channel_type(&self, channel_type: &str) -> bool {
        !self.client_ids_for_channel_type(channel_type).is_empty()
    }
}

#[derive(Default)]
struct InMemoryChannelTypeRegistry {
    types: Mutex<Vec<Arc<dyn ChannelType>>>,
}

impl InMemoryChannelTypeRegistry {
    fn add(&self, channel_type: Arc<dyn ChannelType>) {
        self.types.lock().unwrap().push(channel_type);
    }
}

impl ChannelTypeRegistry for InMemoryChannelTypeRegistry {
    fn ids(&self) -> Vec<String> {
        self.types.lock().unwrap().iter().map(|c| c.id().to_owned()).collect()
    }

    fn lookup(&self, id: &str) -> Option<Arc<dyn ChannelType>> {
        self.types.lock().unwrap().iter().find(|c| c.id() == id).cloned()
    }
}

fn new_hub() -> (Arc<MessageHub>, Arc<InMemoryClientRegistry>, Arc<InMemoryChannelTypeRegistry>) {
    let clients = Arc::new(InMemoryClientRegistry::default());
    let channel_types = Arc::new(InMemoryChannelTypeRegistry::default());
    let hub = Arc::new(MessageHub::new(HubConfig::default(), clients.clone(), channel_types.clone()));
    (hub, clients, channel_types)
}

/// Polls `received()` until it yields at least `want` envelopes or the
/// attempt budget runs out; the dispatch loop delivers asynchronously so a
/// plain assertion right after enqueueing would be racy. Uses bare
/// `yield_now` rather than a timed sleep so this also works under a paused
/// clock (S5/S6) without perturbing the manual `time::advance` calls there.
async fn wait_for_delivery(client: &RecordingClient, want: usize) {
    for _ in 0..10_000 {
        if client.received().len() >= want {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("timed out waiting for {want} envelope(s)");
}

// ---------------------------------------------------------------------------
// S1 -- unhandled message NAK
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_unhandled_message_nak() {
    let (hub, _clients, _channel_types) = new_hub();
    tokio::spawn(hub.clone().run());

    let sender = Arc::new(RecordingClient::new("c1", "tcp"));
    let raw = serde_json::json!({"id": "m1", "body": {"type": "FOO-BAR"}});

    let handled = hub.handle_incoming_message(raw, sender.clone()).await;
    assert!(!handled);

    wait_for_delivery(&sender, 1).await;
    let envelope = sender.received().remove(0);
    assert_eq!(envelope.correlation_id.as_deref(), Some("m1"));
    assert_eq!(envelope.message_type(), Some("ACK-NAK"));
    assert_eq!(
        envelope.body.get("reason").and_then(|v| v.as_str()),
        Some("No handler managed to parse this message in the server")
    );
}

// ---------------------------------------------------------------------------
// S2 -- dict-returning handler
// ---------------------------------------------------------------------------

struct SysVerHandler;

impl MessageHandler for SysVerHandler {
    fn call<'a>(
        &'a self,
        _envelope: &'a Envelope,
        _sender: Arc<dyn Client>,
        _hub: &'a MessageHub,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async { HandlerResult::Body(serde_json::json!({"version": "1.2"})) })
    }
}

#[tokio::test]
async fn s2_dict_return_handler_produces_correlated_response() {
    let (hub, _clients, _channel_types) = new_hub();
    tokio::spawn(hub.clone().run());

    hub.register_message_handler(Arc::new(SysVerHandler), "SYS-VER".into());

    let sender = Arc::new(RecordingClient::new("c1", "tcp"));
    let raw = serde_json::json!({"id": "m2", "body": {"type": "SYS-VER"}});

    let handled = hub.handle_incoming_message(raw, sender.clone()).await;
    assert!(handled);

    wait_for_delivery(&sender, 1).await;
    let envelope = sender.received().remove(0);
    assert_eq!(envelope.correlation_id.as_deref(), Some("m2"));
    assert_eq!(envelope.message_type(), Some("SYS-VER"));
    assert_eq!(envelope.body.get("version").and_then(|v| v.as_str()), Some("1.2"));
}

// ---------------------------------------------------------------------------
// S3 -- handler exception isolation
// ---------------------------------------------------------------------------

struct PanickingHandler;

impl MessageHandler for PanickingHandler {
    fn call<'a>(
        &'a self,
        _envelope: &'a Envelope,
        _sender: Arc<dyn Client>,
        _hub: &'a MessageHub,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async { panic!("boom") })
    }
}

struct ManualResponseHandler;

impl MessageHandler for ManualResponseHandler {
    fn call<'a>(
        &'a self,
        envelope: &'a Envelope,
        sender: Arc<dyn Client>,
        hub: &'a MessageHub,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let response = hub.create_response_to(envelope, serde_json::json!({"type": "PONG"}));
            let _ = hub.enqueue(response, Recipient::Unicast(RecipientRef::ByClient(sender)));
            HandlerResult::Handled
        })
    }
}

#[tokio::test]
async fn s3_handler_panic_does_not_block_later_handlers() {
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));

    let (hub, _clients, _channel_types) = new_hub();
    tokio::spawn(hub.clone().run());

    hub.register_message_handler(Arc::new(PanickingHandler), "PING".into());
    hub.register_message_handler(Arc::new(ManualResponseHandler), "PING".into());

    let sender = Arc::new(RecordingClient::new("c1", "tcp"));
    let raw = serde_json::json!({"id": "m3", "body": {"type": "PING"}});

    let handled = hub.handle_incoming_message(raw, sender.clone()).await;
    assert!(handled);

    wait_for_delivery(&sender, 1).await;
    let received = sender.received();
    assert_eq!(received.len(), 1, "no NAK should have been sent on top of the manual response");
    assert_eq!(received[0].message_type(), Some("PONG"));

    std::panic::set_hook(previous_hook);
}

// ---------------------------------------------------------------------------
// S4 -- broadcast after client removal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s4_broadcast_skips_a_removed_client() {
    let (hub, clients, channel_types) = new_hub();
    tokio::spawn(hub.clone().run());

    let a = Arc::new(RecordingClient::new("a", "tcp"));
    let b = Arc::new(RecordingClient::new("b", "tcp"));
    clients.connect(a.clone());
    clients.connect(b.clone());
    channel_types.add(Arc::new(PlainChannelType("tcp".into())));
    hub.notify_client_registry_changed();

    clients.disconnect("a");
    hub.notify_client_registry_changed();

    let notification = hub.create_notification(serde_json::json!({"type": "N1"}));
    hub.enqueue(notification, Recipient::Broadcast).expect("queue has room");

    wait_for_delivery(&b, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(a.received().is_empty());
    assert_eq!(b.received().len(), 1);
    assert_eq!(b.received()[0].message_type(), Some("N1"));
}

// ---------------------------------------------------------------------------
// S5 -- batching limiter cadence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn s5_batching_limiter_emits_on_the_documented_cadence() {
    let (hub, clients, channel_types) = new_hub();

    let observer = Arc::new(RecordingClient::new("observer", "tcp"));
    clients.connect(observer.clone());
    channel_types.add(Arc::new(PlainChannelType("tcp".into())));
    hub.notify_client_registry_changed();

    let limiter = Arc::new(GenericRateLimiter::new(
        Box::new(|ids: &HashSet<String>| {
            let mut sorted: Vec<String> = ids.iter().cloned().collect();
            sorted.sort();
            Ok(serde_json::json!({"type": "UAV-INF", "ids": sorted}))
        }),
        Duration::from_millis(100),
    ));
    hub.register_rate_limiter("uav-inf", limiter.clone()).expect("registers before run");

    let hub_for_run = hub.clone();
    tokio::spawn(async move { hub_for_run.run().await });
    tokio::task::yield_now().await;

    // t=0: first id emits immediately, no initial delay.
    hub.request_to_send("uav-inf", RateLimiterRequest::Ids(["u1".to_owned()].into()));
    tokio::task::yield_now().await;
    wait_for_delivery(&observer, 1).await;

    // t=0.02: accumulates during the post-emission wait.
    tokio::time::advance(Duration::from_millis(20)).await;
    hub.request_to_send(
        "uav-inf",
        RateLimiterRequest::Ids(["u2".to_owned(), "u3".to_owned()].into()),
    );

    // t=0.1ish: wait elapses, second batch goes out.
    tokio::time::advance(Duration::from_millis(90)).await;
    tokio::task::yield_now().await;
    wait_for_delivery(&observer, 2).await;

    // t=0.15: arrives mid-wait; should not cause a third batch until t~0.2.
    tokio::time::advance(Duration::from_millis(40)).await;
    hub.request_to_send("uav-inf", RateLimiterRequest::Ids(["u2".to_owned()].into()));
    tokio::time::advance(Duration::from_millis(70)).await;
    tokio::task::yield_now().await;
    wait_for_delivery(&observer, 3).await;

    let received = observer.received();
    assert_eq!(received.len(), 3);
    let ids_of = |body: &serde_json::Value| -> Vec<String> {
        body.get("ids")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default()
    };
    assert_eq!(ids_of(&received[0].body), vec!["u1".to_owned()]);
    assert_eq!(ids_of(&received[1].body), vec!["u2".to_owned(), "u3".to_owned()]);
    assert_eq!(ids_of(&received[2].body), vec!["u2".to_owned()]);
}

// ---------------------------------------------------------------------------
// S6 -- connection-state suppression
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn s6_connection_state_settle_back_emits_nothing() {
    let (hub, clients, channel_types) = new_hub();

    let observer = Arc::new(RecordingClient::new("observer", "tcp"));
    clients.connect(observer.clone());
    channel_types.add(Arc::new(PlainChannelType("tcp".into())));
    hub.notify_client_registry_changed();

    let limiter = Arc::new(ConnectionStateRateLimiter::new(|_id, state| {
        Ok(serde_json::json!({"type": "CONN-INF", "state": format!("{state:?}")}))
    }));
    hub.register_rate_limiter("conn-inf", limiter.clone()).expect("registers before run");

    let hub_for_run = hub.clone();
    tokio::spawn(async move { hub_for_run.run().await });
    tokio::task::yield_now().await;

    hub.request_to_send(
        "conn-inf",
        RateLimiterRequest::ConnectionState {
            connection_id: "c1".into(),
            old_state: ConnectionLifecycleState::Disconnected,
            new_state: ConnectionLifecycleState::Connecting,
        },
    );

    tokio::time::advance(Duration::from_millis(40)).await;
    tokio::task::yield_now().await;

    hub.request_to_send(
        "conn-inf",
        RateLimiterRequest::ConnectionState {
            connection_id: "c1".into(),
            old_state: ConnectionLifecycleState::Connecting,
            new_state: ConnectionLifecycleState::Disconnected,
        },
    );

    tokio::time::advance(Duration::from_millis(150)).await;
    tokio::task::yield_now().await;

    assert!(observer.received().is_empty(), "settling back to the same stable state must not emit CONN-INF");
}
