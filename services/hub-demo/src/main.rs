//! A standalone process that wires up an in-memory client/channel-type
//! registry, installs a couple of toy handlers, and drives the hub's
//! dispatch loop. Meant as a runnable demonstration, not a deployable
//! server -- a real deployment supplies its own transport-backed
//! registries and clients.

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};

use flockwave_hub::{
    BoxFuture, Client, Envelope, GenericRateLimiter, HandlerResult, HubConfig, MessageHandler,
    MessageHub, SinkError,
};
use flockwave_hub::{ChannelType, ChannelTypeRegistry, ClientRegistry};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let registry = Arc::new(InMemoryClientRegistry::default());
    registry.connect(Arc::new(LoggingClient::new("console-1", "stdout")));

    let channel_types = Arc::new(InMemoryChannelTypeRegistry::default());
    channel_types.add(Arc::new(StdoutChannelType));

    let hub = Arc::new(MessageHub::new(HubConfig::from_env(), registry, channel_types));

    hub.register_message_handler(Arc::new(SystemVersionHandler), "SYS-VER".into());
    hub.register_message_handler(Arc::new(PingHandler), "PING".into());

    hub.register_rate_limiter(
        "uav-inf",
        Arc::new(GenericRateLimiter::with_default_delay(Box::new(|ids| {
            let mut sorted: Vec<&String> = ids.iter().collect();
            sorted.sort();
            Ok(serde_json::json!({"type": "UAV-INF", "ids": sorted}))
        }))),
    )
    .expect("rate limiter registration happens before run() is called");

    info!("hub-demo starting");
    tokio::select! {
        () = hub.clone().run() => {},
        () = shutdown_signal() => { info!("shutdown requested"); },
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}

/// Replies with a constant version string.
struct SystemVersionHandler;

impl MessageHandler for SystemVersionHandler {
    fn call<'a>(
        &'a self,
        _envelope: &'a Envelope,
        _sender: Arc<dyn Client>,
        _hub: &'a MessageHub,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async {
            HandlerResult::Body(serde_json::json!({
                "type": "SYS-VER",
                "software": { "hub-demo": env!("CARGO_PKG_VERSION") },
            }))
        })
    }
}

/// Answers a PING with a PONG, demonstrating the `Body` handler result.
struct PingHandler;

impl MessageHandler for PingHandler {
    fn call<'a>(
        &'a self,
        _envelope: &'a Envelope,
        _sender: Arc<dyn Client>,
        _hub: &'a MessageHub,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async { HandlerResult::Body(serde_json::json!({"type": "PONG"})) })
    }
}

/// A client that just logs whatever it's asked to send, standing in for a
/// real transport (a WebSocket, a serial link, ...).
struct LoggingClient {
    id: String,
    channel_type: String,
}

impl LoggingClient {
    fn new(id: &str, channel_type: &str) -> Self {
        Self {
            id: id.to_owned(),
            channel_type: channel_type.to_owned(),
        }
    }
}

impl Client for LoggingClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            info!(client = %self.id, envelope = %envelope.body, "delivered");
            Ok(())
        })
    }
}

/// A channel type with no native broadcaster: the hub falls back to
/// iterating each connected client of this type individually.
struct StdoutChannelType;

impl ChannelType for StdoutChannelType {
    fn id(&self) -> &str {
        "stdout"
    }

    fn broadcaster(&self) -> Option<&dyn flockwave_hub::Broadcaster> {
        None
    }
}

#[derive(Default)]
struct InMemoryClientRegistry {
    clients: Mutex<HashMap<String, Arc<dyn Client>>>,
}

impl InMemoryClientRegistry {
    fn connect(&self, client: Arc<dyn Client>) {
        self.clients
            .lock()
            .expect("client registry poisoned")
            .insert(client.id().to_owned(), client);
    }
}

impl ClientRegistry for InMemoryClientRegistry {
    fn lookup(&self, id: &str) -> Option<Arc<dyn Client>> {
        self.clients.lock().expect("client registry poisoned").get(id).cloned()
    }

    fn client_ids_for_channel_type(&self, channel_type: &str) -> Vec<String> {
        self.clients
            .lock()
            .expect("client registry poisoned")
            .values()
            .filter(|client| client.channel_type() == channel_type)
            .map(|client| client.id().to_owned())
            .collect()
    }

    fn has_clients_for_channel_type(&self, channel_type: &str) -> bool {
        self.clients
            .lock()
            .expect("client registry poisoned")
            .values()
            .any(|client| client.channel_type() == channel_type)
    }
}

#[derive(Default)]
struct InMemoryChannelTypeRegistry {
    channel_types: Mutex<Vec<Arc<dyn ChannelType>>>,
}

impl InMemoryChannelTypeRegistry {
    fn add(&self, channel_type: Arc<dyn ChannelType>) {
        self.channel_types.lock().expect("channel type registry poisoned").push(channel_type);
    }
}

impl ChannelTypeRegistry for InMemoryChannelTypeRegistry {
    fn ids(&self) -> Vec<String> {
        self.channel_types
            .lock()
            .expect("channel type registry poisoned")
            .iter()
            .map(|channel_type| channel_type.id().to_owned())
            .collect()
    }

    fn lookup(&self, id: &str) -> Option<Arc<dyn ChannelType>> {
        self.channel_types
            .lock()
            .expect("channel type registry poisoned")
            .iter()
            .find(|channel_type| channel_type.id() == id)
            .cloned()
    }
}
