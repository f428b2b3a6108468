//! The generic batching limiter: coalesces bursts of per-entity updates
//! (typically UAV ids) into periodic batched notifications.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::client::BoxFuture;
use crate::hub::MessageHub;
use crate::outbound::Recipient;

use super::{Bundler, RateLimiter, RateLimiterRequest};

/// Builds the emitted envelope's body from the exact set of ids
/// accumulated since the previous emission. Failures are logged and the
/// batch is dropped; the wait cadence continues regardless.
pub type BatchFactory = Box<dyn Fn(&HashSet<String>) -> Result<Value, String> + Send + Sync>;

pub struct GenericRateLimiter {
    name: OnceLock<String>,
    factory: BatchFactory,
    delay: Duration,
    bundler: Bundler,
}

impl GenericRateLimiter {
    pub fn new(factory: BatchFactory, delay: Duration) -> Self {
        Self {
            name: OnceLock::new(),
            factory,
            delay,
            bundler: Bundler::new(),
        }
    }

    pub fn with_default_delay(factory: BatchFactory) -> Self {
        Self::new(factory, crate::config::DEFAULT_RATE_LIMITER_DELAY)
    }

    async fn emit_once(&self, hub: &MessageHub) {
        let ids = self.bundler.drain();
        if ids.is_empty() {
            return;
        }
        match (self.factory)(&ids) {
            Ok(body) => {
                let notification = hub.create_notification(body);
                if let Err(err) = hub.enqueue(notification, Recipient::Broadcast) {
                    warn!(limiter = %self.display_name(), error = %err, "dropping rate-limited batch: queue full");
                }
            }
            Err(err) => {
                warn!(limiter = %self.display_name(), error = %err, "rate limiter factory failed; batch dropped");
            }
        }
    }

    fn display_name(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or("<unnamed>")
    }
}

impl RateLimiter for GenericRateLimiter {
    fn set_name(&self, name: &str) {
        let _ = self.name.set(name.to_owned());
    }

    fn add_request(&self, request: RateLimiterRequest, _hub: std::sync::Arc<MessageHub>) {
        if let RateLimiterRequest::Ids(ids) = request {
            self.bundler.add(ids);
        }
    }

    fn run<'a>(&'a self, hub: &'a MessageHub) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            loop {
                self.bundler.wait_non_empty().await;
                self.emit_once(hub).await;
                tokio::time::sleep(self.delay).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::hub::MessageHub;
    use crate::registries::{ChannelTypeRegistry, ClientRegistry};
    use std::sync::{Arc, Mutex};

    struct NoClients;
    impl ClientRegistry for NoClients {
        fn lookup(&self, _id: &str) -> Option<Arc<dyn Client>> {
            None
        }
        fn client_ids_for_channel_type(&self, _channel_type: &str) -> Vec<String> {
            Vec::new()
        }
        fn has_clients_for_channel_type(&self, _channel_type: &str) -> bool {
            false
        }
    }
    struct NoChannelTypes;
    impl ChannelTypeRegistry for NoChannelTypes {
        fn ids(&self) -> Vec<String> {
            Vec::new()
        }
        fn lookup(&self, _id: &str) -> Option<Arc<dyn crate::client::ChannelType>> {
            None
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_in_the_cadence_described_by_the_batching_scenario() {
        let emitted: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let emitted_for_factory = emitted.clone();

        let hub = Arc::new(MessageHub::new(
            crate::config::HubConfig::default(),
            Arc::new(NoClients),
            Arc::new(NoChannelTypes),
        ));

        let limiter = Arc::new(GenericRateLimiter::new(
            Box::new(move |ids: &HashSet<String>| {
                let mut sorted: Vec<String> = ids.iter().cloned().collect();
                sorted.sort();
                emitted_for_factory.lock().unwrap().push(sorted.clone());
                Ok(serde_json::json!({"type": "UAV-INF", "ids": sorted}))
            }),
            Duration::from_millis(100),
        ));
        limiter.set_name("uav-inf");

        let run_hub = hub.clone();
        let run_limiter = limiter.clone();
        let handle = tokio::spawn(async move {
            run_limiter.run(&run_hub).await;
        });

        limiter.add_request(RateLimiterRequest::Ids(["u1".to_owned()].into()), hub.clone());
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(20)).await;
        limiter.add_request(
            RateLimiterRequest::Ids(["u2".to_owned(), "u3".to_owned()].into()),
            hub.clone(),
        );

        tokio::time::advance(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(50)).await;
        limiter.add_request(RateLimiterRequest::Ids(["u2".to_owned()].into()), hub.clone());

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;

        handle.abort();

        let batches = emitted.lock().unwrap().clone();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec!["u1".to_owned()]);
        assert_eq!(batches[1], vec!["u2".to_owned(), "u3".to_owned()]);
        assert_eq!(batches[2], vec!["u2".to_owned()]);
    }
}
