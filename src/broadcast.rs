//! Broadcast planning: deciding, for each channel type, whether to hand the
//! envelope to that type's native broadcaster or fan it out to clients one
//! at a time, and caching that decision until the client or channel-type
//! registries change.

use std::sync::{Arc, RwLock};

use flockwave_protocol::Envelope;
use tracing::warn;

use crate::client::{Client, SinkError};
use crate::registries::{ChannelTypeRegistry, ClientRegistry};

/// One channel type's contribution to a broadcast: either its descriptor
/// (consulted again at send time for its native broadcaster, since a
/// `&dyn Broadcaster` cannot outlive the plan-build call) or the individual
/// clients to iterate when the type has none.
enum Target {
    ViaBroadcaster(Arc<dyn crate::client::ChannelType>),
    Clients(Vec<Arc<dyn Client>>),
}

/// A built plan: one [`Target`] per channel type that currently has at
/// least one connected client.
struct Plan {
    targets: Vec<Target>,
}

enum CacheState {
    Stale,
    Valid(Arc<Plan>),
}

/// Caches the broadcast plan and invalidates it on registry change
/// notifications. Rebuilding walks every channel type and, for types with
/// no native broadcaster, every connected client -- worth avoiding on every
/// single broadcast when the client population is large and stable.
pub struct BroadcastPlanCache {
    state: RwLock<CacheState>,
}

impl Default for BroadcastPlanCache {
    fn default() -> Self {
        Self {
            state: RwLock::new(CacheState::Stale),
        }
    }
}

impl BroadcastPlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the cached plan stale; the next broadcast rebuilds it.
    pub fn invalidate(&self) {
        *self.state.write().expect("broadcast plan cache poisoned") = CacheState::Stale;
    }

    fn build(
        client_registry: &dyn ClientRegistry,
        channel_type_registry: &dyn ChannelTypeRegistry,
    ) -> Plan {
        let mut targets = Vec::new();

        for channel_type_id in channel_type_registry.ids() {
            let Some(channel_type) = channel_type_registry.lookup(&channel_type_id) else {
                continue;
            };

            if !client_registry.has_clients_for_channel_type(&channel_type_id) {
                continue;
            }

            if channel_type.broadcaster().is_some() {
                targets.push(Target::ViaBroadcaster(channel_type));
                continue;
            }

            let clients: Vec<Arc<dyn Client>> = client_registry
                .client_ids_for_channel_type(&channel_type_id)
                .into_iter()
                .filter_map(|id| client_registry.lookup(&id))
                .collect();
            if !clients.is_empty() {
                targets.push(Target::Clients(clients));
            }
        }

        Plan { targets }
    }

    /// Rebuilds the plan if stale, then sends `envelope` to everyone it
    /// names. Per-client failures are counted and logged in aggregate
    /// rather than aborting the broadcast: one dead client must not stop
    /// delivery to the rest. A client that closed its sink normally is not
    /// counted as a failure.
    pub async fn broadcast(
        &self,
        envelope: &Envelope,
        client_registry: &dyn ClientRegistry,
        channel_type_registry: &dyn ChannelTypeRegistry,
    ) {
        let plan = {
            let cached = {
                let guard = self.state.read().expect("broadcast plan cache poisoned");
                match &*guard {
                    CacheState::Valid(plan) => Some(plan.clone()),
                    CacheState::Stale => None,
                }
            };
            match cached {
                Some(plan) => plan,
                None => {
                    let plan = Arc::new(Self::build(client_registry, channel_type_registry));
                    *self.state.write().expect("broadcast plan cache poisoned") =
                        CacheState::Valid(plan.clone());
                    plan
                }
            }
        };

        let mut failures = 0usize;
        let mut attempted = 0usize;

        for target in &plan.targets {
            match target {
                Target::ViaBroadcaster(channel_type) => {
                    let Some(broadcaster) = channel_type.broadcaster() else {
                        continue;
                    };
                    attempted += 1;
                    if let Err(err) = broadcaster.send(envelope.clone()).await {
                        if !matches!(err, SinkError::Closed) {
                            failures += 1;
                        }
                    }
                }
                Target::Clients(clients) => {
                    for client in clients {
                        attempted += 1;
                        if let Err(err) = client.send(envelope.clone()).await {
                            if !matches!(err, SinkError::Closed) {
                                failures += 1;
                            }
                        }
                    }
                }
            }
        }

        if failures > 0 {
            warn!(
                attempted,
                failures, "broadcast delivery failed for some recipients"
            );
        }
    }
}
