//! The connection-state limiter: suppresses or coalesces transient
//! "…ing" transitions so flapping CONN-INF traffic never reaches clients.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::warn;

use crate::client::BoxFuture;
use crate::config::CONNECTION_STATE_SETTLE_TIMEOUT;
use crate::hub::MessageHub;
use crate::outbound::Recipient;

use super::{RateLimiter, RateLimiterRequest};

/// A connection's lifecycle phase. Stable = `connected`/`disconnected`;
/// transitioning = `connecting`/`disconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionLifecycleState {
    Connected,
    Disconnected,
    Connecting,
    Disconnecting,
}

impl ConnectionLifecycleState {
    pub fn is_stable(self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected)
    }
}

struct PendingEntry {
    last_stable_state: ConnectionLifecycleState,
    settled: Arc<Notify>,
}

pub type ConnInfoFactory =
    Arc<dyn Fn(&str, ConnectionLifecycleState) -> Result<Value, String> + Send + Sync>;

/// A settle-or-fire waiter, handed from `add_request` to `run`'s own
/// `JoinSet` over an unbounded channel so the waiter task lives inside the
/// hub's supervising task group instead of a detached `tokio::spawn`.
/// Cancelling the future driving `run` (and thus the `JoinSet`) cancels
/// every outstanding waiter along with it, matching spec.md §5's "cancelling
/// the group cancels every worker and limiter".
struct Waiter {
    connection_id: String,
    new_state: ConnectionLifecycleState,
    settled: Arc<Notify>,
    hub: Arc<MessageHub>,
}

pub struct ConnectionStateRateLimiter {
    name: OnceLock<String>,
    factory: ConnInfoFactory,
    entries: Arc<Mutex<HashMap<String, PendingEntry>>>,
    waiters_tx: mpsc::UnboundedSender<Waiter>,
    waiters_rx: Mutex<Option<mpsc::UnboundedReceiver<Waiter>>>,
}

impl ConnectionStateRateLimiter {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str, ConnectionLifecycleState) -> Result<Value, String> + Send + Sync + 'static,
    {
        let (waiters_tx, waiters_rx) = mpsc::unbounded_channel();
        Self {
            name: OnceLock::new(),
            factory: Arc::new(factory),
            entries: Arc::new(Mutex::new(HashMap::new())),
            waiters_tx,
            waiters_rx: Mutex::new(Some(waiters_rx)),
        }
    }

    fn display_name(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or("<unnamed>")
    }

    fn emit(&self, hub: &MessageHub, connection_id: &str, state: ConnectionLifecycleState) {
        emit_with(&self.factory, self.display_name(), hub, connection_id, state);
    }
}

fn emit_with(
    factory: &ConnInfoFactory,
    limiter_name: &str,
    hub: &MessageHub,
    connection_id: &str,
    state: ConnectionLifecycleState,
) {
    match factory(connection_id, state) {
        Ok(body) => {
            let notification = hub.create_notification(body);
            if let Err(err) = hub.enqueue(notification, Recipient::Broadcast) {
                warn!(limiter = limiter_name, connection_id, error = %err, "dropping CONN-INF: queue full");
            }
        }
        Err(err) => {
            warn!(limiter = limiter_name, connection_id, error = %err, "connection-state factory failed; emission dropped");
        }
    }
}

impl RateLimiter for ConnectionStateRateLimiter {
    fn set_name(&self, name: &str) {
        let _ = self.name.set(name.to_owned());
    }

    fn add_request(&self, request: RateLimiterRequest, hub: Arc<MessageHub>) {
        let RateLimiterRequest::ConnectionState {
            connection_id,
            old_state,
            new_state,
        } = request
        else {
            return;
        };

        if new_state.is_stable() {
            let pending = self
                .entries
                .lock()
                .expect("connection-state limiter poisoned")
                .remove(&connection_id);

            let suppress = match &pending {
                Some(entry) => {
                    entry.settled.notify_one();
                    entry.last_stable_state == new_state
                }
                None => false,
            };

            if !suppress {
                self.emit(&hub, &connection_id, new_state);
            }
            return;
        }

        if !old_state.is_stable() {
            // transitioning -> transitioning: emit immediately, no waiter.
            self.emit(&hub, &connection_id, new_state);
            return;
        }

        // stable -> transitioning: hand `run`'s task group a waiter that
        // emits only if the connection fails to settle back within the
        // timeout.
        let settled = Arc::new(Notify::new());
        {
            let mut entries = self.entries.lock().expect("connection-state limiter poisoned");
            entries.insert(
                connection_id.clone(),
                PendingEntry {
                    last_stable_state: old_state,
                    settled: settled.clone(),
                },
            );
        }

        let _ = self.waiters_tx.send(Waiter {
            connection_id,
            new_state,
            settled,
            hub,
        });
    }

    /// Drives every settle-or-fire waiter `add_request` hands off, each
    /// spawned onto this call's own `JoinSet` rather than a detached
    /// `tokio::spawn` -- so dropping/cancelling the future this returns
    /// (as happens when the hub's supervising task group is cancelled)
    /// cancels every outstanding waiter with it.
    fn run<'a>(&'a self, _hub: &'a MessageHub) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut waiters = self
                .waiters_rx
                .lock()
                .expect("connection-state limiter poisoned")
                .take()
                .expect("ConnectionStateRateLimiter::run called more than once");

            let mut tasks: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    incoming = waiters.recv() => {
                        let Some(waiter) = incoming else { break };
                        let entries = self.entries.clone();
                        let factory = self.factory.clone();
                        let limiter_name = self.display_name().to_owned();

                        tasks.spawn(async move {
                            let timed_out = tokio::time::timeout(
                                CONNECTION_STATE_SETTLE_TIMEOUT,
                                waiter.settled.notified(),
                            )
                            .await
                            .is_err();

                            if !timed_out {
                                return;
                            }

                            let still_pending = entries
                                .lock()
                                .expect("connection-state limiter poisoned")
                                .remove(&waiter.connection_id)
                                .is_some();

                            if still_pending {
                                emit_with(
                                    &factory,
                                    &limiter_name,
                                    &waiter.hub,
                                    &waiter.connection_id,
                                    waiter.new_state,
                                );
                            }
                        });
                    }
                    Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                }
            }

            while tasks.join_next().await.is_some() {}
        })
    }
}
