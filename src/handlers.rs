//! Handler registry: maps a message type (or the wildcard "any") to an
//! ordered list of handlers, and feeds incoming envelopes through them with
//! specific handlers before wildcard handlers, each bucket in registration
//! order.
//!
//! Mutations here are plain, synchronous critical sections (never held
//! across an `.await`), so the table is guarded with a `std::sync::RwLock`
//! rather than `tokio::sync::RwLock` -- there is nothing to suspend on.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use flockwave_protocol::Envelope;
use serde_json::Value;

use crate::client::{BoxFuture, Client};
use crate::hub::MessageHub;

/// The four shapes a handler's return value can take (design note 9: model
/// the source's dynamic dispatch as a tagged sum).
pub enum HandlerResult {
    /// The handler did not recognize this message.
    Declined,
    /// The handler dealt with the message itself; nothing more to send.
    Handled,
    /// A body to wrap as a response and enqueue.
    Body(Value),
    /// An already-built response envelope.
    Response(Envelope),
}

impl From<bool> for HandlerResult {
    fn from(handled: bool) -> Self {
        if handled {
            HandlerResult::Handled
        } else {
            HandlerResult::Declined
        }
    }
}

/// A registered incoming-message handler.
///
/// Handlers are invoked with the validated envelope, the sender, and the hub
/// itself (so a handler may call back into `enqueue_message`/`send_message`
/// from within its own body).
pub trait MessageHandler: Send + Sync {
    fn call<'a>(
        &'a self,
        envelope: &'a Envelope,
        sender: Arc<dyn Client>,
        hub: &'a MessageHub,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// Selects which message type bucket(s) a handler should be registered
/// under. `None`/wildcard registers under every message type; a single
/// string or a list of strings registers under exactly those types (never
/// the wildcard), mirroring the Python `register_message_handler` coercion
/// rules (`None` or `str` -> `[value]`).
pub enum TypeSelector {
    Wildcard,
    One(String),
    Many(Vec<String>),
}

impl From<&str> for TypeSelector {
    fn from(value: &str) -> Self {
        TypeSelector::One(value.to_owned())
    }
}

impl From<String> for TypeSelector {
    fn from(value: String) -> Self {
        TypeSelector::One(value)
    }
}

impl From<Option<&str>> for TypeSelector {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(v) => TypeSelector::One(v.to_owned()),
            None => TypeSelector::Wildcard,
        }
    }
}

impl<const N: usize> From<[&str; N]> for TypeSelector {
    fn from(value: [&str; N]) -> Self {
        TypeSelector::Many(value.iter().map(|s| (*s).to_owned()).collect())
    }
}

impl From<Vec<&str>> for TypeSelector {
    fn from(value: Vec<&str>) -> Self {
        TypeSelector::Many(value.into_iter().map(str::to_owned).collect())
    }
}

fn normalize(selector: TypeSelector) -> Vec<Option<String>> {
    match selector {
        TypeSelector::Wildcard => vec![None],
        TypeSelector::One(t) => vec![Some(t)],
        TypeSelector::Many(types) => types.into_iter().map(Some).collect(),
    }
}

type HandlerList = Vec<Arc<dyn MessageHandler>>;

#[derive(Default)]
pub struct HandlerRegistry {
    by_type: RwLock<HashMap<Option<String>, HandlerList>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under every type `selector` normalizes to.
    /// Duplicate registrations are permitted; each appends its own entry and
    /// dispatches separately.
    pub fn register(&self, handler: Arc<dyn MessageHandler>, selector: TypeSelector) {
        let mut table = self.by_type.write().expect("handler table poisoned");
        for message_type in normalize(selector) {
            table.entry(message_type).or_default().push(handler.clone());
        }
    }

    /// Removes the first occurrence of `handler` from each named list;
    /// silent if it was never registered there.
    pub fn unregister(&self, handler: &Arc<dyn MessageHandler>, selector: TypeSelector) {
        let mut table = self.by_type.write().expect("handler table poisoned");
        for message_type in normalize(selector) {
            if let Some(list) = table.get_mut(&message_type) {
                if let Some(pos) = list.iter().position(|h| Arc::ptr_eq(h, handler)) {
                    list.remove(pos);
                }
            }
        }
    }

    /// Snapshot of the handlers that should see an incoming message of
    /// `message_type`: specific handlers first, then wildcard handlers,
    /// each in registration order. Readers take a snapshot per message so a
    /// handler registering or unregistering mid-dispatch cannot corrupt
    /// iteration.
    pub fn snapshot_for(&self, message_type: &str) -> HandlerList {
        let table = self.by_type.read().expect("handler table poisoned");
        let mut result: HandlerList = table
            .get(&Some(message_type.to_owned()))
            .cloned()
            .unwrap_or_default();
        if let Some(wildcard) = table.get(&None) {
            result.extend(wildcard.iter().cloned());
        }
        result
    }
}

/// RAII guard returned by [`MessageHub::use_handler`]; unregisters the
/// handler when dropped, including on an early return or panic unwind --
/// the Rust analogue of the original's `@contextmanager`-based
/// `use_message_handler`.
pub struct HandlerGuard {
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) types: Vec<Option<String>>,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        let mut table = self.registry.by_type.write().expect("handler table poisoned");
        for message_type in self.types.drain(..) {
            if let Some(list) = table.get_mut(&message_type) {
                if let Some(pos) = list.iter().position(|h| Arc::ptr_eq(h, &self.handler)) {
                    list.remove(pos);
                }
            }
        }
    }
}

impl HandlerRegistry {
    /// Registers `handler` and returns a guard that unregisters it on drop.
    pub fn use_handler(
        self: &Arc<Self>,
        handler: Arc<dyn MessageHandler>,
        selector: TypeSelector,
    ) -> HandlerGuard {
        let types = normalize(selector);
        {
            let mut table = self.by_type.write().expect("handler table poisoned");
            for message_type in &types {
                table
                    .entry(message_type.clone())
                    .or_default()
                    .push(handler.clone());
            }
        }
        HandlerGuard {
            registry: self.clone(),
            handler,
            types,
        }
    }
}
