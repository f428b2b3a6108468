//! The client and channel-type registries, consulted but never owned by the
//! hub.
//!
//! Lookups are synchronous: registries are typically plain in-memory maps
//! guarded by the event loop, not I/O, so there is no need to make these
//! traits `async`.

use std::sync::Arc;

use crate::client::{ChannelType, Client};

pub trait ClientRegistry: Send + Sync {
    /// Looks up a client by id.
    fn lookup(&self, id: &str) -> Option<Arc<dyn Client>>;

    /// All client ids currently connected under the given channel type.
    fn client_ids_for_channel_type(&self, channel_type: &str) -> Vec<String>;

    /// Whether at least one client of the given channel type is connected.
    fn has_clients_for_channel_type(&self, channel_type: &str) -> bool;
}

pub trait ChannelTypeRegistry: Send + Sync {
    /// Ids of every registered channel type, in registration order.
    fn ids(&self) -> Vec<String>;

    fn lookup(&self, id: &str) -> Option<Arc<dyn ChannelType>>;
}
