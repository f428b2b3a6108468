//! The client sink and channel-type descriptor interfaces the hub depends
//! on. Both are external collaborators; the hub only ever calls through
//! these traits, never owns a concrete transport.

use std::future::Future;
use std::pin::Pin;

use flockwave_protocol::Envelope;

/// Boxed, type-erased future, the manual async-trait idiom for a trait
/// method that needs to return a future without pulling in `async-trait`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The failure a sink can report back to the hub.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// The recipient is gone; the hub treats this as routine, not an error
    /// worth escalating.
    #[error("channel closed")]
    Closed,
    /// Any other transport-level failure.
    #[error("{0}")]
    Other(String),
}

/// An external entity identified by a stable `id`, associated with one
/// channel type, and exposing a send sink.
pub trait Client: Send + Sync {
    fn id(&self) -> &str;
    fn channel_type(&self) -> &str;

    /// Deliver `envelope` to this client. `'_` borrows `self` for the
    /// lifetime of the send so implementations may hold an internal lock or
    /// writer handle across the await point.
    fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), SinkError>>;
}

/// A channel type's optional bulk fan-out sink.
pub trait Broadcaster: Send + Sync {
    fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), SinkError>>;
}

/// A channel type descriptor: an id, plus an optional native broadcaster.
/// Absence of a broadcaster means the hub must iterate each connected
/// client of this type individually.
pub trait ChannelType: Send + Sync {
    fn id(&self) -> &str;
    fn broadcaster(&self) -> Option<&dyn Broadcaster>;
}
