//! The Flockwave message hub: the central asynchronous mailbox for a
//! drone-fleet command-and-control server. Validates and dispatches
//! incoming envelopes to registered handlers, queues outbound traffic
//! toward one client or a broadcast, and drives a framework of pluggable
//! rate limiters that pace high-frequency telemetry.
//!
//! Wire codecs, transport listeners, and the client/channel-type
//! registries themselves are out of scope -- this crate only defines the
//! traits ([`client`], [`registries`]) they must implement.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod iterate;
pub mod outbound;
pub mod pipeline;
pub mod rate_limiter;
pub mod registries;

pub use client::{BoxFuture, Broadcaster, ChannelType, Client, SinkError};
pub use config::HubConfig;
pub use error::HubError;
pub use handlers::{HandlerGuard, HandlerResult, MessageHandler, TypeSelector};
pub use hub::MessageHub;
pub use iterate::{IterateItem, IterateStream, Responder};
pub use outbound::{Recipient, RecipientRef};
pub use rate_limiter::{
    ConnectionLifecycleState, ConnectionStateRateLimiter, GenericRateLimiter, RateLimiter,
    RateLimiterRequest, RateLimiters,
};
pub use registries::{ChannelTypeRegistry, ClientRegistry};

pub use flockwave_protocol::{
    ack, DefaultValidator, Envelope, EnvelopeKind, MessageBuilder, TYPE_FIELD, ValidationError,
    Validator,
};
