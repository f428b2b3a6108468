//! Caller-visible error types.
//!
//! Most of the failure taxonomy in the hub (validation errors, handler
//! panics, sink errors, broadcast aggregate errors) is handled internally --
//! logged and absorbed, never surfaced as a `Result::Err` from a public
//! method, exactly as the original hub behaves. The two exceptions are
//! collected here.

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("outbound queue is full")]
    QueueFull,

    #[error("cannot register rate limiter {name:?}: registry has already started running")]
    RateLimiterRegistrationAfterStart { name: String },
}
