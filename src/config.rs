//! Hub configuration.
//!
//! The hub is a library, not a standalone process, so there is no file-based
//! config layer here -- `HubConfig` is either built directly or read from
//! environment variables with [`HubConfig::from_env`], in the style
//! `services/server`'s `main.rs` reads `LOG_LEVEL`/`BIND_ADDR` before
//! constructing its `AppState`.

use std::env;
use std::time::Duration;

/// Bounded FIFO capacity for the outbound queue (spec: design constant 4096).
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Default minimum delay between emissions of the generic batching limiter.
pub const DEFAULT_RATE_LIMITER_DELAY: Duration = Duration::from_millis(100);

/// Settle-wait timeout for the connection-state limiter.
pub const CONNECTION_STATE_SETTLE_TIMEOUT: Duration = Duration::from_millis(100);

/// tokio has no true zero-capacity channel; this is the closest
/// approximation to the rendezvous channel the iterate adapter wants.
pub const DEFAULT_ITERATE_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the bounded outbound queue.
    pub queue_capacity: usize,
    /// Default delay used by a [`crate::rate_limiter::GenericRateLimiter`]
    /// when the caller does not specify one explicitly.
    pub default_rate_limiter_delay: Duration,
    /// Capacity of the channel backing [`crate::hub::MessageHub::iterate`].
    pub iterate_channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            default_rate_limiter_delay: DEFAULT_RATE_LIMITER_DELAY,
            iterate_channel_capacity: DEFAULT_ITERATE_CHANNEL_CAPACITY,
        }
    }
}

impl HubConfig {
    /// Reads overrides from `HUB_QUEUE_CAPACITY` / `HUB_RATE_LIMITER_DELAY_MS`
    /// / `HUB_ITERATE_CHANNEL_CAPACITY`, falling back to the defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var("HUB_QUEUE_CAPACITY") {
            if let Ok(capacity) = raw.parse() {
                config.queue_capacity = capacity;
            }
        }

        if let Ok(raw) = env::var("HUB_RATE_LIMITER_DELAY_MS") {
            if let Ok(ms) = raw.parse() {
                config.default_rate_limiter_delay = Duration::from_millis(ms);
            }
        }

        if let Ok(raw) = env::var("HUB_ITERATE_CHANNEL_CAPACITY") {
            if let Ok(capacity) = raw.parse() {
                config.iterate_channel_capacity = capacity;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_constants() {
        let config = HubConfig::default();
        assert_eq!(config.queue_capacity, 4096);
        assert_eq!(config.default_rate_limiter_delay, Duration::from_millis(100));
    }
}
