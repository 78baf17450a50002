use std::time::Duration;

use crate::gateway::heartbeat::{DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_KEEPALIVE_TIMEOUT};
use crate::gateway::registry::EventRegistry;

pub const DEFAULT_CONNECTION_LIMIT: usize = 50;
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Tunables for a [`crate::gateway::Gateway`].
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// How often the prober wakes, and how long a connection must be idle
    /// before it is pinged.
    pub keepalive_interval: Duration,
    /// How long a pinged connection has to answer.
    pub keepalive_timeout: Duration,
    /// Maximum connections registered under one session.
    pub connection_limit: usize,
    /// Frames queued per connection before fan-out starts dropping.
    pub outbound_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            connection_limit: DEFAULT_CONNECTION_LIMIT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

pub struct Config {
    pub port: u16,
    pub gateway: GatewayConfig,
    /// Comma-separated list of accepted event tags; empty means any.
    pub events: String,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = GatewayConfig::default();

        let gateway = GatewayConfig {
            keepalive_interval: env_parse::<u64>("FANOUT_KEEPALIVE_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.keepalive_interval),
            keepalive_timeout: env_parse::<u64>("FANOUT_KEEPALIVE_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.keepalive_timeout),
            connection_limit: env_parse("FANOUT_CONNECTION_LIMIT")
                .unwrap_or(defaults.connection_limit),
            outbound_buffer: env_parse::<usize>("FANOUT_OUTBOUND_BUFFER")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.outbound_buffer),
        };

        Self {
            port: env_parse("PORT").unwrap_or(39100),
            gateway,
            events: std::env::var("FANOUT_EVENTS").unwrap_or_default(),
        }
    }

    pub fn registry(&self) -> EventRegistry<String> {
        EventRegistry::from_csv(&self.events)
    }
}
