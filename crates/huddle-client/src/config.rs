//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a session can start with zero
//! configuration; invalid values are logged and ignored.

use std::time::Duration;

use huddle_shared::constants::{
    DEFAULT_INBOX_CAPACITY, DEFAULT_TICK_INTERVAL_MS, DEFAULT_TRANSPORT_CAPACITY,
    DEFAULT_TYPING_TTL_MS,
};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long a typing signal stays visible after it was observed.
    /// Env: `HUDDLE_TYPING_TTL_MS`
    /// Default: `3000`
    pub typing_ttl: Duration,

    /// Per-channel chat history cap; oldest records are dropped first.
    /// Env: `HUDDLE_MAX_MESSAGES_PER_CHANNEL` (0 = unbounded)
    /// Default: unbounded
    pub max_messages_per_channel: Option<usize>,

    /// Capacity of the session inbox.
    /// Env: `HUDDLE_INBOX_CAPACITY`
    /// Default: `256`
    pub inbox_capacity: usize,

    /// Capacity of the outbound transport queue.
    /// Env: `HUDDLE_TRANSPORT_CAPACITY`
    /// Default: `64`
    pub transport_capacity: usize,

    /// Period of the clock tick that drives the reconnect countdown.
    /// Env: `HUDDLE_TICK_INTERVAL_MS`
    /// Default: `250`
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            typing_ttl: Duration::from_millis(DEFAULT_TYPING_TTL_MS),
            max_messages_per_channel: None,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            transport_capacity: DEFAULT_TRANSPORT_CAPACITY,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "HUDDLE_TYPING_TTL_MS") {
            config.typing_ttl = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<usize>(&lookup, "HUDDLE_MAX_MESSAGES_PER_CHANNEL") {
            config.max_messages_per_channel = (n > 0).then_some(n);
        }

        if let Some(n) = parse_var::<usize>(&lookup, "HUDDLE_INBOX_CAPACITY") {
            config.inbox_capacity = n.max(1);
        }

        if let Some(n) = parse_var::<usize>(&lookup, "HUDDLE_TRANSPORT_CAPACITY") {
            config.transport_capacity = n.max(1);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "HUDDLE_TICK_INTERVAL_MS") {
            // tokio's interval panics on a zero period
            config.tick_interval = Duration::from_millis(ms.max(1));
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// Typing TTL as a chrono duration; out-of-range values clamp to a day.
    pub fn typing_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.typing_ttl).unwrap_or_else(|_| chrono::Duration::days(1))
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.typing_ttl, Duration::from_secs(3));
        assert_eq!(config.max_messages_per_channel, None);
        assert_eq!(config.inbox_capacity, 256);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("HUDDLE_TYPING_TTL_MS", "5000"),
            ("HUDDLE_MAX_MESSAGES_PER_CHANNEL", "500"),
            ("HUDDLE_TICK_INTERVAL_MS", "0"),
        ]));
        assert_eq!(config.typing_ttl, Duration::from_secs(5));
        assert_eq!(config.max_messages_per_channel, Some(500));
        assert_eq!(config.tick_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_zero_history_cap_means_unbounded() {
        let config = ClientConfig::from_lookup(lookup(&[("HUDDLE_MAX_MESSAGES_PER_CHANNEL", "0")]));
        assert_eq!(config.max_messages_per_channel, None);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("HUDDLE_TYPING_TTL_MS", "soon"),
            ("HUDDLE_INBOX_CAPACITY", "-3"),
        ]));
        assert_eq!(config, ClientConfig::default());
    }
}
