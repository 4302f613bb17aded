//! Server configuration parsed from environment variables.

use std::time::Duration;

use crate::services::drift::{DEFAULT_CHECK_INTERVAL_MS, DEFAULT_DRIFT_THRESHOLD_MS};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Cadence of the periodic `sync:tick` snapshot.
    pub sync_interval_ms: u64,
    /// Drift tolerated before a client is told to seek.
    pub drift_threshold_ms: u64,
    /// Bounded outbound queue per connection.
    pub client_channel_capacity: usize,
}

impl Config {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `SYNC_INTERVAL_MS`: default 5000
    /// - `DRIFT_THRESHOLD_MS`: default 2000
    /// - `CLIENT_CHANNEL_CAPACITY`: default 256
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: parse_or("PORT", lookup("PORT"), DEFAULT_PORT),
            sync_interval_ms: parse_or("SYNC_INTERVAL_MS", lookup("SYNC_INTERVAL_MS"), DEFAULT_CHECK_INTERVAL_MS)
                .max(1),
            drift_threshold_ms: parse_or(
                "DRIFT_THRESHOLD_MS",
                lookup("DRIFT_THRESHOLD_MS"),
                DEFAULT_DRIFT_THRESHOLD_MS,
            ),
            client_channel_capacity: parse_or(
                "CLIENT_CHANNEL_CAPACITY",
                lookup("CLIENT_CHANNEL_CAPACITY"),
                DEFAULT_CLIENT_CHANNEL_CAPACITY,
            )
            .max(1),
        }
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            sync_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            drift_threshold_ms: DEFAULT_DRIFT_THRESHOLD_MS,
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config value");
            default
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
