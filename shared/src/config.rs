use serde::Deserialize;
use std::time::Duration;

/// Wait without bound.
pub const INFINITE: Duration = Duration::MAX;

/// Timeout used when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Longest stash we keep before dropping the oldest packet.
pub const DEFAULT_STASH_CAPACITY: usize = 32;

/// Largest payload accepted off the wire.
pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Tunables of a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum number of unconsumed packets kept per connection
    pub stash_capacity: usize,
    /// Budget used by `MasterClient` and other callers that take no explicit timeout
    #[serde(with = "millis")]
    pub default_timeout: Duration,
    /// Packets declaring a larger payload are discarded
    pub max_payload_len: u32,
    /// Minimum budget for the rest of a packet once its magic has been read
    #[serde(with = "millis")]
    pub frame_grace: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            stash_capacity: DEFAULT_STASH_CAPACITY,
            default_timeout: DEFAULT_TIMEOUT,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            frame_grace: DEFAULT_TIMEOUT,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
