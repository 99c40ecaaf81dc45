//! Runtime configuration: timeouts and sweeper cadence.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`crate::runtime::Spine`] instance.
///
/// Durations are (de)serialized as whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Idle time after which a held lock is reclaimed by the lock sweeper.
    #[serde(with = "secs")]
    pub lock_timeout: Duration,

    /// Session timeout used when the client does not request one at login.
    #[serde(with = "secs")]
    pub session_timeout: Duration,

    /// Upper bound for a client-requested session timeout.
    #[serde(with = "secs")]
    pub max_session_timeout: Duration,

    /// How often each sweeper checks its deadlines.
    #[serde(with = "secs")]
    pub sweep_interval: Duration,

    /// Number of object cache shards.
    pub cache_shards: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(60),
            session_timeout: Duration::from_secs(600),
            max_session_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(5),
            cache_shards: 16,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn lock_timeout(mut self, value: Duration) -> Self {
        self.lock_timeout = value;
        self
    }

    #[must_use]
    pub const fn session_timeout(mut self, value: Duration) -> Self {
        self.session_timeout = value;
        self
    }

    #[must_use]
    pub const fn max_session_timeout(mut self, value: Duration) -> Self {
        self.max_session_timeout = value;
        self
    }

    #[must_use]
    pub const fn sweep_interval(mut self, value: Duration) -> Self {
        self.sweep_interval = value;
        self
    }

    #[must_use]
    pub const fn cache_shards(mut self, value: usize) -> Self {
        self.cache_shards = value;
        self
    }

    /// Timeout for a new session: the client's request capped at the maximum,
    /// or the default when none was requested.
    pub fn clamp_session_timeout(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(t) if t.is_zero() => self.session_timeout,
            Some(t) => t.min(self.max_session_timeout),
            None => self.session_timeout,
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
