//! Client configuration.

use std::time::Duration;

use roomkeeper_room::{CleanupMode, LifecycleConfig};
use serde::{Deserialize, Serialize};

use crate::RoomkeeperError;

/// Everything a [`RoomClient`](crate::RoomClient) can be tuned with.
///
/// Missing fields take their defaults, so `{}` is a valid config.
///
/// ```
/// use roomkeeper::RoomkeeperConfig;
///
/// let config = RoomkeeperConfig::from_json(r#"{ "lifecycle": { "grace_period": { "secs": 0, "nanos": 0 } } }"#)?;
/// assert!(config.lifecycle.grace_period.is_zero());
/// # Ok::<(), roomkeeper::RoomkeeperError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomkeeperConfig {
    pub lifecycle: LifecycleConfig,
    pub cleanup: CleanupMode,
    /// How often the lease reaper sweeps. Only used in lease mode.
    pub reaper_interval: Duration,
}

impl Default for RoomkeeperConfig {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleConfig::default(),
            cleanup: CleanupMode::default(),
            reaper_interval: Duration::from_secs(10),
        }
    }
}

impl RoomkeeperConfig {
    /// Parses a config from JSON.
    pub fn from_json(json: &str) -> Result<Self, RoomkeeperError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.validated())
    }

    /// Serializes the config as pretty JSON.
    pub fn to_json(&self) -> Result<String, RoomkeeperError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Clamp and fix any out-of-range values.
    pub fn validated(mut self) -> Self {
        if let CleanupMode::Lease(lease) = self.cleanup {
            self.cleanup = CleanupMode::Lease(lease.validated());
        }
        if self.reaper_interval.is_zero() {
            let fallback = Self::default().reaper_interval;
            tracing::warn!(
                fallback_ms = fallback.as_millis() as u64,
                "reaper interval is zero, using default"
            );
            self.reaper_interval = fallback;
        }
        if self.lifecycle.command_channel_size == 0 {
            tracing::warn!("command channel size is zero, raising to 1");
            self.lifecycle.command_channel_size = 1;
        }
        self
    }
}
