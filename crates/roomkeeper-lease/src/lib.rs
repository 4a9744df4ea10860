//! Presence leases and heartbeat scheduling for roomkeeper.
//!
//! Some stores cannot delete a path when a client's connection drops. For
//! those, presence is kept alive by a lease instead: every entry carries
//! an expiry timestamp that its owner pushes forward on a fixed cadence.
//! An entry whose owner stopped refreshing simply runs out and is treated
//! as gone.
//!
//! This crate provides the two halves of that scheme:
//!
//! - [`LeaseConfig`] — how long a lease lasts and how often it is renewed.
//! - [`Heartbeat`] — a fixed-interval scheduler that drives the renewals.
//!
//! # Integration
//!
//! The heartbeat is designed to sit inside a refresh task's loop:
//!
//! ```ignore
//! let mut heartbeat = Heartbeat::new(HeartbeatConfig::every(lease.refresh_interval));
//! loop {
//!     heartbeat.wait_for_beat().await;
//!     store.write(&path, entry_with_new_expiry()).await?;
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// LeaseConfig
// ---------------------------------------------------------------------------

/// How long a presence lease lasts and how often its owner renews it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Lifetime of a lease from its last renewal.
    pub ttl: Duration,
    /// Delay between renewals. Must leave room for at least one missed
    /// renewal before the lease runs out.
    pub refresh_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(10),
        }
    }
}

impl LeaseConfig {
    /// Shortest lease accepted.
    pub const MIN_TTL: Duration = Duration::from_millis(100);

    /// Creates a config renewing three times per `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            refresh_interval: ttl / 3,
        }
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Rules:
    /// - `ttl` raised to at least [`Self::MIN_TTL`].
    /// - `refresh_interval` capped to `ttl / 2` so a single late renewal
    ///   does not expire a live client, and raised from zero to `ttl / 3`.
    pub fn validated(mut self) -> Self {
        if self.ttl < Self::MIN_TTL {
            warn!(
                ttl_ms = self.ttl.as_millis() as u64,
                min_ms = Self::MIN_TTL.as_millis() as u64,
                "lease ttl below minimum, raising"
            );
            self.ttl = Self::MIN_TTL;
        }
        let max_refresh = self.ttl / 2;
        if self.refresh_interval.is_zero() {
            self.refresh_interval = self.ttl / 3;
        } else if self.refresh_interval > max_refresh {
            warn!(
                refresh_ms = self.refresh_interval.as_millis() as u64,
                ttl_ms = self.ttl.as_millis() as u64,
                "lease refresh interval too close to ttl, clamping to ttl/2"
            );
            self.refresh_interval = max_refresh;
        }
        self
    }

    /// The expiry timestamp for a lease renewed at `now_ms`.
    pub fn expiry_from(&self, now_ms: u64) -> u64 {
        now_ms.saturating_add(self.ttl.as_millis() as u64)
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Configuration for a [`Heartbeat`].
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Delay between beats.
    pub interval: Duration,
    /// Random delay (0..max) added to the *first* beat so clients that
    /// joined together do not renew in lockstep.
    pub initial_jitter: Duration,
}

impl HeartbeatConfig {
    /// A heartbeat with the given interval and 10% initial jitter.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            initial_jitter: interval / 10,
        }
    }
}

/// Information about a beat, returned by [`Heartbeat::wait_for_beat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatInfo {
    /// Monotonically increasing beat number (starts at 1).
    pub beat: u64,
    /// `true` if this beat fired late (the task was starved).
    pub late: bool,
    /// How many whole intervals were skipped because of the delay.
    pub beats_skipped: u64,
}

/// Fixed-interval scheduler for lease renewals.
///
/// A late beat never causes a burst of catch-up beats: the next one is
/// scheduled a full interval after the late one. Renewing a lease twice
/// in a row gains nothing.
pub struct Heartbeat {
    interval: Duration,
    next_beat: TokioInstant,
    beat_count: u64,
    paused: bool,
    total_late: u64,
}

impl Heartbeat {
    /// Create a new heartbeat. The first beat fires after one interval
    /// plus jitter. A zero interval is raised to one millisecond.
    pub fn new(config: HeartbeatConfig) -> Self {
        let interval = config.interval.max(Duration::from_millis(1));
        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_us = config.initial_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..max_us.max(1)))
        };

        debug!(
            interval_ms = interval.as_millis() as u64,
            jitter_us = jitter.as_micros() as u64,
            "heartbeat created"
        );

        Self {
            interval,
            next_beat: TokioInstant::now() + interval + jitter,
            beat_count: 0,
            paused: false,
            total_late: 0,
        }
    }

    /// Wait until the next beat is due.
    ///
    /// While paused, this future pends forever; `tokio::select!` will
    /// still process other branches.
    pub async fn wait_for_beat(&mut self) -> BeatInfo {
        if self.paused {
            std::future::pending::<()>().await;
        }

        let due = self.next_beat;
        time::sleep_until(due).await;

        let now = TokioInstant::now();
        self.beat_count += 1;

        let late_by = now.saturating_duration_since(due);
        let late = late_by > self.interval / 10;
        let beats_skipped = if late {
            (late_by.as_nanos() / self.interval.as_nanos()) as u64
        } else {
            0
        };
        if late {
            self.total_late += 1;
            warn!(
                beat = self.beat_count,
                late_ms = late_by.as_secs_f64() * 1000.0,
                skipped = beats_skipped,
                "heartbeat fired late"
            );
        }

        self.next_beat = now + self.interval;
        trace!(beat = self.beat_count, late, "heartbeat");

        BeatInfo {
            beat: self.beat_count,
            late,
            beats_skipped,
        }
    }

    /// Pause beats. Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(beat = self.beat_count, "heartbeat paused");
        }
    }

    /// Resume beats; the next one fires a full interval from now.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next_beat = TokioInstant::now() + self.interval;
            debug!(beat = self.beat_count, "heartbeat resumed");
        }
    }

    /// Whether the heartbeat is currently paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Beats fired so far.
    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    /// Beats that fired late so far.
    pub fn late_count(&self) -> u64 {
        self.total_late
    }

    /// The configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_default_leaves_room_for_missed_refresh() {
        let cfg = LeaseConfig::default();
        assert!(cfg.refresh_interval * 2 <= cfg.ttl);
        assert_eq!(cfg.validated(), cfg);
    }

    #[test]
    fn test_lease_validated_clamps_refresh_to_half_ttl() {
        let cfg = LeaseConfig {
            ttl: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(9),
        }
        .validated();
        assert_eq!(cfg.refresh_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_lease_validated_raises_tiny_ttl_and_zero_refresh() {
        let cfg = LeaseConfig {
            ttl: Duration::ZERO,
            refresh_interval: Duration::ZERO,
        }
        .validated();
        assert_eq!(cfg.ttl, LeaseConfig::MIN_TTL);
        assert!(!cfg.refresh_interval.is_zero());
        assert!(cfg.refresh_interval <= cfg.ttl / 2);
    }

    #[test]
    fn test_expiry_from_adds_ttl_and_saturates() {
        let cfg = LeaseConfig::with_ttl(Duration::from_secs(3));
        assert_eq!(cfg.expiry_from(1_000), 4_000);
        assert_eq!(cfg.expiry_from(u64::MAX), u64::MAX);
    }
}
