//! Lifecycle configuration and the room phase state machine.

use std::time::Duration;

use roomkeeper_lease::LeaseConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LifecycleConfig
// ---------------------------------------------------------------------------

/// Configuration for room lifecycle controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a room must stay empty before its record is deleted.
    ///
    /// The default (5 s) absorbs page reloads: the reloading client's
    /// entry disappears and reappears within the window.
    ///
    /// `Duration::ZERO` deletes as soon as an empty presence set is
    /// observed, with no timer. Simpler, but a user who refreshes the page
    /// while alone in a room loses the room.
    pub grace_period: Duration,

    /// Also delete the room's ephemeral node (`rooms/{room}`) after the
    /// record is gone.
    ///
    /// The node is only purged if a fresh read right before the purge is
    /// still empty. A join landing between that read and the delete can
    /// still lose its entry; its directive stays armed and removes
    /// nothing.
    pub purge_ephemeral_node: bool,

    /// Capacity of each controller's command channel.
    pub command_channel_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            purge_ephemeral_node: true,
            command_channel_size: 16,
        }
    }
}

impl LifecycleConfig {
    /// The "last one out deletes" variant.
    pub fn immediate() -> Self {
        Self {
            grace_period: Duration::ZERO,
            ..Self::default()
        }
    }

    /// A config with the given grace period and other defaults.
    pub fn with_grace(grace_period: Duration) -> Self {
        Self {
            grace_period,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// CleanupMode
// ---------------------------------------------------------------------------

/// How a presence entry is removed when its owner vanishes without
/// leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CleanupMode {
    /// The store deletes the entry when the owner's connection drops.
    #[default]
    DisconnectDirective,

    /// The entry carries a lease the owner keeps renewing; readers ignore
    /// it once the lease runs out. For stores without disconnect hooks.
    Lease(LeaseConfig),
}

// ---------------------------------------------------------------------------
// RoomPhase
// ---------------------------------------------------------------------------

/// The lifecycle phase of a watched room.
///
/// ```text
/// Active ──(empty)──→ Draining ──(still empty at re-check)──→ Deleted
///    ↑                   │
///    └──(occupied / re-check failed / delete failed)
/// ```
///
/// - **Active**: someone is present, or the last deletion attempt was
///   abandoned.
/// - **Draining**: the room was observed empty; a deletion check is
///   pending.
/// - **Deleted**: the record is gone. Terminal; the controller stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomPhase {
    Active,
    Draining,
    Deleted,
}

impl RoomPhase {
    /// Returns `true` if moving to `target` is a valid transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Active, Self::Draining)
                | (Self::Draining, Self::Active)
                | (Self::Draining, Self::Deleted)
        )
    }

    /// Returns `true` once the room is gone.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl std::fmt::Display for RoomPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Draining => write!(f, "Draining"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_phase_transitions() {
        assert!(RoomPhase::Active.can_transition_to(RoomPhase::Draining));
        assert!(RoomPhase::Draining.can_transition_to(RoomPhase::Active));
        assert!(RoomPhase::Draining.can_transition_to(RoomPhase::Deleted));
        assert!(!RoomPhase::Active.can_transition_to(RoomPhase::Deleted));
        assert!(!RoomPhase::Deleted.can_transition_to(RoomPhase::Active));
        assert!(!RoomPhase::Active.can_transition_to(RoomPhase::Active));
    }

    #[test]
    fn test_room_phase_terminal_and_display() {
        assert!(RoomPhase::Deleted.is_terminal());
        assert!(!RoomPhase::Draining.is_terminal());
        assert_eq!(RoomPhase::Draining.to_string(), "Draining");
    }

    #[test]
    fn test_lifecycle_config_defaults() {
        let config = LifecycleConfig::default();
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert!(config.purge_ephemeral_node);
        assert_eq!(LifecycleConfig::immediate().grace_period, Duration::ZERO);
    }

    #[test]
    fn test_cleanup_mode_json_shape() {
        let json = serde_json::to_value(CleanupMode::DisconnectDirective).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "disconnect_directive" }));

        let lease: CleanupMode = serde_json::from_value(serde_json::json!({
            "kind": "lease",
            "ttl": { "secs": 30, "nanos": 0 },
            "refresh_interval": { "secs": 10, "nanos": 0 },
        }))
        .unwrap();
        assert_eq!(lease, CleanupMode::Lease(LeaseConfig::default()));
    }
}
