//! Stored values: presence entries and room records.

use serde::{Deserialize, Serialize};

use crate::{RoomId, UserId};

// ---------------------------------------------------------------------------
// PresenceEntry
// ---------------------------------------------------------------------------

/// A user's "online" marker in one room.
///
/// Lives in the realtime store at `rooms/{room_id}/online_users/{user_id}`.
/// The ids are part of the path, so only the remaining fields are stored
/// in the value (see [`encode_entry`](crate::encode_entry)).
///
/// Exactly one entry exists per `(room_id, user_id)`; writing it again
/// replaces the previous value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub display_name: String,
    pub online: bool,
    /// Wall-clock milliseconds since the Unix epoch at join time.
    pub last_changed: u64,
    /// When the lease runs out, in epoch milliseconds.
    ///
    /// `None` when the entry is guarded by a disconnect directive instead
    /// of a lease.
    pub lease_expires_at: Option<u64>,
}

impl PresenceEntry {
    /// Creates an online entry stamped with `now_ms`.
    pub fn online(
        room_id: RoomId,
        user_id: UserId,
        display_name: impl Into<String>,
        now_ms: u64,
    ) -> Self {
        Self {
            room_id,
            user_id,
            display_name: display_name.into(),
            online: true,
            last_changed: now_ms,
            lease_expires_at: None,
        }
    }

    /// Returns `true` if the entry carries a lease that ran out at or
    /// before `now_ms`. Entries without a lease never expire.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.lease_expires_at, Some(expiry) if expiry <= now_ms)
    }
}

// ---------------------------------------------------------------------------
// RoomRecord
// ---------------------------------------------------------------------------

/// The durable record of a room.
///
/// Created when a room is created (outside this workspace) and deleted by
/// the lifecycle controller once the room has been empty for the grace
/// period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub room_id: RoomId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    pub created_at: u64,
}

impl RoomRecord {
    /// Creates a record with no recorded creator.
    pub fn new(room_id: RoomId, name: impl Into<String>, created_at: u64) -> Self {
        Self {
            room_id,
            name: name.into(),
            created_by: None,
            created_at,
        }
    }
}
