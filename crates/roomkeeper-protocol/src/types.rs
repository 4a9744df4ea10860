//! Identity and path types.
//!
//! Room and user identifiers end up as segments of store paths
//! (`rooms/{room}/online_users/{user}`), so both are validated on
//! construction: an id that contains a `/` would silently address a
//! different node in the tree.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Characters that cannot appear in a key segment.
///
/// `/` separates segments; the rest are reserved by hosted realtime
/// stores and rejected here so ids stay portable between backends.
const FORBIDDEN_KEY_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Maximum length of a single key segment, in bytes.
const MAX_KEY_LEN: usize = 768;

fn validate_key(raw: &str) -> Result<(), ProtocolError> {
    if raw.is_empty() {
        return Err(ProtocolError::InvalidId(raw.to_string(), "empty"));
    }
    if raw.len() > MAX_KEY_LEN {
        return Err(ProtocolError::InvalidId(raw.to_string(), "too long"));
    }
    if raw.contains(FORBIDDEN_KEY_CHARS) || raw.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidId(
            raw.to_string(),
            "contains a reserved character",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a user, as issued by the identity provider.
///
/// Newtype over `String` so a `RoomId` can never be passed where a
/// `UserId` is expected. Serialized as the bare string.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Creates a user id, rejecting values that are not valid key segments.
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        validate_key(&id)?;
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// A unique identifier for a room.
///
/// Same newtype pattern as [`UserId`]. The room id is chosen by whoever
/// creates the room (out of scope here) and is shared by every member.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Creates a room id, rejecting values that are not valid key segments.
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        validate_key(&id)?;
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// StorePath
// ---------------------------------------------------------------------------

/// A slash-separated location in the realtime store tree.
///
/// The layout used by roomkeeper:
///
/// ```text
/// rooms/
///   {room_id}/
///     online_users/
///       {user_id}: { "name": ..., "online": true, "lastChanged": ... }
/// ```
///
/// Paths never start or end with a slash and never contain empty
/// segments. The empty path is the root of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath(String);

impl StorePath {
    /// Top-level node that holds every room.
    pub const ROOMS: &'static str = "rooms";

    /// Child of a room node that holds its presence entries.
    pub const ONLINE_USERS: &'static str = "online_users";

    /// The root of the tree.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parses a path string such as `"rooms/r1/online_users"`.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if raw.is_empty() {
            return Ok(Self::root());
        }
        if raw.split('/').any(str::is_empty) {
            return Err(ProtocolError::InvalidPath(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// `rooms/{room}` — the whole ephemeral node of a room.
    pub fn room(room_id: &RoomId) -> Self {
        Self(format!("{}/{}", Self::ROOMS, room_id))
    }

    /// `rooms/{room}/online_users` — the presence set of a room.
    pub fn online_users(room_id: &RoomId) -> Self {
        Self(format!("{}/{}/{}", Self::ROOMS, room_id, Self::ONLINE_USERS))
    }

    /// `rooms/{room}/online_users/{user}` — one user's presence entry.
    pub fn presence(room_id: &RoomId, user_id: &UserId) -> Self {
        Self(format!(
            "{}/{}/{}/{}",
            Self::ROOMS,
            room_id,
            Self::ONLINE_USERS,
            user_id
        ))
    }

    /// Appends a segment. The segment must not contain `/`.
    pub fn child(&self, segment: &str) -> Result<Self, ProtocolError> {
        if segment.is_empty() || segment.contains('/') {
            return Err(ProtocolError::InvalidPath(segment.to_string()));
        }
        if self.is_root() {
            Ok(Self(segment.to_string()))
        } else {
            Ok(Self(format!("{}/{}", self.0, segment)))
        }
    }

    /// Returns `true` for the empty root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the path's segments (none for the root).
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Returns `true` if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &StorePath) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Returns `true` if the two paths are equal or one contains the other.
    ///
    /// A write at either path can change the value observed at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self == other || self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.0)
        }
    }
}
