//! The parsed view of a room's `online_users` node.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::{PresenceEntry, RoomId, UserId, decode_entry};

/// Who is currently present in a room.
///
/// Built from the raw value at `rooms/{room}/online_users`. Two rules keep
/// the emptiness check on the safe side:
///
/// - Entries whose lease has expired are dropped; their owner stopped
///   refreshing and counts as gone.
/// - Children that cannot be decoded are kept as `unreadable`. They still
///   make the set non-empty, because a room should never be deleted on the
///   strength of data we failed to understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSet {
    room_id: RoomId,
    entries: BTreeMap<UserId, PresenceEntry>,
    unreadable: BTreeSet<String>,
}

impl PresenceSet {
    /// An empty set for `room_id`.
    pub fn empty(room_id: RoomId) -> Self {
        Self {
            room_id,
            entries: BTreeMap::new(),
            unreadable: BTreeSet::new(),
        }
    }

    /// Parses the value observed at the room's `online_users` path.
    ///
    /// `None` (node absent) yields an empty set. A non-object value is
    /// recorded as a single unreadable child.
    pub fn from_value(room_id: RoomId, value: Option<&Value>, now_ms: u64) -> Self {
        let mut set = Self::empty(room_id);

        let children = match value {
            None | Some(Value::Null) => return set,
            Some(Value::Object(children)) => children,
            Some(_) => {
                set.unreadable.insert(String::new());
                return set;
            }
        };

        for (key, child) in children {
            let user_id = match UserId::new(key.as_str()) {
                Ok(id) => id,
                Err(_) => {
                    set.unreadable.insert(key.clone());
                    continue;
                }
            };
            match decode_entry(&set.room_id, &user_id, child) {
                Ok(entry) if entry.is_expired(now_ms) => {}
                Ok(entry) => {
                    set.entries.insert(user_id, entry);
                }
                Err(_) => {
                    set.unreadable.insert(key.clone());
                }
            }
        }

        set
    }

    /// The room this set belongs to.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// `true` when nobody is present, readable or not.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.unreadable.is_empty()
    }

    /// Number of present children, including unreadable ones.
    pub fn len(&self) -> usize {
        self.entries.len() + self.unreadable.len()
    }

    /// Returns `true` if the user has a live entry.
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.entries.contains_key(user_id)
    }

    /// Looks up a user's entry.
    pub fn get(&self, user_id: &UserId) -> Option<&PresenceEntry> {
        self.entries.get(user_id)
    }

    /// Iterates over decoded entries in user-id order.
    pub fn entries(&self) -> impl Iterator<Item = &PresenceEntry> {
        self.entries.values()
    }

    /// The ids of users with a live, decoded entry.
    pub fn users(&self) -> Vec<UserId> {
        self.entries.keys().cloned().collect()
    }

    /// Raw keys of children that could not be decoded.
    pub fn unreadable(&self) -> impl Iterator<Item = &str> {
        self.unreadable.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rid() -> RoomId {
        RoomId::new("r1").unwrap()
    }

    fn uid(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[test]
    fn test_from_value_absent_is_empty() {
        let set = PresenceSet::from_value(rid(), None, 0);
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_from_value_collects_entries() {
        let value = json!({
            "alice": { "name": "Alice", "online": true, "lastChanged": 1 },
            "bob": { "name": "Bob", "online": true, "lastChanged": 2 },
        });

        let set = PresenceSet::from_value(rid(), Some(&value), 10);

        assert_eq!(set.len(), 2);
        assert!(set.contains(&uid("alice")));
        assert_eq!(set.get(&uid("bob")).unwrap().display_name, "Bob");
        assert_eq!(set.users(), vec![uid("alice"), uid("bob")]);
    }

    #[test]
    fn test_from_value_drops_expired_leases() {
        let value = json!({
            "alice": { "name": "Alice", "online": true, "lastChanged": 1, "leaseExpiresAt": 100 },
            "bob": { "name": "Bob", "online": true, "lastChanged": 1, "leaseExpiresAt": 500 },
        });

        let set = PresenceSet::from_value(rid(), Some(&value), 200);

        assert!(!set.contains(&uid("alice")));
        assert!(set.contains(&uid("bob")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_from_value_keeps_unreadable_children_present() {
        let value = json!({ "ghost": "not-an-entry" });

        let set = PresenceSet::from_value(rid(), Some(&value), 0);

        assert!(!set.is_empty(), "garbage must not look like an empty room");
        assert_eq!(set.unreadable().collect::<Vec<_>>(), vec!["ghost"]);
    }

    #[test]
    fn test_from_value_scalar_root_is_not_empty() {
        let set = PresenceSet::from_value(rid(), Some(&json!(7)), 0);
        assert!(!set.is_empty());
    }
}
