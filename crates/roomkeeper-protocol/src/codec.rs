//! Conversion between model types and store values.
//!
//! The realtime store holds a JSON tree, so every stored value is a
//! `serde_json::Value`. The presence value keeps the field names the web
//! client has always written (`name`, `online`, `lastChanged`), so old
//! and new clients can share a room.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PresenceEntry, ProtocolError, RoomId, RoomRecord, UserId};

/// The stored shape of a presence entry (ids live in the path).
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryValue {
    name: String,
    online: bool,
    last_changed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease_expires_at: Option<u64>,
}

/// Encodes a presence entry into the value stored at its path.
pub fn encode_entry(entry: &PresenceEntry) -> Result<Value, ProtocolError> {
    let value = EntryValue {
        name: entry.display_name.clone(),
        online: entry.online,
        last_changed: entry.last_changed,
        lease_expires_at: entry.lease_expires_at,
    };
    serde_json::to_value(value).map_err(ProtocolError::Encode)
}

/// Decodes the value stored at `rooms/{room_id}/online_users/{user_id}`.
pub fn decode_entry(
    room_id: &RoomId,
    user_id: &UserId,
    value: &Value,
) -> Result<PresenceEntry, ProtocolError> {
    let stored = EntryValue::deserialize(value).map_err(ProtocolError::Decode)?;
    Ok(PresenceEntry {
        room_id: room_id.clone(),
        user_id: user_id.clone(),
        display_name: stored.name,
        online: stored.online,
        last_changed: stored.last_changed,
        lease_expires_at: stored.lease_expires_at,
    })
}

/// Encodes a room record for the durable store.
pub fn encode_record(record: &RoomRecord) -> Result<Value, ProtocolError> {
    serde_json::to_value(record).map_err(ProtocolError::Encode)
}

/// Decodes a room record from the durable store.
pub fn decode_record(value: &Value) -> Result<RoomRecord, ProtocolError> {
    RoomRecord::deserialize(value).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ids() -> (RoomId, UserId) {
        (RoomId::new("r1").unwrap(), UserId::new("alice").unwrap())
    }

    #[test]
    fn test_encode_entry_uses_web_client_field_names() {
        let (room, user) = ids();
        let entry = PresenceEntry::online(room, user, "Alice", 1_700_000_000_000);

        let value = encode_entry(&entry).unwrap();

        assert_eq!(
            value,
            json!({ "name": "Alice", "online": true, "lastChanged": 1_700_000_000_000u64 })
        );
    }

    #[test]
    fn test_encode_entry_includes_lease_when_present() {
        let (room, user) = ids();
        let mut entry = PresenceEntry::online(room, user, "Alice", 10);
        entry.lease_expires_at = Some(40);

        let value = encode_entry(&entry).unwrap();
        assert_eq!(value["leaseExpiresAt"], json!(40));
    }

    #[test]
    fn test_decode_entry_accepts_value_written_by_web_client() {
        let (room, user) = ids();
        let value = json!({ "name": "Alice", "online": true, "lastChanged": 99 });

        let entry = decode_entry(&room, &user, &value).unwrap();

        assert_eq!(entry.display_name, "Alice");
        assert_eq!(entry.last_changed, 99);
        assert_eq!(entry.lease_expires_at, None);
        assert_eq!(entry.user_id, user);
    }

    #[test]
    fn test_decode_entry_rejects_wrong_shape() {
        let (room, user) = ids();
        let result = decode_entry(&room, &user, &json!({ "online": "yes" }));
        assert!(matches!(result, Err(ProtocolError::Decode(_))));

        let result = decode_entry(&room, &user, &json!(true));
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_record_rejects_invalid_room_id() {
        let value = json!({ "roomId": "a/b", "name": "x", "createdAt": 1 });
        assert!(decode_record(&value).is_err());
    }
}
