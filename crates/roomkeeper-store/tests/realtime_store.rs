//! Integration tests: several clients sharing one in-memory store.

use roomkeeper_protocol::{PresenceEntry, PresenceSet, RoomId, StorePath, UserId, encode_entry};
use roomkeeper_store::{MemoryRealtimeStore, RealtimeStore};

fn rid(id: &str) -> RoomId {
    RoomId::new(id).unwrap()
}

fn uid(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

async fn mark_online(conn: &impl RealtimeStore, room: &RoomId, user: &UserId) {
    let path = StorePath::presence(room, user);
    conn.on_disconnect_delete(&path).await.unwrap();
    let entry = PresenceEntry::online(room.clone(), user.clone(), user.as_str(), 1);
    conn.write(&path, encode_entry(&entry).unwrap()).await.unwrap();
}

#[tokio::test]
async fn test_observer_sees_other_clients_come_and_go() {
    let store = MemoryRealtimeStore::new();
    let observer = store.connect();
    let alice = store.connect();
    let bob = store.connect();
    let room = rid("r1");

    let mut sub = observer
        .watch(&StorePath::online_users(&room))
        .await
        .unwrap();

    mark_online(&alice, &room, &uid("alice")).await;
    mark_online(&bob, &room, &uid("bob")).await;
    sub.changed().await.unwrap();
    let set = PresenceSet::from_value(room.clone(), sub.borrow_and_update().as_ref(), 1);
    assert_eq!(set.users(), vec![uid("alice"), uid("bob")]);

    drop(alice);
    sub.changed().await.unwrap();
    let set = PresenceSet::from_value(room.clone(), sub.borrow_and_update().as_ref(), 1);
    assert_eq!(set.users(), vec![uid("bob")]);

    bob.disconnect();
    sub.changed().await.unwrap();
    let set = PresenceSet::from_value(room.clone(), sub.borrow_and_update().as_ref(), 1);
    assert!(set.is_empty());
}

#[tokio::test]
async fn test_rewrite_of_same_key_does_not_duplicate() {
    let store = MemoryRealtimeStore::new();
    let alice = store.connect();
    let room = rid("r1");

    mark_online(&alice, &room, &uid("alice")).await;
    mark_online(&alice, &room, &uid("alice")).await;

    let value = store.peek(&StorePath::online_users(&room));
    let set = PresenceSet::from_value(room, value.as_ref(), 1);
    assert_eq!(set.len(), 1);
    assert_eq!(store.directive_count(alice.connection_id()), 1);
}
