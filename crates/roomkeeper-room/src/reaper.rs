//! Lease reaper: deletes presence entries whose lease ran out.
//!
//! Readers already ignore expired entries, but nothing would otherwise
//! *change* in the store when a lease lapses, so lifecycle controllers
//! would never be notified. Deleting the entry produces that notification.

use std::sync::Arc;
use std::time::Duration;

use roomkeeper_lease::{Heartbeat, HeartbeatConfig};
use roomkeeper_protocol::{Clock, RoomId, StorePath, UserId, decode_entry};
use roomkeeper_store::{RealtimeStore, StoreError};
use serde_json::Value;
use tokio::task::JoinHandle;

/// Periodically sweeps every room for expired leases.
///
/// A renewal racing with a sweep may lose its entry; the next renewal
/// writes it back.
pub struct LeaseReaper<S: RealtimeStore, C: Clock> {
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S: RealtimeStore, C: Clock> LeaseReaper<S, C> {
    pub fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Deletes every expired entry once. Returns how many were removed.
    ///
    /// Entries that cannot be decoded are left alone.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let rooms_path = StorePath::parse(StorePath::ROOMS)?;
        let Some(Value::Object(rooms)) = self.store.read(&rooms_path).await? else {
            return Ok(0);
        };

        let now = self.clock.now_millis();
        let mut expired = Vec::new();
        for (room_key, room) in &rooms {
            let Ok(room_id) = RoomId::new(room_key.as_str()) else {
                continue;
            };
            let Some(Value::Object(users)) = room.get(StorePath::ONLINE_USERS) else {
                continue;
            };
            for (user_key, value) in users {
                let Ok(user_id) = UserId::new(user_key.as_str()) else {
                    continue;
                };
                match decode_entry(&room_id, &user_id, value) {
                    Ok(entry) if entry.is_expired(now) => {
                        expired.push(StorePath::presence(&room_id, &user_id));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(%room_id, %user_id, error = %e, "skipping undecodable entry");
                    }
                }
            }
        }

        for path in &expired {
            self.store.delete(path).await?;
            tracing::info!(%path, "expired presence lease reaped");
        }
        Ok(expired.len())
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until the task is
    /// aborted or the connection closes.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut heartbeat = Heartbeat::new(HeartbeatConfig::every(interval));
            loop {
                heartbeat.wait_for_beat().await;
                match self.sweep().await {
                    Ok(0) => {}
                    Ok(reaped) => tracing::debug!(reaped, "lease sweep finished"),
                    Err(StoreError::ConnectionClosed(connection)) => {
                        tracing::debug!(%connection, "connection closed, lease reaper stopping");
                        return;
                    }
                    Err(e) => tracing::warn!(error = %e, "lease sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use roomkeeper_protocol::{ManualClock, PresenceEntry, encode_entry};
    use roomkeeper_store::{MemoryConnection, MemoryRealtimeStore};

    use super::*;

    async fn put(conn: &MemoryConnection, room: &str, user: &str, expires_at: Option<u64>) {
        let room_id = RoomId::new(room).unwrap();
        let user_id = UserId::new(user).unwrap();
        let mut entry = PresenceEntry::online(room_id.clone(), user_id.clone(), user, 0);
        entry.lease_expires_at = expires_at;
        conn.write(
            &StorePath::presence(&room_id, &user_id),
            encode_entry(&entry).unwrap(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_entries() {
        let store = MemoryRealtimeStore::new();
        let conn = Arc::new(store.connect());
        put(&conn, "r1", "a", Some(1_000)).await;
        put(&conn, "r1", "b", Some(9_000)).await;
        put(&conn, "r2", "c", Some(500)).await;
        put(&conn, "r2", "d", None).await;
        let reaper = LeaseReaper::new(Arc::clone(&conn), Arc::new(ManualClock::new(2_000)));

        assert_eq!(reaper.sweep().await.unwrap(), 2);

        let r1 = RoomId::new("r1").unwrap();
        let r2 = RoomId::new("r2").unwrap();
        assert!(store.peek(&StorePath::presence(&r1, &UserId::new("a").unwrap())).is_none());
        assert!(store.peek(&StorePath::presence(&r1, &UserId::new("b").unwrap())).is_some());
        assert!(store.peek(&StorePath::online_users(&r2)).is_some());
        assert_eq!(reaper.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_empty_store() {
        let store = MemoryRealtimeStore::new();
        let reaper = LeaseReaper::new(Arc::new(store.connect()), Arc::new(ManualClock::new(0)));
        assert_eq!(reaper.sweep().await.unwrap(), 0);
    }
}
