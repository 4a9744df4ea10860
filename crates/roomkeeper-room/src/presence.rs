//! The presence channel: marking a user online in a room.
//!
//! An entry lives at `rooms/{room}/online_users/{user}`. The hard part is
//! not writing it but making sure it goes away when the owner vanishes
//! without saying goodbye. Two strategies, picked by [`CleanupMode`]:
//!
//! - **Disconnect directive**: before the entry is written, the store is
//!   told to delete it when this connection drops. The directive is armed
//!   first so there is never a window where the entry exists unguarded.
//! - **Lease**: the entry carries `leaseExpiresAt` and a background task
//!   renews it. Readers treat expired entries as absent and a
//!   [`LeaseReaper`](crate::LeaseReaper) deletes them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use roomkeeper_lease::{Heartbeat, HeartbeatConfig, LeaseConfig};
use roomkeeper_protocol::{
    Clock, PresenceEntry, PresenceSet, RoomId, StorePath, SystemClock, UserId, encode_entry,
};
use roomkeeper_store::{RealtimeStore, StoreError, Subscription};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::{CleanupMode, PresenceError};

/// Publishes this client's presence and reads everyone else's.
///
/// One channel per store connection. Directives are bound to the
/// connection, so the channel and the connection should live and die
/// together.
pub struct PresenceChannel<S: RealtimeStore, C: Clock = SystemClock> {
    store: Arc<S>,
    clock: Arc<C>,
    mode: CleanupMode,
    /// Lease renewal tasks, keyed by entry path.
    heartbeats: Mutex<HashMap<StorePath, JoinHandle<()>>>,
}

impl<S: RealtimeStore> PresenceChannel<S> {
    /// Creates a channel on the system clock.
    pub fn new(store: Arc<S>, mode: CleanupMode) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), mode)
    }
}

impl<S: RealtimeStore, C: Clock> PresenceChannel<S, C> {
    /// Creates a channel with an explicit clock.
    pub fn with_clock(store: Arc<S>, clock: Arc<C>, mode: CleanupMode) -> Self {
        let mode = match mode {
            CleanupMode::Lease(lease) => CleanupMode::Lease(lease.validated()),
            other => other,
        };
        Self {
            store,
            clock,
            mode,
            heartbeats: Mutex::new(HashMap::new()),
        }
    }

    /// The cleanup strategy in use.
    pub fn mode(&self) -> CleanupMode {
        self.mode
    }

    /// The underlying store connection.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Marks `user_id` as online in `room_id`.
    ///
    /// Joining again replaces the previous entry; a user never appears
    /// twice in a room.
    ///
    /// # Errors
    ///
    /// - [`PresenceError::DirectiveFailed`] if the disconnect directive
    ///   could not be armed. The entry is not left behind.
    /// - [`PresenceError::Store`] if the entry write fails. Any entry at the
    ///   path is removed, then the directive is disarmed. If the removal
    ///   fails the directive stays armed.
    pub async fn join(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        display_name: &str,
    ) -> Result<PresenceEntry, PresenceError> {
        let path = StorePath::presence(room_id, user_id);
        let now = self.clock.now_millis();
        let mut entry =
            PresenceEntry::online(room_id.clone(), user_id.clone(), display_name, now);

        match self.mode {
            CleanupMode::DisconnectDirective => {
                let value = encode_entry(&entry)?;

                if let Err(source) = self.store.on_disconnect_delete(&path).await {
                    warn!(
                        %room_id, %user_id, error = %source,
                        "disconnect directive not armed, rolling back join"
                    );
                    // A previous join may have left an entry here that is
                    // no longer guarded.
                    if let Err(e) = self.store.delete(&path).await {
                        warn!(%room_id, %user_id, error = %e, "rollback delete failed");
                    }
                    return Err(PresenceError::DirectiveFailed {
                        room_id: room_id.clone(),
                        user_id: user_id.clone(),
                        source,
                    });
                }

                if let Err(e) = self.store.write(&path, value).await {
                    warn!(%room_id, %user_id, error = %e, "presence write failed");
                    // An earlier join's entry may still be stored here and
                    // relies on this directive. Only disarm once it is gone.
                    match self.store.delete(&path).await {
                        Ok(()) => {
                            if let Err(cancel) = self.store.cancel_on_disconnect(&path).await {
                                debug!(%room_id, %user_id, error = %cancel, "directive not disarmed");
                            }
                        }
                        Err(del) => {
                            warn!(
                                %room_id, %user_id, error = %del,
                                "stale entry not removed, keeping directive armed"
                            );
                        }
                    }
                    return Err(e.into());
                }
            }
            CleanupMode::Lease(lease) => {
                entry.lease_expires_at = Some(lease.expiry_from(now));
                let value = encode_entry(&entry)?;
                self.store.write(&path, value).await?;
                self.start_heartbeat(path, entry.clone(), lease);
            }
        }

        info!(%room_id, %user_id, connection = %self.store.connection_id(), "joined room");
        Ok(entry)
    }

    /// Removes `user_id` from `room_id`.
    ///
    /// Idempotent: succeeds if the entry is already gone, including when
    /// the connection has dropped and its directives already fired.
    pub async fn leave(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), PresenceError> {
        let path = StorePath::presence(room_id, user_id);
        self.stop_heartbeat(&path).await;

        match self.store.delete(&path).await {
            Ok(()) => {}
            Err(StoreError::ConnectionClosed(connection)) => {
                // Directives fired on drop; a lease just runs out.
                debug!(%room_id, %user_id, %connection, "connection closed, entry already cleaned up");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if self.mode == CleanupMode::DisconnectDirective {
            if let Err(e) = self.store.cancel_on_disconnect(&path).await {
                debug!(%room_id, %user_id, error = %e, "directive not disarmed");
            }
        }

        info!(%room_id, %user_id, "left room");
        Ok(())
    }

    /// One-shot read of a room's presence set. Expired leases are left out.
    pub async fn presence_set(&self, room_id: &RoomId) -> Result<PresenceSet, PresenceError> {
        let value = self.store.read(&StorePath::online_users(room_id)).await?;
        Ok(PresenceSet::from_value(
            room_id.clone(),
            value.as_ref(),
            self.clock.now_millis(),
        ))
    }

    /// Subscribes to a room's presence set.
    pub async fn watch(&self, room_id: &RoomId) -> Result<PresenceWatch<C>, PresenceError> {
        let subscription = self.store.watch(&StorePath::online_users(room_id)).await?;
        Ok(PresenceWatch {
            room_id: room_id.clone(),
            subscription,
            clock: Arc::clone(&self.clock),
        })
    }

    /// Number of running lease renewal tasks.
    pub fn active_leases(&self) -> usize {
        let mut heartbeats = self.heartbeats();
        heartbeats.retain(|_, task| !task.is_finished());
        heartbeats.len()
    }

    // -----------------------------------------------------------------------
    // Lease renewal
    // -----------------------------------------------------------------------

    fn heartbeats(&self) -> std::sync::MutexGuard<'_, HashMap<StorePath, JoinHandle<()>>> {
        self.heartbeats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_heartbeat(&self, path: StorePath, entry: PresenceEntry, lease: LeaseConfig) {
        let task = tokio::spawn(renew_lease(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            path.clone(),
            entry,
            lease,
        ));
        if let Some(previous) = self.heartbeats().insert(path, task) {
            previous.abort();
        }
    }

    /// Stops renewal and waits for the task to finish, so a late renewal
    /// cannot resurrect the entry after it is deleted.
    async fn stop_heartbeat(&self, path: &StorePath) {
        let task = self.heartbeats().remove(path);
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

impl<S: RealtimeStore, C: Clock> Drop for PresenceChannel<S, C> {
    fn drop(&mut self) {
        for (_, task) in self.heartbeats().drain() {
            task.abort();
        }
    }
}

async fn renew_lease<S: RealtimeStore, C: Clock>(
    store: Arc<S>,
    clock: Arc<C>,
    path: StorePath,
    mut entry: PresenceEntry,
    lease: LeaseConfig,
) {
    let mut heartbeat = Heartbeat::new(HeartbeatConfig::every(lease.refresh_interval));
    loop {
        let beat = heartbeat.wait_for_beat().await;
        entry.lease_expires_at = Some(lease.expiry_from(clock.now_millis()));
        let value = match encode_entry(&entry) {
            Ok(value) => value,
            Err(e) => {
                warn!(%path, error = %e, "lease entry not encodable, stopping renewal");
                return;
            }
        };
        match store.write(&path, value).await {
            Ok(()) => trace!(%path, beat = beat.beat, "lease renewed"),
            Err(StoreError::ConnectionClosed(connection)) => {
                debug!(%path, %connection, "connection closed, stopping lease renewal");
                return;
            }
            Err(e) => warn!(%path, error = %e, "lease renewal failed, will retry"),
        }
    }
}

// ---------------------------------------------------------------------------
// PresenceWatch
// ---------------------------------------------------------------------------

/// A live view of one room's presence set.
pub struct PresenceWatch<C: Clock = SystemClock> {
    room_id: RoomId,
    subscription: Subscription,
    clock: Arc<C>,
}

impl<C: Clock> PresenceWatch<C> {
    /// The room being watched.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The latest presence set, marking it as seen.
    pub fn current(&mut self) -> PresenceSet {
        let value = self.subscription.borrow_and_update().clone();
        PresenceSet::from_value(self.room_id.clone(), value.as_ref(), self.clock.now_millis())
    }

    /// Waits for the next change. `None` once the store stops publishing.
    pub async fn changed(&mut self) -> Option<PresenceSet> {
        self.subscription.changed().await.ok()?;
        Some(self.current())
    }
}
