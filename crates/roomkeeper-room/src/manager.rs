//! Lifecycle manager: starts, tracks, and stops room controllers.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use roomkeeper_protocol::{Clock, RoomId, SystemClock};
use roomkeeper_store::{RealtimeStore, RecordStore};

use crate::lifecycle::spawn_controller;
use crate::{EventSender, LifecycleConfig, LifecycleError, RoomPhase, RoomWatchHandle};

/// Runs at most one lifecycle controller per room.
///
/// This is the entry point for lifecycle operations from the client layer.
/// Controllers that finished on their own (room deleted, subscription
/// closed) are pruned lazily.
pub struct LifecycleManager<S: RealtimeStore, R: RecordStore, C: Clock = SystemClock> {
    store: Arc<S>,
    records: Arc<R>,
    clock: Arc<C>,
    config: LifecycleConfig,
    controllers: HashMap<RoomId, RoomWatchHandle>,
    events: Option<EventSender>,
}

impl<S: RealtimeStore, R: RecordStore> LifecycleManager<S, R> {
    /// Creates a manager on the system clock.
    pub fn new(store: Arc<S>, records: Arc<R>, config: LifecycleConfig) -> Self {
        Self::with_clock(store, records, Arc::new(SystemClock), config)
    }
}

impl<S: RealtimeStore, R: RecordStore, C: Clock> LifecycleManager<S, R, C> {
    /// Creates a manager with an explicit clock.
    pub fn with_clock(
        store: Arc<S>,
        records: Arc<R>,
        clock: Arc<C>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            records,
            clock,
            config,
            controllers: HashMap::new(),
            events: None,
        }
    }

    /// Publishes every controller decision on `events`.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// The configuration new controllers start with.
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Starts watching `room_id`. A no-op if it is already watched.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] if the presence subscription
    /// cannot be opened.
    pub async fn watch_room(&mut self, room_id: &RoomId) -> Result<(), LifecycleError> {
        self.prune();
        if self.controllers.contains_key(room_id) {
            tracing::debug!(%room_id, "room already watched");
            return Ok(());
        }

        let handle = spawn_controller(
            room_id.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.records),
            Arc::clone(&self.clock),
            self.config,
            self.events.clone(),
        )
        .await?;
        self.controllers.insert(room_id.clone(), handle);
        tracing::info!(%room_id, watched = self.controllers.len(), "watching room");
        Ok(())
    }

    /// Stops watching `room_id`. Returns `false` if it was not watched.
    pub async fn unwatch_room(&mut self, room_id: &RoomId) -> bool {
        match self.controllers.remove(room_id) {
            Some(handle) => {
                handle.shutdown().await;
                tracing::info!(%room_id, "stopped watching room");
                true
            }
            None => false,
        }
    }

    /// The phase of a watched room.
    pub async fn phase(&self, room_id: &RoomId) -> Result<RoomPhase, LifecycleError> {
        let handle = self
            .controllers
            .get(room_id)
            .ok_or_else(|| LifecycleError::NotWatched(room_id.clone()))?;
        handle.phase().await
    }

    /// Returns `true` if a live controller watches `room_id`.
    pub fn is_watching(&self, room_id: &RoomId) -> bool {
        self.controllers
            .get(room_id)
            .is_some_and(RoomWatchHandle::is_running)
    }

    /// The rooms with a live controller, sorted.
    pub fn watched_rooms(&mut self) -> Vec<RoomId> {
        self.prune();
        let mut rooms: Vec<RoomId> = self.controllers.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Stops every controller and waits for them to exit.
    pub async fn shutdown(&mut self) {
        let handles: Vec<RoomWatchHandle> =
            self.controllers.drain().map(|(_, handle)| handle).collect();
        let count = handles.len();
        join_all(handles.iter().map(|handle| handle.shutdown())).await;
        tracing::info!(controllers = count, "lifecycle manager shut down");
    }

    fn prune(&mut self) {
        self.controllers.retain(|room_id, handle| {
            let running = handle.is_running();
            if !running {
                tracing::debug!(%room_id, "pruning finished controller");
            }
            running
        });
    }
}
