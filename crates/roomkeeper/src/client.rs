//! `RoomClient` builder and the client-side room operations.
//!
//! This is the entry point for applications. It ties the layers together:
//! session → presence → lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use roomkeeper_protocol::{Clock, PresenceEntry, PresenceSet, RoomId, SystemClock, UserId};
use roomkeeper_room::{
    CleanupMode, EventSender, LeaseReaper, LifecycleConfig, LifecycleManager, PresenceChannel,
    RoomPhase,
};
use roomkeeper_session::{IdentityProvider, Session, SessionError, SessionManager};
use roomkeeper_store::{RealtimeStore, RecordStore};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::{RoomkeeperConfig, RoomkeeperError};

/// Builder for configuring a [`RoomClient`].
///
/// # Example
///
/// ```rust,ignore
/// use roomkeeper::prelude::*;
///
/// let client = RoomClientBuilder::new()
///     .grace_period(Duration::ZERO)
///     .build(my_provider, Arc::new(store.connect()), records)
///     .await;
/// ```
#[derive(Default)]
pub struct RoomClientBuilder {
    config: RoomkeeperConfig,
    events: Option<EventSender>,
}

impl RoomClientBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: RoomkeeperConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the lifecycle configuration.
    pub fn lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.config.lifecycle = lifecycle;
        self
    }

    /// Sets how long an empty room survives before deletion.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.config.lifecycle.grace_period = grace_period;
        self
    }

    /// Sets how presence entries are cleaned up after a crash.
    pub fn cleanup_mode(mut self, mode: CleanupMode) -> Self {
        self.config.cleanup = mode;
        self
    }

    /// Sets the lease reaper's sweep interval.
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.config.reaper_interval = interval;
        self
    }

    /// Forwards every lifecycle decision to `events`.
    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Builds the client on the system clock.
    pub async fn build<P, S, R>(
        self,
        provider: P,
        store: Arc<S>,
        records: Arc<R>,
    ) -> RoomClient<P, S, R>
    where
        P: IdentityProvider,
        S: RealtimeStore,
        R: RecordStore,
    {
        self.build_with_clock(provider, store, records, Arc::new(SystemClock))
            .await
    }

    /// Builds the client with an explicit clock.
    ///
    /// In lease mode this also starts the lease reaper on `store`.
    pub async fn build_with_clock<P, S, R, C>(
        self,
        provider: P,
        store: Arc<S>,
        records: Arc<R>,
        clock: Arc<C>,
    ) -> RoomClient<P, S, R, C>
    where
        P: IdentityProvider,
        S: RealtimeStore,
        R: RecordStore,
        C: Clock,
    {
        let config = self.config.validated();

        let presence =
            PresenceChannel::with_clock(Arc::clone(&store), Arc::clone(&clock), config.cleanup);

        let mut lifecycle = LifecycleManager::with_clock(
            Arc::clone(&store),
            records,
            Arc::clone(&clock),
            config.lifecycle,
        );
        if let Some(events) = self.events {
            lifecycle = lifecycle.with_events(events);
        }

        let reaper = match config.cleanup {
            CleanupMode::Lease(_) => {
                let handle = LeaseReaper::new(store, clock).spawn(config.reaper_interval);
                tracing::debug!(
                    interval_ms = config.reaper_interval.as_millis() as u64,
                    "lease reaper started"
                );
                Some(handle)
            }
            CleanupMode::DisconnectDirective => None,
        };

        RoomClient {
            session: SessionManager::new(provider),
            presence,
            lifecycle: Mutex::new(lifecycle),
            joined: Mutex::new(HashMap::new()),
            reaper,
            config,
        }
    }
}

/// A signed-in user's view of the room system.
///
/// Owns one store connection. Entering a room publishes the user's
/// presence and starts watching the room, so this client takes part in
/// deleting it once everyone is gone.
pub struct RoomClient<P, S, R, C = SystemClock>
where
    P: IdentityProvider,
    S: RealtimeStore,
    R: RecordStore,
    C: Clock,
{
    session: SessionManager<P>,
    presence: PresenceChannel<S, C>,
    lifecycle: Mutex<LifecycleManager<S, R, C>>,
    /// Rooms this client entered, and as whom.
    joined: Mutex<HashMap<RoomId, UserId>>,
    reaper: Option<JoinHandle<()>>,
    config: RoomkeeperConfig,
}

impl<P, S, R, C> RoomClient<P, S, R, C>
where
    P: IdentityProvider,
    S: RealtimeStore,
    R: RecordStore,
    C: Clock,
{
    /// The session manager.
    pub fn session(&self) -> &SessionManager<P> {
        &self.session
    }

    /// The presence channel.
    pub fn presence(&self) -> &PresenceChannel<S, C> {
        &self.presence
    }

    /// The effective (validated) configuration.
    pub fn config(&self) -> &RoomkeeperConfig {
        &self.config
    }

    /// Resolves the initial sign-in state.
    pub async fn init(&self) -> Result<Option<Session>, RoomkeeperError> {
        Ok(self.session.init().await?)
    }

    /// Signs in through the identity provider.
    pub async fn login(&self, provider_hint: &str) -> Result<Session, RoomkeeperError> {
        Ok(self.session.login(provider_hint).await?)
    }

    /// Leaves every entered room, then signs out.
    ///
    /// Leave failures are logged and do not block the sign-out; the
    /// disconnect directive or lease still cleans those entries up.
    pub async fn logout(&self) -> Result<(), RoomkeeperError> {
        let joined: Vec<(RoomId, UserId)> = self.joined.lock().await.drain().collect();
        for (room_id, user_id) in &joined {
            if let Err(e) = self.presence.leave(room_id, user_id).await {
                tracing::warn!(%room_id, %user_id, error = %e, "leave on logout failed");
            }
        }
        self.session.logout().await?;
        Ok(())
    }

    /// Enters a room as the signed-in user and starts watching it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotSignedIn`] if nobody is signed in.
    /// - [`RoomkeeperError::Presence`] if the presence entry could not be
    ///   published safely.
    ///
    /// A failure to start the room's lifecycle controller is only logged:
    /// the user is in the room either way.
    pub async fn enter_room(&self, room_id: &RoomId) -> Result<PresenceEntry, RoomkeeperError> {
        let session = self.session.current_user().ok_or(SessionError::NotSignedIn)?;

        let entry = self
            .presence
            .join(room_id, &session.user_id, &session.display_name)
            .await?;
        self.joined
            .lock()
            .await
            .insert(room_id.clone(), session.user_id.clone());

        // Watch after joining, so the controller's first look sees us.
        if let Err(e) = self.lifecycle.lock().await.watch_room(room_id).await {
            tracing::warn!(%room_id, error = %e, "room lifecycle not watched");
        }
        Ok(entry)
    }

    /// Leaves a room. Idempotent.
    ///
    /// The room stays watched, so this client deletes it if it was the
    /// last one out.
    pub async fn leave_room(&self, room_id: &RoomId) -> Result<(), RoomkeeperError> {
        let joined_as = self.joined.lock().await.get(room_id).cloned();
        let user_id = match joined_as {
            Some(user_id) => user_id,
            None => {
                self.session
                    .current_user()
                    .ok_or(SessionError::NotSignedIn)?
                    .user_id
            }
        };
        self.presence.leave(room_id, &user_id).await?;
        // Only forget the room once the entry is gone, so a failed leave
        // is retried by `logout`.
        self.joined.lock().await.remove(room_id);
        Ok(())
    }

    /// The rooms this client has entered and not left.
    pub async fn joined_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.joined.lock().await.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// One-shot read of a room's presence set.
    pub async fn presence_set(&self, room_id: &RoomId) -> Result<PresenceSet, RoomkeeperError> {
        Ok(self.presence.presence_set(room_id).await?)
    }

    /// The lifecycle phase of a watched room.
    pub async fn room_phase(&self, room_id: &RoomId) -> Result<RoomPhase, RoomkeeperError> {
        Ok(self.lifecycle.lock().await.phase(room_id).await?)
    }

    /// The rooms with a running lifecycle controller.
    pub async fn watched_rooms(&self) -> Vec<RoomId> {
        self.lifecycle.lock().await.watched_rooms()
    }

    /// Stops the reaper and every lifecycle controller.
    ///
    /// Presence entries are left to the disconnect directive or lease.
    pub async fn shutdown(&self) {
        if let Some(reaper) = &self.reaper {
            reaper.abort();
        }
        self.lifecycle.lock().await.shutdown().await;
    }
}

impl<P, S, R, C> Drop for RoomClient<P, S, R, C>
where
    P: IdentityProvider,
    S: RealtimeStore,
    R: RecordStore,
    C: Clock,
{
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
    }
}
