//! Room lifecycle controller: an actor that deletes a room once it has
//! stayed empty for the grace period.
//!
//! Each watched room gets its own Tokio task. The task owns the room's
//! presence subscription and a pending-deletion deadline, and talks to the
//! outside world only through an mpsc command channel and an optional
//! event channel. No state is shared.
//!
//! ## The deletion race
//!
//! "Empty" is only ever a snapshot. Between seeing an empty set and
//! deleting the record, someone may rejoin. The controller therefore:
//!
//! 1. schedules a check `grace_period` after the *latest* empty
//!    observation (a new empty observation resets the deadline, a
//!    non-empty one cancels it),
//! 2. re-reads the presence set from the store when the deadline passes,
//!    rather than trusting its cached view, and
//! 3. deletes the record only if that fresh read is still empty.
//!
//! Any failure along the way keeps the room.

use std::sync::Arc;
use std::time::Duration;

use roomkeeper_protocol::{Clock, PresenceSet, RoomId, StorePath};
use roomkeeper_store::{RealtimeStore, RecordStore, StoreError, Subscription};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::{LifecycleConfig, LifecycleError, RoomPhase};

// ---------------------------------------------------------------------------
// Record deletion
// ---------------------------------------------------------------------------

/// What happened when a room record was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// This call removed the record.
    Deleted,
    /// The record was already gone (another client got there first).
    AlreadyGone,
}

/// Deletes a room record, treating "not found" as success.
///
/// Several clients may observe the same empty room and race to delete it;
/// every one of them gets `Ok`.
pub async fn delete_room_record<R: RecordStore>(
    records: &R,
    room_id: &RoomId,
) -> Result<DeleteOutcome, StoreError> {
    match records.delete(room_id).await {
        Ok(()) => Ok(DeleteOutcome::Deleted),
        Err(e) if e.is_not_found() => {
            tracing::debug!(%room_id, "room record already deleted");
            Ok(DeleteOutcome::AlreadyGone)
        }
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Why a pending deletion was called off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Someone showed up during the grace period.
    Rejoined,
    /// The re-check read found the room occupied.
    OccupiedAtRecheck,
}

/// A decision taken by a lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The room was seen empty; a check is due after `grace_period`.
    DeletionScheduled {
        room_id: RoomId,
        grace_period: Duration,
    },
    /// A pending deletion was called off.
    DeletionCancelled {
        room_id: RoomId,
        reason: CancelReason,
    },
    /// The re-check read failed, so the room was kept.
    DeletionAborted { room_id: RoomId, error: String },
    /// The record is gone. The controller stops after this.
    RoomDeleted {
        room_id: RoomId,
        outcome: DeleteOutcome,
    },
    /// Deleting the record failed. Not retried; the room is kept.
    DeletionFailed { room_id: RoomId, error: String },
}

impl LifecycleEvent {
    /// The room this event is about.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::DeletionScheduled { room_id, .. }
            | Self::DeletionCancelled { room_id, .. }
            | Self::DeletionAborted { room_id, .. }
            | Self::RoomDeleted { room_id, .. }
            | Self::DeletionFailed { room_id, .. } => room_id,
        }
    }
}

/// Where controllers publish their events.
pub type EventSender = mpsc::UnboundedSender<LifecycleEvent>;

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Commands sent to a controller through its channel.
pub(crate) enum LifecycleCommand {
    /// Report the current phase.
    GetPhase { reply: oneshot::Sender<RoomPhase> },
    /// Stop watching. Any pending deletion is dropped.
    Shutdown,
}

/// Handle to a running lifecycle controller.
///
/// Cheap to clone. The controller stops on [`shutdown`](Self::shutdown),
/// after deleting the room, or once every handle is dropped.
#[derive(Clone)]
pub struct RoomWatchHandle {
    room_id: RoomId,
    sender: mpsc::Sender<LifecycleCommand>,
}

impl RoomWatchHandle {
    /// The watched room.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Returns `true` while the controller task is alive.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Asks the controller for the room's phase.
    pub async fn phase(&self) -> Result<RoomPhase, LifecycleError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(LifecycleCommand::GetPhase { reply: reply_tx })
            .await
            .map_err(|_| LifecycleError::Unavailable(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| LifecycleError::Unavailable(self.room_id.clone()))
    }

    /// Stops the controller and waits for it to exit. Succeeds if it has
    /// already stopped.
    pub async fn shutdown(&self) {
        if self.sender.send(LifecycleCommand::Shutdown).await.is_ok() {
            self.sender.closed().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Subscribes to `room_id`'s presence and spawns its controller.
pub(crate) async fn spawn_controller<S, R, C>(
    room_id: RoomId,
    store: Arc<S>,
    records: Arc<R>,
    clock: Arc<C>,
    config: LifecycleConfig,
    events: Option<EventSender>,
) -> Result<RoomWatchHandle, LifecycleError>
where
    S: RealtimeStore,
    R: RecordStore,
    C: Clock,
{
    let presence = store.watch(&StorePath::online_users(&room_id)).await?;
    let (sender, receiver) = mpsc::channel(config.command_channel_size.max(1));

    let controller = RoomController {
        room_id: room_id.clone(),
        phase: RoomPhase::Active,
        config,
        deadline: None,
        presence,
        store,
        records,
        clock,
        events,
        receiver,
    };
    tokio::spawn(controller.run());

    Ok(RoomWatchHandle { room_id, sender })
}

/// The controller state. Runs inside a Tokio task.
struct RoomController<S, R, C> {
    room_id: RoomId,
    phase: RoomPhase,
    config: LifecycleConfig,
    /// When the pending deletion check is due. `None` = nothing pending.
    deadline: Option<Instant>,
    presence: Subscription,
    store: Arc<S>,
    records: Arc<R>,
    clock: Arc<C>,
    events: Option<EventSender>,
    receiver: mpsc::Receiver<LifecycleCommand>,
}

impl<S: RealtimeStore, R: RecordStore, C: Clock> RoomController<S, R, C> {
    async fn run(mut self) {
        tracing::info!(
            room_id = %self.room_id,
            grace_ms = self.config.grace_period.as_millis() as u64,
            "lifecycle controller started"
        );

        // The snapshot delivered with the subscription counts as the first
        // notification.
        let initial = self.presence.borrow_and_update().clone();
        self.observe(initial).await;

        while !self.phase.is_terminal() {
            let deadline = self.deadline;
            tokio::select! {
                changed = self.presence.changed() => {
                    if changed.is_err() {
                        tracing::warn!(room_id = %self.room_id, "presence subscription closed");
                        break;
                    }
                    let value = self.presence.borrow_and_update().clone();
                    self.observe(value).await;
                }
                _ = sleep_until(deadline) => {
                    self.deadline = None;
                    self.recheck_and_delete().await;
                }
                cmd = self.receiver.recv() => match cmd {
                    Some(LifecycleCommand::GetPhase { reply }) => {
                        let _ = reply.send(self.phase);
                    }
                    Some(LifecycleCommand::Shutdown) | None => {
                        tracing::info!(room_id = %self.room_id, "lifecycle controller shutting down");
                        break;
                    }
                },
            }
        }

        tracing::info!(room_id = %self.room_id, phase = %self.phase, "lifecycle controller stopped");
    }

    /// Reacts to one presence notification.
    async fn observe(&mut self, value: Option<Value>) {
        let set = self.decode(value.as_ref());

        if !set.is_empty() {
            if self.phase == RoomPhase::Draining {
                self.deadline = None;
                self.transition(RoomPhase::Active);
                tracing::info!(
                    room_id = %self.room_id,
                    present = set.len(),
                    "room occupied again, deletion cancelled"
                );
                self.emit(LifecycleEvent::DeletionCancelled {
                    room_id: self.room_id.clone(),
                    reason: CancelReason::Rejoined,
                });
            }
            return;
        }

        if self.phase == RoomPhase::Active {
            self.transition(RoomPhase::Draining);
        }

        let grace_period = self.config.grace_period;
        if grace_period.is_zero() {
            self.recheck_and_delete().await;
            return;
        }

        let rescheduled = self.deadline.is_some();
        self.deadline = Some(Instant::now() + grace_period);
        tracing::debug!(
            room_id = %self.room_id,
            rescheduled,
            grace_ms = grace_period.as_millis() as u64,
            "room empty, deletion check scheduled"
        );
        self.emit(LifecycleEvent::DeletionScheduled {
            room_id: self.room_id.clone(),
            grace_period,
        });
    }

    /// Confirms the room is still empty with a fresh read, then deletes
    /// the record.
    async fn recheck_and_delete(&mut self) {
        let path = StorePath::online_users(&self.room_id);
        let value = match self.store.read(&path).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    room_id = %self.room_id,
                    error = %e,
                    "presence re-check failed, keeping room"
                );
                self.transition(RoomPhase::Active);
                self.emit(LifecycleEvent::DeletionAborted {
                    room_id: self.room_id.clone(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let set = self.decode(value.as_ref());
        if !set.is_empty() {
            tracing::debug!(
                room_id = %self.room_id,
                present = set.len(),
                "room occupied at re-check, keeping it"
            );
            self.transition(RoomPhase::Active);
            self.emit(LifecycleEvent::DeletionCancelled {
                room_id: self.room_id.clone(),
                reason: CancelReason::OccupiedAtRecheck,
            });
            return;
        }

        match delete_room_record(&*self.records, &self.room_id).await {
            Ok(outcome) => {
                self.transition(RoomPhase::Deleted);
                tracing::info!(room_id = %self.room_id, ?outcome, "room deleted");
                if self.config.purge_ephemeral_node {
                    self.purge_ephemeral_node().await;
                }
                self.emit(LifecycleEvent::RoomDeleted {
                    room_id: self.room_id.clone(),
                    outcome,
                });
            }
            Err(e) => {
                tracing::error!(
                    room_id = %self.room_id,
                    error = %e,
                    "room record deletion failed, not retrying"
                );
                self.transition(RoomPhase::Active);
                self.emit(LifecycleEvent::DeletionFailed {
                    room_id: self.room_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn purge_ephemeral_node(&self) {
        match purge_room_node(&*self.store, &self.room_id, self.clock.now_millis()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(room_id = %self.room_id, "room rejoined after deletion, node kept");
            }
            Err(e) => {
                tracing::debug!(room_id = %self.room_id, error = %e, "ephemeral room node not purged");
            }
        }
    }

    fn decode(&self, value: Option<&Value>) -> PresenceSet {
        let set = PresenceSet::from_value(self.room_id.clone(), value, self.clock.now_millis());
        for key in set.unreadable() {
            tracing::warn!(room_id = %self.room_id, key, "unreadable presence entry counted as present");
        }
        set
    }

    fn transition(&mut self, to: RoomPhase) {
        if !self.phase.can_transition_to(to) {
            return;
        }
        tracing::debug!(room_id = %self.room_id, from = %self.phase, %to, "room phase changed");
        self.phase = to;
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Deletes `rooms/{room}` if its presence set is still empty.
///
/// Returns `false` when someone joined since the re-check; their entry
/// and its directive are left untouched.
async fn purge_room_node<S: RealtimeStore>(
    store: &S,
    room_id: &RoomId,
    now_millis: u64,
) -> Result<bool, StoreError> {
    let value = store.read(&StorePath::online_users(room_id)).await?;
    let set = PresenceSet::from_value(room_id.clone(), value.as_ref(), now_millis);
    if !set.is_empty() {
        return Ok(false);
    }
    store.delete(&StorePath::room(room_id)).await?;
    Ok(true)
}

/// Sleeps until `deadline`, or forever if there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
