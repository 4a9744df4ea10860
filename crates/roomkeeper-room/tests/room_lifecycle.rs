//! Integration tests: presence and lifecycle controllers sharing one
//! in-memory store.
//!
//! Every client gets its own store connection. Dropping or disconnecting a
//! connection fires its disconnect directives, the way a closed browser
//! tab would.
//!
//! Uses `start_paused = true`: the grace-period timers resolve as soon as
//! the runtime is idle, so `elapsed()` reports virtual time exactly.

use std::sync::Arc;
use std::time::Duration;

use roomkeeper_lease::LeaseConfig;
use roomkeeper_protocol::{
    ManualClock, PresenceEntry, RoomId, RoomRecord, StorePath, UserId, encode_entry,
};
use roomkeeper_room::{
    CancelReason, CleanupMode, DeleteOutcome, LeaseReaper, LifecycleConfig, LifecycleEvent,
    LifecycleManager, PresenceChannel, RoomPhase,
};
use roomkeeper_store::{
    FaultKind, MemoryConnection, MemoryRealtimeStore, MemoryRecordStore, RealtimeStore,
    RecordStore, StoreOp,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

// -- Helpers ---------------------------------------------------------------

fn rid(id: &str) -> RoomId {
    RoomId::new(id).unwrap()
}

fn uid(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

struct Harness {
    store: MemoryRealtimeStore,
    records: Arc<MemoryRecordStore>,
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
    events_tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl Harness {
    async fn new() -> Self {
        let records = Arc::new(MemoryRecordStore::new());
        records.put(RoomRecord::new(rid("r1"), "Standup", 0)).await.unwrap();
        records.put(RoomRecord::new(rid("r2"), "Retro", 0)).await.unwrap();
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            store: MemoryRealtimeStore::new(),
            records,
            events,
            events_tx,
        }
    }

    /// A client with its own connection, using disconnect directives.
    fn client(&self) -> PresenceChannel<MemoryConnection> {
        PresenceChannel::new(Arc::new(self.store.connect()), CleanupMode::DisconnectDirective)
    }

    /// A lifecycle manager on its own observer connection.
    fn manager(&self, config: LifecycleConfig) -> LifecycleManager<MemoryConnection, MemoryRecordStore> {
        LifecycleManager::new(Arc::new(self.store.connect()), Arc::clone(&self.records), config)
            .with_events(self.events_tx.clone())
    }

    async fn next_event(&mut self) -> LifecycleEvent {
        tokio::time::timeout(Duration::from_secs(600), self.events.recv())
            .await
            .expect("timed out waiting for a lifecycle event")
            .expect("event channel closed")
    }

    async fn record_exists(&self, room: &str) -> bool {
        self.records.exists(&rid(room)).await.unwrap()
    }
}

// =========================================================================
// Presence set
// =========================================================================

#[tokio::test]
async fn test_presence_set_tracks_join_leave_and_disconnect() {
    let h = Harness::new().await;
    let observer = h.client();
    let alice = h.client();
    let bob = h.client();
    let carol = h.client();
    let room = rid("r1");

    alice.join(&room, &uid("alice"), "Alice").await.unwrap();
    bob.join(&room, &uid("bob"), "Bob").await.unwrap();
    carol.join(&room, &uid("carol"), "Carol").await.unwrap();
    assert_eq!(observer.presence_set(&room).await.unwrap().len(), 3);

    bob.leave(&room, &uid("bob")).await.unwrap();
    carol.store().disconnect();

    let set = observer.presence_set(&room).await.unwrap();
    assert_eq!(set.users(), vec![uid("alice")]);
}

#[tokio::test]
async fn test_rejoin_on_new_connection_replaces_entry() {
    let h = Harness::new().await;
    let observer = h.client();
    let first_tab = h.client();
    let room = rid("r1");

    first_tab.join(&room, &uid("alice"), "Alice").await.unwrap();
    let second_tab = h.client();
    second_tab.join(&room, &uid("alice"), "Alice").await.unwrap();

    assert_eq!(observer.presence_set(&room).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_directive_leaves_no_ghost_after_crash() {
    let h = Harness::new().await;
    let observer = h.client();
    let alice = h.client();
    let room = rid("r1");

    h.store.fail_next(StoreOp::OnDisconnect, FaultKind::Transient);
    assert!(alice.join(&room, &uid("alice"), "Alice").await.is_err());
    drop(alice);

    assert!(observer.presence_set(&room).await.unwrap().is_empty());
}

// =========================================================================
// Deletion after the grace period
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_last_user_disconnect_deletes_room_after_grace() {
    let mut h = Harness::new().await;
    let alice = h.client();
    alice.join(&rid("r1"), &uid("alice"), "Alice").await.unwrap();
    let mut mgr = h.manager(LifecycleConfig::default());
    mgr.watch_room(&rid("r1")).await.unwrap();
    assert_eq!(mgr.phase(&rid("r1")).await.unwrap(), RoomPhase::Active);

    let start = Instant::now();
    alice.store().disconnect();

    assert_eq!(
        h.next_event().await,
        LifecycleEvent::DeletionScheduled {
            room_id: rid("r1"),
            grace_period: Duration::from_secs(5),
        }
    );
    assert_eq!(
        h.next_event().await,
        LifecycleEvent::RoomDeleted {
            room_id: rid("r1"),
            outcome: DeleteOutcome::Deleted,
        }
    );
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert!(!h.record_exists("r1").await);
    assert!(h.record_exists("r2").await, "other rooms are untouched");
}

#[tokio::test(start_paused = true)]
async fn test_room_with_remaining_user_is_kept() {
    let mut h = Harness::new().await;
    let alice = h.client();
    let bob = h.client();
    alice.join(&rid("r2"), &uid("alice"), "Alice").await.unwrap();
    bob.join(&rid("r2"), &uid("bob"), "Bob").await.unwrap();
    let mut mgr = h.manager(LifecycleConfig::default());
    mgr.watch_room(&rid("r2")).await.unwrap();

    drop(alice);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(h.events.try_recv().is_err(), "no deletion should be scheduled");
    assert!(h.record_exists("r2").await);
    assert_eq!(mgr.phase(&rid("r2")).await.unwrap(), RoomPhase::Active);
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_within_grace_cancels_deletion() {
    let mut h = Harness::new().await;
    let alice = h.client();
    alice.join(&rid("r1"), &uid("alice"), "Alice").await.unwrap();
    let mut mgr = h.manager(LifecycleConfig::default());
    mgr.watch_room(&rid("r1")).await.unwrap();

    // Page reload: the old tab's connection drops, a new one joins.
    drop(alice);
    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::DeletionScheduled { .. }
    ));
    tokio::time::sleep(Duration::from_secs(2)).await;
    let reloaded = h.client();
    reloaded.join(&rid("r1"), &uid("alice"), "Alice").await.unwrap();

    assert_eq!(
        h.next_event().await,
        LifecycleEvent::DeletionCancelled {
            room_id: rid("r1"),
            reason: CancelReason::Rejoined,
        }
    );
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.record_exists("r1").await);
    assert_eq!(mgr.phase(&rid("r1")).await.unwrap(), RoomPhase::Active);
}

#[tokio::test(start_paused = true)]
async fn test_new_empty_observation_resets_deadline() {
    let mut h = Harness::new().await;
    let alice = h.client();
    let writer = h.store.connect();
    alice.join(&rid("r1"), &uid("alice"), "Alice").await.unwrap();
    let mut mgr = h.manager(LifecycleConfig::default());
    mgr.watch_room(&rid("r1")).await.unwrap();

    let start = Instant::now();
    drop(alice);
    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::DeletionScheduled { .. }
    ));

    // A stale entry whose lease ran out long ago: the set is still empty,
    // but it is a new observation.
    tokio::time::sleep(Duration::from_secs(3)).await;
    let mut stale = PresenceEntry::online(rid("r1"), uid("ghost"), "Ghost", 1);
    stale.lease_expires_at = Some(2);
    writer
        .write(
            &StorePath::presence(&rid("r1"), &uid("ghost")),
            encode_entry(&stale).unwrap(),
        )
        .await
        .unwrap();

    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::DeletionScheduled { .. }
    ));
    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::RoomDeleted { .. }
    ));
    assert_eq!(start.elapsed(), Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn test_zero_grace_deletes_immediately() {
    let mut h = Harness::new().await;
    let alice = h.client();
    alice.join(&rid("r1"), &uid("alice"), "Alice").await.unwrap();
    let mut mgr = h.manager(LifecycleConfig::immediate());
    mgr.watch_room(&rid("r1")).await.unwrap();

    let start = Instant::now();
    alice.leave(&rid("r1"), &uid("alice")).await.unwrap();

    assert_eq!(
        h.next_event().await,
        LifecycleEvent::RoomDeleted {
            room_id: rid("r1"),
            outcome: DeleteOutcome::Deleted,
        }
    );
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(!h.record_exists("r1").await);
}

#[tokio::test(start_paused = true)]
async fn test_deletion_purges_ephemeral_room_node() {
    let mut h = Harness::new().await;
    let alice = h.client();
    alice.join(&rid("r1"), &uid("alice"), "Alice").await.unwrap();
    alice
        .store()
        .write(&StorePath::room(&rid("r1")).child("topic").unwrap(), json!("planning"))
        .await
        .unwrap();
    let mut mgr = h.manager(LifecycleConfig::immediate());
    mgr.watch_room(&rid("r1")).await.unwrap();

    alice.leave(&rid("r1"), &uid("alice")).await.unwrap();

    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::RoomDeleted { .. }
    ));
    assert_eq!(h.store.peek(&StorePath::room(&rid("r1"))), None);
    assert!(mgr.watched_rooms().is_empty(), "controller stops after deleting");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_controllers_delete_once() {
    let mut h = Harness::new().await;
    let alice = h.client();
    alice.join(&rid("r1"), &uid("alice"), "Alice").await.unwrap();
    let mut first = h.manager(LifecycleConfig::default());
    let mut second = h.manager(LifecycleConfig::default());
    first.watch_room(&rid("r1")).await.unwrap();
    second.watch_room(&rid("r1")).await.unwrap();

    alice.store().disconnect();

    let mut outcomes = Vec::new();
    while outcomes.len() < 2 {
        if let LifecycleEvent::RoomDeleted { outcome, .. } = h.next_event().await {
            outcomes.push(outcome);
        }
    }
    outcomes.sort_by_key(|outcome| *outcome == DeleteOutcome::AlreadyGone);
    assert_eq!(outcomes, vec![DeleteOutcome::Deleted, DeleteOutcome::AlreadyGone]);
    assert_eq!(h.records.deletion_count(), 1);
}

// =========================================================================
// Failure handling
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_recheck_read_failure_keeps_room() {
    let mut h = Harness::new().await;
    let alice = h.client();
    alice.join(&rid("r1"), &uid("alice"), "Alice").await.unwrap();
    let mut mgr = h.manager(LifecycleConfig::default());
    mgr.watch_room(&rid("r1")).await.unwrap();

    h.store.fail_next(StoreOp::Read, FaultKind::Transient);
    alice.store().disconnect();

    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::DeletionScheduled { .. }
    ));
    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::DeletionAborted { .. }
    ));
    assert!(h.record_exists("r1").await);
    assert_eq!(h.records.deletion_count(), 0);
    assert_eq!(mgr.phase(&rid("r1")).await.unwrap(), RoomPhase::Active);
}

#[tokio::test(start_paused = true)]
async fn test_record_delete_failure_is_not_retried_and_controller_survives() {
    let mut h = Harness::new().await;
    let alice = h.client();
    alice.join(&rid("r1"), &uid("alice"), "Alice").await.unwrap();
    let mut mgr = h.manager(LifecycleConfig::default());
    mgr.watch_room(&rid("r1")).await.unwrap();

    h.records.fail_next(StoreOp::Delete, FaultKind::PermissionDenied);
    drop(alice);

    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::DeletionScheduled { .. }
    ));
    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::DeletionFailed { .. }
    ));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.events.try_recv().is_err(), "no retry");
    assert!(h.record_exists("r1").await);
    assert!(mgr.is_watching(&rid("r1")));

    // The next empty observation gets a fresh attempt.
    let bob = h.client();
    bob.join(&rid("r1"), &uid("bob"), "Bob").await.unwrap();
    bob.leave(&rid("r1"), &uid("bob")).await.unwrap();
    loop {
        if let LifecycleEvent::RoomDeleted { outcome, .. } = h.next_event().await {
            assert_eq!(outcome, DeleteOutcome::Deleted);
            break;
        }
    }
    assert!(!h.record_exists("r1").await);
}

// =========================================================================
// Lease mode
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_expired_lease_is_reaped_and_room_deleted() {
    let mut h = Harness::new().await;
    let clock = Arc::new(ManualClock::new(1_000_000));
    let lease = LeaseConfig::with_ttl(Duration::from_secs(3));
    let alice = PresenceChannel::with_clock(
        Arc::new(h.store.connect()),
        Arc::clone(&clock),
        CleanupMode::Lease(lease),
    );
    alice.join(&rid("r1"), &uid("alice"), "Alice").await.unwrap();

    let observer = Arc::new(h.store.connect());
    let mut mgr = LifecycleManager::with_clock(
        Arc::clone(&observer),
        Arc::clone(&h.records),
        Arc::clone(&clock),
        LifecycleConfig::default(),
    )
    .with_events(h.events_tx.clone());
    mgr.watch_room(&rid("r1")).await.unwrap();
    let reaper = LeaseReaper::new(Arc::clone(&observer), Arc::clone(&clock));

    // The client dies without leaving; no directive exists in lease mode.
    drop(alice);
    assert_eq!(reaper.sweep().await.unwrap(), 0, "lease still valid");

    clock.advance(Duration::from_secs(4));
    assert_eq!(reaper.sweep().await.unwrap(), 1);

    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::DeletionScheduled { .. }
    ));
    assert!(matches!(
        h.next_event().await,
        LifecycleEvent::RoomDeleted { .. }
    ));
    assert!(!h.record_exists("r1").await);
}
