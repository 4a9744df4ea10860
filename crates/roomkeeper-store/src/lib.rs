//! Store abstraction layer for roomkeeper.
//!
//! Provides the [`RealtimeStore`] and [`RecordStore`] traits that stand in
//! for the managed backend: an ephemeral JSON tree with push subscriptions
//! and server-side disconnect directives, and a durable document store for
//! room records.
//!
//! Both are passed into the room layer as explicit dependencies, so tests
//! and alternative backends plug in without touching the core.
//!
//! # Feature Flags
//!
//! - `memory` (default) — in-process implementations with fault injection

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "memory")]
mod fault;
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "memory")]
mod records;

pub use error::StoreError;
#[cfg(feature = "memory")]
pub use fault::FaultKind;
#[cfg(feature = "memory")]
pub use memory::{MemoryConnection, MemoryRealtimeStore};
#[cfg(feature = "memory")]
pub use records::MemoryRecordStore;

use std::fmt;
use std::future::Future;

use roomkeeper_protocol::{RoomId, RoomRecord, StorePath};
use serde_json::Value;
use tokio::sync::watch;

/// Opaque identifier for a client's connection to the realtime store.
///
/// Disconnect directives are bound to the connection that registered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The store operation an error or injected fault refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Read,
    Write,
    Delete,
    OnDisconnect,
    CancelOnDisconnect,
    Watch,
    Put,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::OnDisconnect => "on-disconnect",
            Self::CancelOnDisconnect => "cancel-on-disconnect",
            Self::Watch => "watch",
            Self::Put => "put",
        };
        f.write_str(name)
    }
}

/// A live subscription to one path of the realtime store.
///
/// Holds the latest observed value (`None` when the node is absent).
/// Bursts of updates coalesce: a slow reader sees the newest value, not
/// every intermediate one. Dropping the receiver ends the subscription.
pub type Subscription = watch::Receiver<Option<Value>>;

/// One client's connection to the ephemeral realtime store.
///
/// The store is a JSON tree addressed by [`StorePath`]. Writes are
/// last-write-wins per path. Deleting an absent path succeeds.
pub trait RealtimeStore: Send + Sync + 'static {
    /// One-shot read of the value at `path`. `None` if absent.
    fn read(
        &self,
        path: &StorePath,
    ) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Replaces the subtree at `path` with `value`.
    fn write(
        &self,
        path: &StorePath,
        value: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes the subtree at `path`. Succeeds if nothing is there.
    fn delete(
        &self,
        path: &StorePath,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Asks the server to delete `path` when this connection drops.
    ///
    /// Once this returns `Ok`, the deletion is guaranteed server-side and
    /// no longer depends on the client being alive.
    fn on_disconnect_delete(
        &self,
        path: &StorePath,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Disarms a directive registered with
    /// [`on_disconnect_delete`](Self::on_disconnect_delete).
    fn cancel_on_disconnect(
        &self,
        path: &StorePath,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Subscribes to the value at `path`.
    ///
    /// The returned receiver already holds the current value and is
    /// notified on every subsequent change.
    fn watch(
        &self,
        path: &StorePath,
    ) -> impl Future<Output = Result<Subscription, StoreError>> + Send;

    /// The connection directives are bound to.
    fn connection_id(&self) -> ConnectionId;
}

/// The durable store that holds room records.
pub trait RecordStore: Send + Sync + 'static {
    /// Fetches a room record.
    fn get(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<Option<RoomRecord>, StoreError>> + Send;

    /// Creates or replaces a room record.
    fn put(
        &self,
        record: RoomRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes a room record.
    ///
    /// Returns [`StoreError::NotFound`] if there was nothing to delete;
    /// callers that need idempotence treat that as success.
    fn delete(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns `true` if a record exists for `room_id`.
    fn exists(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        async move { Ok(self.get(room_id).await?.is_some()) }
    }
}
