//! Presence and room lifecycle management for roomkeeper.
//!
//! Two cooperating pieces:
//!
//! - [`PresenceChannel`] — marks this client's user as online in a room,
//!   guarded by a disconnect directive (or a lease) so a crashed client
//!   cannot leave a ghost entry behind.
//! - [`LifecycleManager`] — runs one controller actor per watched room.
//!   Each controller observes the room's presence set and deletes the
//!   room record once the room has stayed empty for the grace period.
//!
//! # Key types
//!
//! - [`LifecycleConfig`] — grace period (zero = delete immediately)
//! - [`CleanupMode`] — disconnect directive vs. lease
//! - [`RoomPhase`] — `Active → Draining → Deleted` state machine
//! - [`LifecycleEvent`] — what a controller decided, for observers
//! - [`LeaseReaper`] — sweeps expired lease entries in lease mode

mod config;
mod error;
mod lifecycle;
mod manager;
mod presence;
mod reaper;

pub use config::{CleanupMode, LifecycleConfig, RoomPhase};
pub use error::{LifecycleError, PresenceError};
pub use lifecycle::{
    CancelReason, DeleteOutcome, EventSender, LifecycleEvent, RoomWatchHandle,
    delete_room_record,
};
pub use manager::LifecycleManager;
pub use presence::{PresenceChannel, PresenceWatch};
pub use reaper::LeaseReaper;
