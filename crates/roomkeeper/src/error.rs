//! Unified error type for roomkeeper.

use roomkeeper_protocol::ProtocolError;
use roomkeeper_room::{LifecycleError, PresenceError};
use roomkeeper_session::SessionError;
use roomkeeper_store::StoreError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RoomkeeperError {
    /// Invalid ids, paths or stored values.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A store round-trip failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Sign-in state problems, including "not signed in".
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Joining or leaving a room failed.
    #[error(transparent)]
    Presence(#[from] PresenceError),

    /// A lifecycle controller could not be reached or started.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The configuration could not be parsed or serialized.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
