//! Error types for the room layer.

use roomkeeper_protocol::{ProtocolError, RoomId, UserId};
use roomkeeper_store::StoreError;

/// Errors surfaced by the presence channel.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// The disconnect directive could not be armed, so the join was
    /// rolled back.
    #[error("could not arm disconnect cleanup for {user_id} in room {room_id}: {source}")]
    DirectiveFailed {
        room_id: RoomId,
        user_id: UserId,
        #[source]
        source: StoreError,
    },

    /// A store round-trip failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The entry could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl PresenceError {
    /// Returns `true` if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DirectiveFailed { source, .. } | Self::Store(source) => source.is_retryable(),
            Self::Protocol(_) => false,
        }
    }
}

/// Errors from lifecycle controllers and their manager.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The room is not being watched.
    #[error("room {0} is not watched")]
    NotWatched(RoomId),

    /// The room's controller has stopped or its command channel is full.
    #[error("lifecycle controller for room {0} is unavailable")]
    Unavailable(RoomId),

    /// Subscribing to the room's presence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
