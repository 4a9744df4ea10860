use roomkeeper_protocol::ProtocolError;

use crate::{ConnectionId, StoreOp};

/// Errors that can occur in the store layer.
///
/// The variants follow how callers are expected to react:
/// retry ([`Transient`](Self::Transient)), give up
/// ([`PermissionDenied`](Self::PermissionDenied)), or treat as done
/// ([`NotFound`](Self::NotFound) on a delete).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A network-level failure. Safe to retry.
    #[error("transient failure during {op}: {message}")]
    Transient { op: StoreOp, message: String },

    /// The store refused the operation.
    #[error("permission denied during {op}: {message}")]
    PermissionDenied { op: StoreOp, message: String },

    /// The addressed record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The caller's connection to the store has dropped.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// A stored value could not be encoded or decoded.
    #[error(transparent)]
    Encoding(#[from] ProtocolError),
}

impl StoreError {
    /// Returns `true` if repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns `true` for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
