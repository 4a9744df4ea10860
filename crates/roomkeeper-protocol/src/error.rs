//! Error types for the protocol layer.

/// Errors that can occur while naming or encoding stored data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization into a store value failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// A store value did not have the expected shape.
    ///
    /// Common causes: a missing `name` field, `lastChanged` stored as a
    /// string, or a scalar where an object was expected.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// An identifier cannot be used as a store key segment.
    #[error("invalid id {0:?}: {1}")]
    InvalidId(String, &'static str),

    /// A path string is not a valid slash-separated store path.
    #[error("invalid store path {0:?}")]
    InvalidPath(String),
}
