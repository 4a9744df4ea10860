//! Error types for the session layer.

/// Errors that can occur while signing in or out.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The provider rejected the sign-in (cancelled popup, bad credentials,
    /// blocked account).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The provider could not end the session.
    #[error("sign-out failed: {0}")]
    SignOutFailed(String),

    /// The provider could not report whether a session already exists.
    #[error("session restore failed: {0}")]
    RestoreFailed(String),

    /// An operation needs a signed-in user and there is none.
    #[error("no user is signed in")]
    NotSignedIn,
}
