//! Hook for the external identity provider.
//!
//! roomkeeper doesn't implement authentication itself. The popup flow,
//! token storage and refresh all belong to the hosted provider. The
//! [`IdentityProvider`] trait is the narrow surface the session manager
//! needs from it, so production code can wrap a real SDK while tests use
//! a scripted double.

use crate::{Session, SessionError};

/// The opaque auth service behind the session manager.
///
/// # Trait bounds
///
/// - `Send + Sync` → the provider is shared by every task that reads the
///   session.
/// - `'static` → it lives as long as the client.
///
/// # Example
///
/// ```rust
/// use roomkeeper_protocol::UserId;
/// use roomkeeper_session::{IdentityProvider, Session, SessionError};
///
/// /// Signs everyone in as the same guest. Development only.
/// struct GuestProvider;
///
/// impl IdentityProvider for GuestProvider {
///     async fn restore(&self) -> Result<Option<Session>, SessionError> {
///         Ok(None)
///     }
///
///     async fn sign_in(&self, _provider_hint: &str) -> Result<Session, SessionError> {
///         let user_id = UserId::new("guest")
///             .map_err(|e| SessionError::AuthFailed(e.to_string()))?;
///         Ok(Session::new(user_id, "Guest"))
///     }
///
///     async fn sign_out(&self) -> Result<(), SessionError> {
///         Ok(())
///     }
/// }
/// ```
pub trait IdentityProvider: Send + Sync + 'static {
    /// Returns the session the provider already holds (for example from a
    /// previous visit), or `None` when nobody is signed in.
    fn restore(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<Session>, SessionError>> + Send;

    /// Runs the provider's sign-in flow.
    ///
    /// `provider_hint` names the upstream account type (e.g. `"google.com"`).
    fn sign_in(
        &self,
        provider_hint: &str,
    ) -> impl std::future::Future<Output = Result<Session, SessionError>> + Send;

    /// Ends the provider-side session.
    fn sign_out(&self) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}
