//! The session manager: the client's single source of "who is signed in".
//!
//! Wraps an [`IdentityProvider`] and publishes every state change on a
//! `tokio::sync::watch` channel. Subscribers always see the latest state;
//! dropping the receiver unsubscribes.
//!
//! Failures never leave a half-signed-in state: a failed login keeps the
//! previous state, a failed logout keeps the session.

use tokio::sync::watch;

use crate::{AuthState, IdentityProvider, Session, SessionError};

/// Tracks the signed-in user on top of an identity provider.
///
/// ## Lifecycle
///
/// ```text
/// new() ──→ [Loading] ──init()──→ [SignedOut] ──login()──→ [SignedIn]
///                          │                                   │
///                          └──(restored)──→ [SignedIn]         │
///                                                              ▼
///                                  [SignedOut] ←──logout() / expire()
/// ```
pub struct SessionManager<P: IdentityProvider> {
    provider: P,
    state: watch::Sender<AuthState>,
}

impl<P: IdentityProvider> SessionManager<P> {
    /// Creates a manager in the `Loading` state.
    pub fn new(provider: P) -> Self {
        let (state, _) = watch::channel(AuthState::Loading);
        Self { provider, state }
    }

    /// Resolves the initial state from the provider's stored session.
    ///
    /// On failure the state still resolves (to `SignedOut`) so nothing
    /// waits on `Loading` forever.
    pub async fn init(&self) -> Result<Option<Session>, SessionError> {
        match self.provider.restore().await {
            Ok(restored) => {
                match &restored {
                    Some(session) => {
                        tracing::info!(user_id = %session.user_id, "session restored")
                    }
                    None => tracing::debug!("no stored session"),
                }
                self.state.send_replace(AuthState::from(restored.clone()));
                Ok(restored)
            }
            Err(e) => {
                tracing::warn!(error = %e, "session restore failed, treating as signed out");
                self.state.send_replace(AuthState::SignedOut);
                Err(e)
            }
        }
    }

    /// Signs in through the provider.
    ///
    /// # Errors
    /// Returns the provider's error; the previous state is kept.
    pub async fn login(&self, provider_hint: &str) -> Result<Session, SessionError> {
        match self.provider.sign_in(provider_hint).await {
            Ok(session) => {
                tracing::info!(user_id = %session.user_id, provider_hint, "signed in");
                self.state.send_replace(AuthState::SignedIn(session.clone()));
                Ok(session)
            }
            Err(e) => {
                tracing::error!(error = %e, provider_hint, "login failed");
                // Resolve a pending Loading state; never touch SignedIn.
                self.state.send_if_modified(|state| {
                    if state.is_loading() {
                        *state = AuthState::SignedOut;
                        true
                    } else {
                        false
                    }
                });
                Err(e)
            }
        }
    }

    /// Signs out through the provider.
    ///
    /// # Errors
    /// Returns the provider's error; the session is kept.
    pub async fn logout(&self) -> Result<(), SessionError> {
        match self.provider.sign_out().await {
            Ok(()) => {
                if let Some(session) = self.current_user() {
                    tracing::info!(user_id = %session.user_id, "signed out");
                }
                self.state.send_replace(AuthState::SignedOut);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "logout failed");
                Err(e)
            }
        }
    }

    /// Records that the provider ended the session on its own (token
    /// revoked, expired refresh).
    pub fn expire(&self) {
        let previous = self.state.send_replace(AuthState::SignedOut);
        if let Some(session) = previous.session() {
            tracing::info!(user_id = %session.user_id, "session expired externally");
        }
    }

    /// The signed-in user, or `None`.
    pub fn current_user(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Subscribes to state changes. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Waits until the state has left `Loading`, then returns the user.
    pub async fn wait_until_resolved(&self) -> Option<Session> {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| !state.is_loading()).await {
            Ok(state) => state.session().cloned(),
            // The sender lives in `self`, so this cannot close first.
            Err(_) => None,
        }
    }

    /// Returns `true` when someone is signed in.
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().session().is_some()
    }

    /// The signed-in user's email domain, if known.
    pub fn user_domain(&self) -> Option<String> {
        self.state
            .borrow()
            .session()
            .and_then(Session::email_domain)
            .map(str::to_string)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `SessionManager`, using a scripted provider.
    //!
    //! Naming convention: `test_{function}_{scenario}_{expected}`.

    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use roomkeeper_protocol::UserId;

    use super::*;

    // -- Helpers ----------------------------------------------------------

    /// A provider whose answers are set by the test.
    #[derive(Default)]
    struct ScriptedProvider {
        stored: Option<Session>,
        fail_restore: bool,
        fail_sign_in: bool,
        fail_sign_out: bool,
        hints: Mutex<Vec<String>>,
    }

    impl IdentityProvider for ScriptedProvider {
        async fn restore(&self) -> Result<Option<Session>, SessionError> {
            if self.fail_restore {
                return Err(SessionError::RestoreFailed("offline".into()));
            }
            Ok(self.stored.clone())
        }

        async fn sign_in(&self, provider_hint: &str) -> Result<Session, SessionError> {
            self.hints.lock().unwrap().push(provider_hint.to_string());
            if self.fail_sign_in {
                return Err(SessionError::AuthFailed("popup closed".into()));
            }
            Ok(ada())
        }

        async fn sign_out(&self) -> Result<(), SessionError> {
            if self.fail_sign_out {
                return Err(SessionError::SignOutFailed("offline".into()));
            }
            Ok(())
        }
    }

    fn ada() -> Session {
        Session::new(UserId::new("ada").unwrap(), "Ada").with_email("ada@example.com")
    }

    // =====================================================================
    // init()
    // =====================================================================

    #[tokio::test]
    async fn test_new_starts_loading() {
        let mgr = SessionManager::new(ScriptedProvider::default());
        assert!(mgr.state().is_loading());
        assert!(!mgr.is_authenticated());
    }

    #[tokio::test]
    async fn test_init_without_stored_session_resolves_signed_out() {
        let mgr = SessionManager::new(ScriptedProvider::default());

        let restored = mgr.init().await.unwrap();

        assert_eq!(restored, None);
        assert_eq!(mgr.state(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn test_init_with_stored_session_resolves_signed_in() {
        let mgr = SessionManager::new(ScriptedProvider {
            stored: Some(ada()),
            ..Default::default()
        });

        mgr.init().await.unwrap();

        assert_eq!(mgr.current_user(), Some(ada()));
        assert_eq!(mgr.user_domain().as_deref(), Some("example.com"));
    }

    #[tokio::test]
    async fn test_init_failure_still_resolves() {
        let mgr = SessionManager::new(ScriptedProvider {
            fail_restore: true,
            ..Default::default()
        });

        assert!(matches!(mgr.init().await, Err(SessionError::RestoreFailed(_))));
        assert_eq!(mgr.state(), AuthState::SignedOut);
    }

    // =====================================================================
    // login() / logout()
    // =====================================================================

    #[tokio::test]
    async fn test_login_success_publishes_session() {
        let provider = ScriptedProvider::default();
        let mgr = SessionManager::new(provider);
        mgr.init().await.unwrap();
        let mut rx = mgr.subscribe();

        let session = mgr.login("google.com").await.unwrap();

        assert_eq!(session, ada());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().session(), Some(&ada()));
        assert_eq!(mgr.provider.hints.lock().unwrap().as_slice(), ["google.com"]);
    }

    #[tokio::test]
    async fn test_login_failure_keeps_user_signed_out() {
        let mgr = SessionManager::new(ScriptedProvider {
            fail_sign_in: true,
            ..Default::default()
        });
        mgr.init().await.unwrap();

        let result = mgr.login("google.com").await;

        assert!(matches!(result, Err(SessionError::AuthFailed(_))));
        assert_eq!(mgr.state(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn test_login_failure_before_init_resolves_loading() {
        let mgr = SessionManager::new(ScriptedProvider {
            fail_sign_in: true,
            ..Default::default()
        });

        let _ = mgr.login("google.com").await;

        assert_eq!(mgr.state(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let mgr = SessionManager::new(ScriptedProvider {
            stored: Some(ada()),
            ..Default::default()
        });
        mgr.init().await.unwrap();

        mgr.logout().await.unwrap();

        assert_eq!(mgr.current_user(), None);
        assert_eq!(mgr.state(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn test_logout_failure_keeps_session() {
        let mgr = SessionManager::new(ScriptedProvider {
            stored: Some(ada()),
            fail_sign_out: true,
            ..Default::default()
        });
        mgr.init().await.unwrap();

        assert!(mgr.logout().await.is_err());
        assert_eq!(mgr.current_user(), Some(ada()));
    }

    // =====================================================================
    // expire() / wait_until_resolved()
    // =====================================================================

    #[tokio::test]
    async fn test_expire_signs_out_and_notifies() {
        let mgr = SessionManager::new(ScriptedProvider {
            stored: Some(ada()),
            ..Default::default()
        });
        mgr.init().await.unwrap();
        let mut rx = mgr.subscribe();

        mgr.expire();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), AuthState::SignedOut);
        assert!(!mgr.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_resolved_blocks_until_init() {
        let mgr = Arc::new(SessionManager::new(ScriptedProvider {
            stored: Some(ada()),
            ..Default::default()
        }));

        let waiter = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.wait_until_resolved().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished(), "must wait while Loading");

        mgr.init().await.unwrap();
        assert_eq!(waiter.await.unwrap(), Some(ada()));
    }

    #[tokio::test]
    async fn test_wait_until_resolved_returns_immediately_when_resolved() {
        let mgr = SessionManager::new(ScriptedProvider::default());
        mgr.init().await.unwrap();
        assert_eq!(mgr.wait_until_resolved().await, None);
    }
}
