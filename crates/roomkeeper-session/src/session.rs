//! Session types: who is signed in, and the sign-in state machine.

use roomkeeper_protocol::UserId;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The signed-in user, as reported by the identity provider.
///
/// Read-only to the rest of roomkeeper: presence only needs `user_id` and
/// `display_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub display_name: String,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

impl Session {
    /// Creates a session with no email or photo.
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            email: None,
            photo_url: None,
        }
    }

    /// Sets the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the avatar URL.
    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// The part of the email after `@`, if there is one.
    ///
    /// Used to tell organisation accounts apart (`"example.com"`).
    pub fn email_domain(&self) -> Option<&str> {
        let email = self.email.as_deref()?;
        let (_, domain) = email.rsplit_once('@')?;
        if domain.is_empty() { None } else { Some(domain) }
    }
}

// ---------------------------------------------------------------------------
// AuthState
// ---------------------------------------------------------------------------

/// The sign-in state of the client.
///
/// ```text
///   Loading ──(restore)──→ SignedOut ──(login)──→ SignedIn
///      │                      ↑                      │
///      └──(restore: user)─────┼──────────────────→   │
///                             └──(logout / expiry)───┘
/// ```
///
/// - **Loading**: the provider has not reported yet. Navigation should
///   wait rather than assume "signed out".
/// - **SignedOut**: resolved, nobody signed in.
/// - **SignedIn**: resolved, with the user's session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Loading,
    SignedOut,
    SignedIn(Session),
}

impl AuthState {
    /// Returns `true` until the first provider report.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// The signed-in session, if any.
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(session) => Some(session),
            _ => None,
        }
    }
}

impl From<Option<Session>> for AuthState {
    fn from(session: Option<Session>) -> Self {
        match session {
            Some(session) => Self::SignedIn(session),
            None => Self::SignedOut,
        }
    }
}
