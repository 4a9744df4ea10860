//! Identity session management for roomkeeper.
//!
//! This crate wraps the external identity provider and answers one
//! question for the rest of the workspace: who is signed in right now?
//!
//! 1. **Provider** — the opaque auth service ([`IdentityProvider`] trait)
//! 2. **Session tracking** — the current user and its changes
//!    ([`SessionManager`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Client facade (above)  ← reads current_user() before entering a room
//!     ↕
//! Session layer (this crate)  ← tracks sign-in state
//!     ↕
//! Identity provider (external)  ← popup login, token refresh, etc.
//! ```

#![allow(async_fn_in_trait)]

mod error;
mod manager;
mod provider;
mod session;

pub use error::SessionError;
pub use manager::SessionManager;
pub use provider::IdentityProvider;
pub use session::{AuthState, Session};
