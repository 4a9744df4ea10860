//! # roomkeeper
//!
//! Presence tracking and empty-room cleanup for collaborative web apps.
//!
//! Users sign in through an external identity provider, enter rooms, and
//! show up in each room's presence set. When the last one leaves (or their
//! tab dies), the room record is deleted after a short grace period.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roomkeeper::prelude::*;
//!
//! // Implement IdentityProvider for your auth service, then:
//! // let client = RoomClientBuilder::new()
//! //     .grace_period(Duration::from_secs(5))
//! //     .build(provider, Arc::new(store.connect()), records)
//! //     .await;
//! // client.init().await?;
//! // client.enter_room(&RoomId::new("standup")?).await?;
//! ```

mod client;
mod config;
mod error;
pub mod telemetry;

pub use client::{RoomClient, RoomClientBuilder};
pub use config::RoomkeeperConfig;
pub use error::RoomkeeperError;

pub mod prelude {
    pub use std::sync::Arc;
    pub use std::time::Duration;

    pub use roomkeeper_lease::LeaseConfig;
    pub use roomkeeper_protocol::{
        Clock, ManualClock, PresenceEntry, PresenceSet, RoomId, RoomRecord, StorePath,
        SystemClock, UserId,
    };
    pub use roomkeeper_room::{
        CleanupMode, DeleteOutcome, LifecycleConfig, LifecycleEvent, RoomPhase,
    };
    pub use roomkeeper_session::{AuthState, IdentityProvider, Session, SessionError};
    pub use roomkeeper_store::{
        MemoryConnection, MemoryRealtimeStore, MemoryRecordStore, RealtimeStore, RecordStore,
        StoreError,
    };

    pub use crate::{RoomClient, RoomClientBuilder, RoomkeeperConfig, RoomkeeperError};
}
