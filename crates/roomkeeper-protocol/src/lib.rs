//! Shared vocabulary for roomkeeper.
//!
//! This crate defines the data that travels through the realtime store and
//! the durable record store:
//!
//! - **Identity** ([`RoomId`], [`UserId`]) — validated key segments.
//! - **Paths** ([`StorePath`]) — where presence lives in the store tree.
//! - **Model** ([`PresenceEntry`], [`RoomRecord`]) — the stored values.
//! - **Presence sets** ([`PresenceSet`]) — the parsed view of a room's
//!   `online_users` node, with expired leases filtered out.
//! - **Clock** ([`Clock`]) — wall-clock milliseconds, swappable in tests.
//!
//! # Architecture
//!
//! ```text
//! Room layer (presence + lifecycle) → Protocol (entries, paths) → Store (JSON tree)
//! ```
//!
//! The protocol layer knows nothing about connections or timers. It only
//! knows how presence is named and encoded.

mod clock;
mod codec;
mod error;
mod model;
mod presence_set;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{decode_entry, decode_record, encode_entry, encode_record};
pub use error::ProtocolError;
pub use model::{PresenceEntry, RoomRecord};
pub use presence_set::PresenceSet;
pub use types::{RoomId, StorePath, UserId};
