//! Conference (group chat) engine.
//!
//! Implements decentralized multi-party chat on top of `confab-link`
//! pairwise channels: membership with freeze/thaw, a closest-peer mesh,
//! flood-relayed reliable broadcast with dedup, best-effort lossy
//! broadcast, and save/restore.
//!
//! Wire format: flat big-endian packets. Save format: little-endian
//! state sections.
//!
//! The engine is sans-I/O: every operation takes the host's transport as
//! `&mut impl PairwiseTransport` and outcomes surface as
//! [`ConferenceEvent`]s.

pub mod dedup;
pub mod engine;
pub mod error;
pub mod event;
pub mod links;
pub mod peer;
pub mod persist;
pub mod session;
pub mod topology;
pub mod types;
pub mod wire;

pub use engine::Conference;
pub use error::{ConferenceError, WireError};
pub use event::ConferenceEvent;
pub use persist::{SECTION_COOKIE, SECTION_TYPE};
pub use types::{
    ConferenceKind, GroupId, MessageKind, MAX_MESSAGE_DATA_LEN, MAX_NAME_LEN, MAX_TITLE_LEN,
};
pub use wire::{LossyFrame, MessageFrame, Packet};
