//! Shared types and protocol constants for the conference engine.

use std::fmt;

use rand::RngCore;

/// Length of a conference identifier in bytes.
pub const GROUP_ID_LENGTH: usize = 32;

/// Closest-peer slots maintained per conference.
pub const DESIRED_CLOSEST: usize = 4;

/// Close-connection slots per conference.
pub const MAX_GROUP_LINKS: usize = 16;

/// Entries in the per-peer reliable dedup ring.
pub const MAX_MESSAGE_INFOS: usize = 8;

/// Width of the per-peer lossy sequence window.
pub const LOSSY_WINDOW: u16 = 256;

/// Maximum nickname length in bytes.
pub const MAX_NAME_LEN: usize = 128;

/// Maximum conference title length in bytes.
pub const MAX_TITLE_LEN: usize = 128;

/// Seconds between liveness pings to the conference.
pub const PING_INTERVAL: u64 = 20;

/// Seconds of silence after which an active peer is frozen.
pub const FREEZE_TIMEOUT: u64 = PING_INTERVAL * 3;

/// Payload capacity of one pairwise-channel packet.
pub const MAX_TRANSPORT_PAYLOAD: usize = 1373;

/// Framing overhead of a reliable conference message:
/// discriminant + group number + peer number + message number + message id.
pub const MESSAGE_OVERHEAD: usize = 1 + 2 + 2 + 4 + 1;

/// Largest payload accepted by reliable broadcast.
pub const MAX_MESSAGE_DATA_LEN: usize = MAX_TRANSPORT_PAYLOAD - MESSAGE_OVERHEAD;

/// First and last sub-ids available to host-defined lossy packets.
pub const LOSSY_ID_MIN: u8 = 192;
pub const LOSSY_ID_MAX: u8 = 254;

/// 32-byte conference identifier, fixed for the conference's lifetime.
///
/// Displayed as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub [u8; GROUP_ID_LENGTH]);

impl GroupId {
    /// Generate a fresh random identifier.
    pub fn random(rng: &mut impl RngCore) -> Self {
        let mut bytes = [0u8; GROUP_ID_LENGTH];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; GROUP_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; GROUP_ID_LENGTH] {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({}…)", hex::encode(&self.0[..4]))
    }
}

/// Conference flavor carried in invites and the save file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConferenceKind {
    /// Plain text conference.
    Text = 0,
    /// Audio/video conference shell; signalling only, media is out of scope.
    Av = 1,
}

impl ConferenceKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ConferenceKind::Text),
            1 => Some(ConferenceKind::Av),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// User-visible flavor of a reliable conference message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Ordinary chat message.
    Normal,
    /// `/me`-style action.
    Action,
}
