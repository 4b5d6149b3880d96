//! One conference member, active or frozen.

use confab_link::PublicKey;

use crate::dedup::{LossyWindow, MessageInfoRing};

/// Membership record for one peer of one conference.
///
/// The same record moves between the active and frozen lists; freezing
/// preserves everything so a thaw restores the peer seamlessly.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Long-term identity key, unique within the conference.
    pub key: PublicKey,
    /// Ephemeral session key, used to pre-seed new pairwise links.
    pub session_key: PublicKey,
    /// Whether `session_key` was refreshed since the peer was (re)added.
    pub session_key_current: bool,
    /// Ephemeral number identifying the peer inside this conference.
    pub number: u16,
    pub nick: Vec<u8>,
    /// Set once a nick was learned from an attributed broadcast; peer-list
    /// sync no longer overwrites it.
    pub nick_known: bool,
    /// Engine-clock second of the last traffic attributed to this peer.
    pub last_active: u64,
    pub messages: MessageInfoRing,
    pub lossy: LossyWindow,
}

impl Peer {
    pub fn new(key: PublicKey, session_key: PublicKey, number: u16, now: u64) -> Self {
        Self {
            key,
            session_key,
            session_key_current: true,
            number,
            nick: Vec::new(),
            nick_known: false,
            last_active: now,
            messages: MessageInfoRing::new(),
            lossy: LossyWindow::new(),
        }
    }
}
