//! Per-conference state.

use confab_link::PublicKey;

use crate::links::LinkTable;
use crate::peer::Peer;
use crate::topology::ClosestPeers;
use crate::types::{ConferenceKind, GroupId};

/// Lifecycle of a conference slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Allocated on join; our peer number is not yet confirmed by the
    /// network.
    Valid,
    /// Fully joined; `self_number` names our own active-peer entry.
    Connected,
}

/// Everything the engine tracks for one conference.
#[derive(Debug, Clone)]
pub struct Session {
    pub kind: ConferenceKind,
    pub id: GroupId,
    pub status: SessionStatus,
    /// Our ephemeral peer number within the conference.
    pub self_number: u16,
    /// Monotonic counter for reliable broadcasts. Increments skip zero.
    pub message_number: u32,
    /// Rolling counter for lossy broadcasts.
    pub lossy_number: u16,
    pub title: Vec<u8>,
    /// Suppresses title overwrite by direct sync until the conference
    /// shrinks back to just us.
    pub title_fresh: bool,
    pub peers: Vec<Peer>,
    pub frozen: Vec<Peer>,
    pub closest: ClosestPeers,
    pub links: LinkTable,
    /// Engine-clock second of our last ping broadcast.
    pub last_ping: u64,
    /// Re-announce our own nickname on the next tick.
    pub announce_name: bool,
}

impl Session {
    pub fn new(kind: ConferenceKind, id: GroupId) -> Self {
        Self {
            kind,
            id,
            status: SessionStatus::Valid,
            self_number: 0,
            message_number: 0,
            lossy_number: 0,
            title: Vec::new(),
            title_fresh: false,
            peers: Vec::new(),
            frozen: Vec::new(),
            closest: ClosestPeers::new(),
            links: LinkTable::new(),
            last_ping: 0,
            announce_name: false,
        }
    }

    // ── Registry lookups ────────────────────────────────────────────────

    pub fn peer_index_by_key(&self, key: &PublicKey) -> Option<usize> {
        self.peers.iter().position(|p| p.key == *key)
    }

    pub fn peer_index_by_number(&self, number: u16) -> Option<usize> {
        self.peers.iter().position(|p| p.number == number)
    }

    pub fn frozen_index_by_key(&self, key: &PublicKey) -> Option<usize> {
        self.frozen.iter().position(|p| p.key == *key)
    }

    pub fn frozen_index_by_number(&self, number: u16) -> Option<usize> {
        self.frozen.iter().position(|p| p.number == number)
    }

    /// Peer number bound to `key` in either list.
    pub fn number_by_key(&self, key: &PublicKey) -> Option<u16> {
        self.peer_index_by_key(key)
            .map(|i| self.peers[i].number)
            .or_else(|| self.frozen_index_by_key(key).map(|i| self.frozen[i].number))
    }

    /// True if `number` is bound in either list.
    pub fn number_in_use(&self, number: u16) -> bool {
        self.peer_index_by_number(number).is_some()
            || self.frozen_index_by_number(number).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupId;

    fn key(seed: u8) -> PublicKey {
        PublicKey::from_bytes([seed; 32])
    }

    fn session() -> Session {
        Session::new(ConferenceKind::Text, GroupId::from_bytes([1; 32]))
    }

    #[test]
    fn lookups_cover_both_lists() {
        let mut s = session();
        s.peers.push(Peer::new(key(1), key(2), 0, 0));
        s.frozen.push(Peer::new(key(3), key(4), 7, 0));

        assert_eq!(s.peer_index_by_key(&key(1)), Some(0));
        assert_eq!(s.peer_index_by_key(&key(3)), None);
        assert_eq!(s.frozen_index_by_number(7), Some(0));
        assert_eq!(s.number_by_key(&key(3)), Some(7));
        assert!(s.number_in_use(0));
        assert!(s.number_in_use(7));
        assert!(!s.number_in_use(9));
    }
}
