//! In-memory [`PairwiseTransport`] for tests and loopback harnesses.
//!
//! Links are scripted: the harness adds them, flips their status, and
//! inspects the packets the engine enqueued. Nothing is actually sent
//! anywhere; multi-node tests shuttle the captured bytes into the other
//! node's engine by hand.

use crate::{ConnectionId, LinkStatus, PairwiseTransport, PublicKey};

struct LinkEntry {
    id: ConnectionId,
    key: PublicKey,
    session_key: PublicKey,
    status: LinkStatus,
    refs: u32,
    reliable: Vec<Vec<u8>>,
    lossy: Vec<Vec<u8>>,
}

/// Scriptable in-memory transport.
pub struct MemoryLink {
    identity: PublicKey,
    session: PublicKey,
    name: Vec<u8>,
    links: Vec<LinkEntry>,
    next_id: u32,
}

impl MemoryLink {
    pub fn new(identity: PublicKey, session: PublicKey, name: &[u8]) -> Self {
        Self {
            identity,
            session,
            name: name.to_vec(),
            links: Vec::new(),
            next_id: 0,
        }
    }

    /// Script a pre-existing link to `key`, initially [`LinkStatus::Connecting`].
    pub fn add_link(&mut self, key: PublicKey, session_key: PublicKey) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.links.push(LinkEntry {
            id,
            key,
            session_key,
            status: LinkStatus::Connecting,
            refs: 1,
            reliable: Vec::new(),
            lossy: Vec::new(),
        });
        id
    }

    /// Flip a link's connectivity.
    pub fn set_status(&mut self, link: ConnectionId, status: LinkStatus) {
        if let Some(entry) = self.entry_mut(link) {
            entry.status = status;
        }
    }

    /// Take every reliable packet enqueued on `link` so far.
    pub fn drain_reliable(&mut self, link: ConnectionId) -> Vec<Vec<u8>> {
        self.entry_mut(link)
            .map(|e| std::mem::take(&mut e.reliable))
            .unwrap_or_default()
    }

    /// Take every lossy packet enqueued on `link` so far.
    pub fn drain_lossy(&mut self, link: ConnectionId) -> Vec<Vec<u8>> {
        self.entry_mut(link)
            .map(|e| std::mem::take(&mut e.lossy))
            .unwrap_or_default()
    }

    /// Outstanding reference count on a link, 0 once torn down.
    pub fn refs(&self, link: ConnectionId) -> u32 {
        self.entry(link).map(|e| e.refs).unwrap_or(0)
    }

    /// Number of links ever opened, including torn-down ones.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    fn entry(&self, link: ConnectionId) -> Option<&LinkEntry> {
        self.links.iter().find(|e| e.id == link && e.refs > 0)
    }

    fn entry_mut(&mut self, link: ConnectionId) -> Option<&mut LinkEntry> {
        self.links.iter_mut().find(|e| e.id == link && e.refs > 0)
    }
}

impl PairwiseTransport for MemoryLink {
    fn self_public_key(&self) -> PublicKey {
        self.identity
    }

    fn self_session_key(&self) -> PublicKey {
        self.session
    }

    fn self_name(&self) -> &[u8] {
        &self.name
    }

    fn send_reliable(&mut self, link: ConnectionId, packet: &[u8]) -> bool {
        match self.entry_mut(link) {
            Some(e) if e.status == LinkStatus::Connected => {
                e.reliable.push(packet.to_vec());
                true
            }
            _ => false,
        }
    }

    fn send_lossy(&mut self, link: ConnectionId, packet: &[u8]) -> bool {
        match self.entry_mut(link) {
            Some(e) if e.status == LinkStatus::Connected => {
                e.lossy.push(packet.to_vec());
                true
            }
            _ => false,
        }
    }

    fn link_to(&self, key: &PublicKey) -> Option<ConnectionId> {
        self.links
            .iter()
            .find(|e| e.refs > 0 && e.key == *key)
            .map(|e| e.id)
    }

    fn open_link(&mut self, key: &PublicKey) -> Option<ConnectionId> {
        let session_key = PublicKey::from_bytes([0u8; 32]);
        Some(self.add_link(*key, session_key))
    }

    fn expect_session_key(&mut self, link: ConnectionId, session_key: &PublicKey) {
        if let Some(entry) = self.entry_mut(link) {
            entry.session_key = *session_key;
        }
    }

    fn acquire(&mut self, link: ConnectionId) {
        if let Some(entry) = self.entry_mut(link) {
            entry.refs += 1;
        }
    }

    fn release(&mut self, link: ConnectionId) {
        if let Some(entry) = self.entry_mut(link) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entry.status = LinkStatus::None;
            }
        }
    }

    fn status(&self, link: ConnectionId) -> LinkStatus {
        self.entry(link).map(|e| e.status).unwrap_or(LinkStatus::None)
    }

    fn link_keys(&self, link: ConnectionId) -> Option<(PublicKey, PublicKey)> {
        self.entry(link).map(|e| (e.key, e.session_key))
    }
}
