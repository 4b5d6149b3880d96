//! Close-connection slot table.
//!
//! Maps pairwise links to conference participation. A link is kept alive
//! for one or more reasons, tracked as a bitmask; the engine tears the
//! underlying connection down only when a slot's last reason is removed.
//! Pure bookkeeping: all transport side effects stay in the engine.

use confab_link::ConnectionId;

use crate::types::MAX_GROUP_LINKS;

/// Why a link is associated with a conference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkReasons(u8);

impl LinkReasons {
    /// Peer is in the closest set.
    pub const CLOSEST: LinkReasons = LinkReasons(1);
    /// This link introduced us to the conference.
    pub const INTRODUCER: LinkReasons = LinkReasons(1 << 1);
    /// We are vouching for this freshly joined peer to the others.
    pub const INTRODUCING: LinkReasons = LinkReasons(1 << 2);

    pub fn contains(self, other: LinkReasons) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: LinkReasons) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: LinkReasons) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Conference-level state of one close connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Slot allocated, waiting for the link and the Online exchange.
    Connecting,
    /// Online packet received, conference traffic flows here.
    Online,
}

/// One occupied close slot.
#[derive(Debug, Clone)]
pub struct Link {
    pub connection: ConnectionId,
    pub state: LinkState,
    pub reasons: LinkReasons,
    /// The remote side's number for this conference, learned from its
    /// Online packet. Required for addressing packets to it.
    pub remote_group: Option<u16>,
}

/// Fixed-capacity table of close slots for one conference.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    slots: [Option<Link>; MAX_GROUP_LINKS],
    introducers: usize,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Option<&Link> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Link> {
        self.slots.get_mut(index).and_then(|slot| slot.as_mut())
    }

    /// Slot index currently bound to `connection`.
    pub fn find(&self, connection: ConnectionId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .map(|l| l.connection == connection)
                .unwrap_or(false)
        })
    }

    /// Find the slot for `connection` or bind a free one to it.
    ///
    /// Returns `(index, newly_allocated)`, or `None` when the table is full.
    pub fn ensure(&mut self, connection: ConnectionId) -> Option<(usize, bool)> {
        if let Some(index) = self.find(connection) {
            return Some((index, false));
        }
        let index = self.slots.iter().position(|slot| slot.is_none())?;
        self.slots[index] = Some(Link {
            connection,
            state: LinkState::Connecting,
            reasons: LinkReasons::default(),
            remote_group: None,
        });
        Some((index, true))
    }

    /// OR a reason into a slot, keeping the introducer count in step.
    pub fn add_reason(&mut self, index: usize, reason: LinkReasons) {
        let Some(link) = self.slots.get_mut(index).and_then(|s| s.as_mut()) else {
            return;
        };
        if reason.contains(LinkReasons::INTRODUCER)
            && !link.reasons.contains(LinkReasons::INTRODUCER)
        {
            self.introducers += 1;
        }
        link.reasons.insert(reason);
    }

    /// Clear a reason bit. Returns `true` if the slot now has no reasons
    /// left and should be torn down by the caller.
    pub fn remove_reason(&mut self, index: usize, reason: LinkReasons) -> bool {
        let Some(link) = self.slots.get_mut(index).and_then(|s| s.as_mut()) else {
            return false;
        };
        if !link.reasons.contains(reason) {
            return false;
        }
        link.reasons.remove(reason);
        if reason.contains(LinkReasons::INTRODUCER) {
            self.introducers -= 1;
        }
        link.reasons.is_empty()
    }

    /// Free a slot outright.
    pub fn clear(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if let Some(link) = slot.take() {
                if link.reasons.contains(LinkReasons::INTRODUCER) {
                    self.introducers -= 1;
                }
            }
        }
    }

    /// Number of slots holding the INTRODUCER reason.
    pub fn introducers(&self) -> usize {
        self.introducers
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Link)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|l| (i, l)))
    }

    pub fn iter_online(&self) -> impl Iterator<Item = (usize, &Link)> {
        self.iter().filter(|(_, l)| l.state == LinkState::Online)
    }

    pub fn online_count(&self) -> usize {
        self.iter_online().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_reuses_existing_slot() {
        let mut table = LinkTable::new();
        let (a, fresh_a) = table.ensure(ConnectionId(7)).unwrap();
        let (b, fresh_b) = table.ensure(ConnectionId(7)).unwrap();
        assert_eq!(a, b);
        assert!(fresh_a);
        assert!(!fresh_b);
    }

    #[test]
    fn table_fills_up() {
        let mut table = LinkTable::new();
        for i in 0..MAX_GROUP_LINKS as u32 {
            assert!(table.ensure(ConnectionId(i)).is_some());
        }
        assert!(table.ensure(ConnectionId(999)).is_none());
    }

    #[test]
    fn introducer_count_tracks_reason_bit() {
        let mut table = LinkTable::new();
        let (i, _) = table.ensure(ConnectionId(1)).unwrap();
        table.add_reason(i, LinkReasons::INTRODUCER);
        table.add_reason(i, LinkReasons::INTRODUCER);
        assert_eq!(table.introducers(), 1);

        table.add_reason(i, LinkReasons::CLOSEST);
        assert!(!table.remove_reason(i, LinkReasons::INTRODUCER));
        assert_eq!(table.introducers(), 0);

        // Last reason gone, caller must tear down
        assert!(table.remove_reason(i, LinkReasons::CLOSEST));
    }

    #[test]
    fn remove_reason_ignores_unset_bits() {
        let mut table = LinkTable::new();
        let (i, _) = table.ensure(ConnectionId(1)).unwrap();
        table.add_reason(i, LinkReasons::CLOSEST);
        assert!(!table.remove_reason(i, LinkReasons::INTRODUCING));
        assert_eq!(table.introducers(), 0);
    }

    #[test]
    fn clear_releases_introducer_count() {
        let mut table = LinkTable::new();
        let (i, _) = table.ensure(ConnectionId(1)).unwrap();
        table.add_reason(i, LinkReasons::INTRODUCER);
        table.clear(i);
        assert_eq!(table.introducers(), 0);
        assert!(table.find(ConnectionId(1)).is_none());
    }

    #[test]
    fn online_iteration_skips_connecting_slots() {
        let mut table = LinkTable::new();
        let (a, _) = table.ensure(ConnectionId(1)).unwrap();
        let (_b, _) = table.ensure(ConnectionId(2)).unwrap();
        table.get_mut(a).unwrap().state = LinkState::Online;
        assert_eq!(table.online_count(), 1);
        assert_eq!(table.iter().count(), 2);
    }
}
