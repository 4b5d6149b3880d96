//! Closest-peer selection.
//!
//! Keeps the conference mesh connected without full O(n²) links by
//! maintaining a small set of peers ranked by a numeric distance between
//! key prefixes. The distance is ordering-only and deliberately uses
//! wrapping arithmetic so every node in a conference ranks candidates the
//! same way; it carries no cryptographic meaning.

use confab_link::PublicKey;

use crate::types::DESIRED_CLOSEST;

/// Relative distance from `a` to `b`: the big-endian 64-bit prefixes of
/// the keys, subtracted mod 2^64.
pub fn distance(a: &PublicKey, b: &PublicKey) -> u64 {
    let mut pa = [0u8; 8];
    let mut pb = [0u8; 8];
    pa.copy_from_slice(&a.as_bytes()[..8]);
    pb.copy_from_slice(&b.as_bytes()[..8]);
    u64::from_be_bytes(pa).wrapping_sub(u64::from_be_bytes(pb))
}

/// One selected closest peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosestEntry {
    pub key: PublicKey,
    pub session_key: PublicKey,
}

/// Pending reconciliation between the selected set and the link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosestChange {
    None,
    Added,
    /// A removal needs the full active set re-offered before reconnecting.
    Removed,
}

/// Fixed-capacity set of the closest conference members.
#[derive(Debug, Clone)]
pub struct ClosestPeers {
    slots: [Option<ClosestEntry>; DESIRED_CLOSEST],
    changed: ClosestChange,
}

impl Default for ClosestPeers {
    fn default() -> Self {
        Self {
            slots: [None; DESIRED_CLOSEST],
            changed: ClosestChange::None,
        }
    }
}

impl ClosestPeers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.map(|e| e.key == *key).unwrap_or(false))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClosestEntry> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn changed(&self) -> ClosestChange {
        self.changed
    }

    /// Reconciliation done; clear the dirty flag.
    pub fn mark_reconciled(&mut self) {
        self.changed = ClosestChange::None;
    }

    /// Offer a candidate for the closest set.
    ///
    /// Self is rejected, an already-present key is a no-op. When the set is
    /// full the candidate competes on distance margin: the first half of
    /// the slots is ranked by distance from self, the second half by
    /// distance to self. An evicted occupant is re-offered, since it may
    /// still beat a different slot.
    pub fn offer(&mut self, self_key: &PublicKey, key: PublicKey, session_key: PublicKey) {
        let mut candidate = ClosestEntry { key, session_key };

        loop {
            if candidate.key == *self_key || self.contains(&candidate.key) {
                return;
            }

            let mut index = self.slots.iter().position(|slot| slot.is_none());

            if index.is_none() {
                let half = DESIRED_CLOSEST / 2;
                let mut margin = 0u64;

                let from_self = distance(self_key, &candidate.key);
                for (i, slot) in self.slots.iter().enumerate().take(half) {
                    if let Some(entry) = slot {
                        let comp = distance(self_key, &entry.key);
                        if comp > from_self && comp > margin {
                            index = Some(i);
                            margin = comp;
                        }
                    }
                }

                let to_self = distance(&candidate.key, self_key);
                for (i, slot) in self.slots.iter().enumerate().skip(half) {
                    if let Some(entry) = slot {
                        let comp = distance(&entry.key, self_key);
                        if comp > to_self && comp > margin {
                            index = Some(i);
                            margin = comp;
                        }
                    }
                }
            }

            let Some(index) = index else {
                // Set is full and the candidate beats nobody
                return;
            };

            let evicted = self.slots[index].replace(candidate);
            if self.changed == ClosestChange::None {
                self.changed = ClosestChange::Added;
            }

            match evicted {
                Some(old) => candidate = old,
                None => return,
            }
        }
    }

    /// Drop a key from the set, flagging that reconciliation must re-offer
    /// the remaining membership.
    pub fn remove(&mut self, key: &PublicKey) {
        for slot in &mut self.slots {
            if slot.map(|e| e.key == *key).unwrap_or(false) {
                *slot = None;
                self.changed = ClosestChange::Removed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(prefix: u64) -> PublicKey {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&prefix.to_be_bytes());
        PublicKey::from_bytes(bytes)
    }

    #[test]
    fn distance_wraps() {
        assert_eq!(distance(&key(1), &key(3)), u64::MAX - 1);
        assert_eq!(distance(&key(3), &key(1)), 2);
    }

    #[test]
    fn rejects_self_and_duplicates() {
        let me = key(100);
        let mut closest = ClosestPeers::new();

        closest.offer(&me, me, key(0));
        assert_eq!(closest.iter().count(), 0);
        assert_eq!(closest.changed(), ClosestChange::None);

        closest.offer(&me, key(101), key(0));
        assert_eq!(closest.changed(), ClosestChange::Added);
        closest.mark_reconciled();
        closest.offer(&me, key(101), key(0));
        assert_eq!(closest.iter().count(), 1);
        assert_eq!(closest.changed(), ClosestChange::None);
    }

    #[test]
    fn never_exceeds_capacity() {
        let me = key(1 << 32);
        let mut closest = ClosestPeers::new();
        for i in 0..1000u64 {
            closest.offer(&me, key(i * 7919), key(0));
            assert!(closest.iter().count() <= DESIRED_CLOSEST);
        }
        assert_eq!(closest.iter().count(), DESIRED_CLOSEST);
    }

    #[test]
    fn nearer_candidate_evicts_farther_occupant() {
        let me = key(1000);
        let mut closest = ClosestPeers::new();
        // Fill with distant keys
        for i in 0..DESIRED_CLOSEST as u64 {
            closest.offer(&me, key(500_000 + i), key(0));
        }
        // A key just above self beats the second-half ranking
        closest.offer(&me, key(1001), key(0));
        assert!(closest.contains(&key(1001)));
        assert_eq!(closest.iter().count(), DESIRED_CLOSEST);
    }

    #[test]
    fn removal_wins_over_later_additions() {
        let me = key(9);
        let mut closest = ClosestPeers::new();
        closest.offer(&me, key(10), key(0));
        closest.mark_reconciled();

        closest.remove(&key(10));
        assert_eq!(closest.changed(), ClosestChange::Removed);
        closest.offer(&me, key(11), key(0));
        // Removed stays pending so reconciliation re-offers everyone
        assert_eq!(closest.changed(), ClosestChange::Removed);
        assert!(!closest.contains(&key(10)));
    }
}
