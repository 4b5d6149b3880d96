//! Duplicate suppression for flood-relayed traffic.
//!
//! Reliable messages carry a 32-bit per-sender number and are filtered by a
//! small ring of recently seen `(number, id)` pairs. Lossy packets carry a
//! rolling 16-bit number and are filtered by a sliding bitmap window. Both
//! structures live per peer; pure state, no I/O.

use crate::types::{LOSSY_WINDOW, MAX_MESSAGE_INFOS};

/// Ring of recently seen reliable messages, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageInfoRing {
    entries: Vec<(u32, u8)>,
}

impl MessageInfoRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `(number, id)` if it has not been seen.
    ///
    /// Returns `true` when the message is fresh and should be handled and
    /// relayed. `latest_wins` marks id families (name, title) where only
    /// the newest broadcast matters: a fresh-but-older message of such an
    /// id is rejected once any newer one is in the ring.
    pub fn check_and_insert(&mut self, number: u32, id: u8, latest_wins: bool) -> bool {
        let mut slot = self.entries.len();
        for (i, &(seen_number, seen_id)) in self.entries.iter().enumerate() {
            if number > seen_number {
                slot = i;
                break;
            }
            if number == seen_number {
                return false;
            }
            if latest_wins && seen_id == id {
                return false;
            }
        }
        if slot >= MAX_MESSAGE_INFOS {
            // Older than everything we remember
            return false;
        }

        self.entries.insert(slot, (number, id));
        self.entries.truncate(MAX_MESSAGE_INFOS);
        true
    }
}

/// Sliding window over the last [`LOSSY_WINDOW`] lossy sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossyWindow {
    bottom: u16,
    top: u16,
    received: [u64; LOSSY_WINDOW as usize / 64],
}

impl Default for LossyWindow {
    fn default() -> Self {
        Self {
            bottom: 0,
            top: 0,
            received: [0; LOSSY_WINDOW as usize / 64],
        }
    }
}

impl LossyWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn bit(&self, number: u16) -> bool {
        let idx = (number % LOSSY_WINDOW) as usize;
        self.received[idx / 64] & (1 << (idx % 64)) != 0
    }

    fn set_bit(&mut self, number: u16) {
        let idx = (number % LOSSY_WINDOW) as usize;
        self.received[idx / 64] |= 1 << (idx % 64);
    }

    fn clear_bit(&mut self, number: u16) {
        let idx = (number % LOSSY_WINDOW) as usize;
        self.received[idx / 64] &= !(1 << (idx % 64));
    }

    /// Record a lossy sequence number.
    ///
    /// Returns `true` when the number is fresh: inside the window and not
    /// yet seen, or ahead of it (the window slides forward, clearing the
    /// vacated range). Numbers more than `1 << 15` behind the window are
    /// stale and rejected.
    pub fn mark(&mut self, number: u16) -> bool {
        if self.bottom == self.top {
            // First packet from this peer establishes the window
            self.top = number;
            self.bottom = number.wrapping_sub(LOSSY_WINDOW).wrapping_add(1);
            self.set_bit(number);
            return true;
        }

        let from_bottom = number.wrapping_sub(self.bottom);
        if from_bottom < LOSSY_WINDOW {
            if self.bit(number) {
                return false;
            }
            self.set_bit(number);
            return true;
        }

        if from_bottom > 1 << 15 {
            // Far in the past
            return false;
        }

        let advance = number.wrapping_sub(self.top);
        if advance >= LOSSY_WINDOW {
            self.received = [0; LOSSY_WINDOW as usize / 64];
        } else {
            let mut i = self.bottom;
            while i != self.bottom.wrapping_add(advance) {
                self.clear_bit(i);
                i = i.wrapping_add(1);
            }
        }
        self.top = number;
        self.bottom = number.wrapping_sub(LOSSY_WINDOW).wrapping_add(1);
        self.set_bit(number);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{MESSAGE_CHAT, MESSAGE_NAME};

    #[test]
    fn ring_accepts_then_rejects_duplicate() {
        let mut ring = MessageInfoRing::new();
        assert!(ring.check_and_insert(5, MESSAGE_CHAT, false));
        assert!(!ring.check_and_insert(5, MESSAGE_CHAT, false));
        assert!(ring.check_and_insert(6, MESSAGE_CHAT, false));
    }

    #[test]
    fn ring_accepts_out_of_order_within_capacity() {
        let mut ring = MessageInfoRing::new();
        assert!(ring.check_and_insert(10, MESSAGE_CHAT, false));
        assert!(ring.check_and_insert(8, MESSAGE_CHAT, false));
        assert!(ring.check_and_insert(9, MESSAGE_CHAT, false));
        assert!(!ring.check_and_insert(9, MESSAGE_CHAT, false));
    }

    #[test]
    fn ring_rejects_older_than_capacity() {
        let mut ring = MessageInfoRing::new();
        for n in 10..(10 + MAX_MESSAGE_INFOS as u32) {
            assert!(ring.check_and_insert(n, MESSAGE_CHAT, false));
        }
        // Everything remembered is newer than 3
        assert!(!ring.check_and_insert(3, MESSAGE_CHAT, false));
        assert!(ring.check_and_insert(100, MESSAGE_CHAT, false));
    }

    #[test]
    fn latest_wins_drops_stale_rename() {
        let mut ring = MessageInfoRing::new();
        assert!(ring.check_and_insert(20, MESSAGE_NAME, true));
        // An older rename is pointless once a newer one was applied
        assert!(!ring.check_and_insert(15, MESSAGE_NAME, true));
        // But an older chat message is still fine
        assert!(ring.check_and_insert(15, MESSAGE_CHAT, false));
    }

    #[test]
    fn window_first_packet_establishes() {
        let mut w = LossyWindow::new();
        assert!(w.mark(1000));
        assert!(!w.mark(1000));
    }

    #[test]
    fn window_accepts_within_range() {
        let mut w = LossyWindow::new();
        assert!(w.mark(1000));
        assert!(w.mark(999));
        assert!(w.mark(1001));
        assert!(!w.mark(999));
    }

    #[test]
    fn window_far_future_resets() {
        let mut w = LossyWindow::new();
        assert!(w.mark(100));
        assert!(w.mark(100 + 5000));
        // Old number now far behind the new window
        assert!(!w.mark(100));
    }

    #[test]
    fn window_far_past_is_stale() {
        let mut w = LossyWindow::new();
        assert!(w.mark(40000));
        // Shortly behind the window bottom, too old to care about
        assert!(!w.mark(38000));
    }

    #[test]
    fn window_partial_slide_clears_vacated_bits() {
        let mut w = LossyWindow::new();
        assert!(w.mark(1000));
        // Slide forward by less than a full window
        assert!(w.mark(1100));
        // 1000 is still inside [bottom, top] and remembered
        assert!(!w.mark(1000));
        // A number that fell below the new bottom is stale or cleared
        assert!(w.mark(900));
    }

    #[test]
    fn window_wraps_around_u16() {
        let mut w = LossyWindow::new();
        assert!(w.mark(u16::MAX - 2));
        assert!(w.mark(2));
        assert!(!w.mark(u16::MAX - 2));
    }
}
