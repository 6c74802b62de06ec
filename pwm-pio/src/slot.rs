//! Single-slot, latest-wins staging of duty updates.
//!
//! Duty setters never wait for the peripheral: the newest FIFO word is staged
//! in one atomic slot, overwriting anything not yet handed to the hardware.
//! The channel drains the slot into the TX FIFO whenever there is room, so
//! under a burst of updates intermediate values are simply dropped and the
//! last one wins. There are no torn values and the host never stalls on
//! peripheral timing.

use core::sync::atomic::{AtomicU32, Ordering};

/// Marks the slot as holding nothing.
///
/// Legal FIFO words are either `u32::MAX` (the always-off sentinel) or tick
/// values below 2^16, so this bit pattern can never be staged.
const EMPTY: u32 = 0xffff_fffe;

/// One-deep, latest-wins buffer between duty setters and the TX FIFO.
pub struct DutySlot {
    word: AtomicU32,
}

impl DutySlot {
    /// Creates an empty slot.
    pub const fn new() -> Self {
        DutySlot {
            word: AtomicU32::new(EMPTY),
        }
    }

    /// Stage a FIFO word, replacing any value not yet consumed.
    ///
    /// A plain atomic store: safe against concurrent publishers, the last
    /// writer wins.
    pub fn publish(&self, value: u32) {
        debug_assert!(value != EMPTY);
        self.word.store(value, Ordering::Release);
    }

    /// Take the staged word, leaving the slot empty.
    ///
    /// Load and store run under a critical section since thumbv6 has no
    /// atomic swap. A publish landing between them is re-delivered on the
    /// next take, which is harmless for idempotent duty words.
    pub fn take(&self) -> Option<u32> {
        critical_section::with(|_| match self.word.load(Ordering::Acquire) {
            EMPTY => None,
            value => {
                self.word.store(EMPTY, Ordering::Release);
                Some(value)
            }
        })
    }

    /// Whether nothing is currently staged.
    pub fn is_empty(&self) -> bool {
        self.word.load(Ordering::Relaxed) == EMPTY
    }
}

impl Default for DutySlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let slot = DutySlot::new();
        assert!(slot.is_empty());
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn take_drains_the_slot() {
        let slot = DutySlot::new();
        slot.publish(42);
        assert!(!slot.is_empty());
        assert_eq!(slot.take(), Some(42));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn later_publish_wins() {
        let slot = DutySlot::new();
        slot.publish(6500);
        slot.publish(6501);
        assert_eq!(slot.take(), Some(6501));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn sentinel_values_pass_through() {
        let slot = DutySlot::new();
        slot.publish(u32::MAX);
        assert_eq!(slot.take(), Some(u32::MAX));
    }
}
