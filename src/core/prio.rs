//! Priority bitmap management for O(1) highest-ready lookup
//!
//! Each bit represents a priority level; a set bit means at least one task
//! at that priority is `Ready`. Priority `p` lives in bit `p % 32` of word
//! `p / 32`, so the highest ready priority is found from the top word down
//! with a single leading-zeros count.

use crate::config::CFG_PRIO_MAX;
use crate::types::OsPrio;

/// Number of words needed for the priority bitmap
const PRIO_TBL_SIZE: usize = CFG_PRIO_MAX.div_ceil(32);

/// Priority bitmap table
#[derive(Debug, Clone, Copy)]
pub struct PrioTable {
    bitmap: [u32; PRIO_TBL_SIZE],
}

impl PrioTable {
    pub const fn new() -> Self {
        PrioTable {
            bitmap: [0; PRIO_TBL_SIZE],
        }
    }

    /// Insert a priority into the bitmap
    #[inline]
    pub fn insert(&mut self, prio: OsPrio) {
        debug_assert!((prio as usize) < CFG_PRIO_MAX);

        let (word_idx, bit) = Self::locate(prio);
        self.bitmap[word_idx] |= bit;
    }

    /// Remove a priority from the bitmap
    #[inline]
    pub fn remove(&mut self, prio: OsPrio) {
        debug_assert!((prio as usize) < CFG_PRIO_MAX);

        let (word_idx, bit) = Self::locate(prio);
        self.bitmap[word_idx] &= !bit;
    }

    /// Get the highest set priority, or `None` when nothing is ready
    #[inline]
    pub fn get_highest(&self) -> Option<OsPrio> {
        self.bitmap
            .iter()
            .enumerate()
            .rev()
            .find(|(_, &word)| word != 0)
            .map(|(idx, &word)| (idx * 32 + 31 - word.leading_zeros() as usize) as OsPrio)
    }

    /// Check if a specific priority has any ready tasks
    #[inline]
    pub fn is_set(&self, prio: OsPrio) -> bool {
        let (word_idx, bit) = Self::locate(prio);
        (self.bitmap[word_idx] & bit) != 0
    }

    /// Check if the priority table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|&w| w == 0)
    }

    #[inline(always)]
    fn locate(prio: OsPrio) -> (usize, u32) {
        ((prio / 32) as usize, 1 << (prio % 32))
    }
}

impl Default for PrioTable {
    fn default() -> Self {
        Self::new()
    }
}
