//! Per-stage placement state.

use super::alloc::PowerOfTwoAllocator;
use super::types::WordInfo;
use pipe_sel_types::StageId;

/// A placement pre-reserved by a size profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSlot {
    pub base_word: u32,
    pub adt_base: u32,
    pub info: WordInfo,
}

/// RAM and allocator state of one stage of a table instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    pub stage_id: StageId,
    pub ram_words: u32,
    pub allocator: PowerOfTwoAllocator,
    pub free_slots: Vec<ProfileSlot>,
    pub used_slots: Vec<ProfileSlot>,
}

impl StageInfo {
    pub fn new(stage_id: StageId, ram_words: u32) -> Self {
        Self {
            stage_id,
            ram_words,
            allocator: PowerOfTwoAllocator::new(ram_words),
            free_slots: Vec::new(),
            used_slots: Vec::new(),
        }
    }

    pub fn has_profile(&self) -> bool {
        !self.free_slots.is_empty() || !self.used_slots.is_empty()
    }

    /// Moves the first free profile slot that fits `info` to the in-use list.
    /// With `base` set only the slot at that word qualifies.
    pub fn take_profile_slot(&mut self, info: &WordInfo, base: Option<u32>) -> Option<ProfileSlot> {
        let pos = self
            .free_slots
            .iter()
            .position(|s| s.info.fits(info) && base.map_or(true, |b| b == s.base_word))?;
        let slot = self.free_slots.remove(pos);
        self.used_slots.push(slot);
        Some(slot)
    }

    /// Returns an in-use profile slot to the free list.
    pub fn return_profile_slot(&mut self, base_word: u32) -> Option<ProfileSlot> {
        let pos = self.used_slots.iter().position(|s| s.base_word == base_word)?;
        let slot = self.used_slots.remove(pos);
        self.free_slots.push(slot);
        self.free_slots.sort_by_key(|s| s.base_word);
        Some(slot)
    }

    pub fn profile_slot_in_use(&self, base_word: u32) -> bool {
        self.used_slots.iter().any(|s| s.base_word == base_word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(base: u32, epw: u32) -> ProfileSlot {
        ProfileSlot {
            base_word: base,
            adt_base: base * 120,
            info: WordInfo { no_words: 1, entries_per_word: epw },
        }
    }

    #[test]
    fn test_profile_slot_lifecycle() {
        let mut stage = StageInfo::new(StageId(3), 64);
        stage.free_slots = vec![slot(0, 8), slot(1, 32)];
        assert!(stage.has_profile());

        let want = WordInfo { no_words: 1, entries_per_word: 16 };
        let taken = stage.take_profile_slot(&want, None).unwrap();
        assert_eq!(taken.base_word, 1);
        assert!(stage.profile_slot_in_use(1));
        assert!(stage.take_profile_slot(&want, None).is_none());

        stage.return_profile_slot(1).unwrap();
        assert!(!stage.profile_slot_in_use(1));
        assert_eq!(stage.free_slots.len(), 2);
    }

    #[test]
    fn test_profile_slot_at_base() {
        let mut stage = StageInfo::new(StageId(0), 64);
        stage.free_slots = vec![slot(0, 8), slot(1, 8)];
        let want = WordInfo { no_words: 1, entries_per_word: 4 };
        assert_eq!(stage.take_profile_slot(&want, Some(1)).unwrap().base_word, 1);
        assert!(stage.take_profile_slot(&want, Some(1)).is_none());
    }
}
