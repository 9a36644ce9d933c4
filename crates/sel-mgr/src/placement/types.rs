//! Placement parameters and reservations.

use pipe_sel_types::{PipeId, SelError, SelResult, StageId};

/// Packing parameters of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WordInfo {
    /// Word count, always a power of two.
    pub no_words: u32,
    pub entries_per_word: u32,
}

impl WordInfo {
    /// Total member slots across all words.
    pub fn capacity(&self) -> u32 {
        self.no_words * self.entries_per_word
    }

    /// True when a placement with these parameters can hold `other`'s groups.
    pub fn fits(&self, other: &WordInfo) -> bool {
        self.no_words == other.no_words && self.entries_per_word >= other.entries_per_word
    }
}

/// Computes word count and entries per word for a group of `size` members.
///
/// `no_words` is the power of two covering `ceil(size / word_width)`; the
/// entries are spread evenly across those words. Multi-word groups get at
/// least `min_multiword_entries` entries per word (capped at the word width).
pub fn word_info(size: u32, word_width: u32, min_multiword_entries: u32) -> SelResult<WordInfo> {
    if size == 0 {
        return Err(SelError::invalid_argument("group size 0"));
    }
    if word_width == 0 {
        return Err(SelError::invalid_argument("word width 0"));
    }
    let no_words = size.div_ceil(word_width).next_power_of_two();
    let mut entries_per_word = size.div_ceil(no_words);
    let floor = min_multiword_entries.min(word_width);
    if no_words > 1 && entries_per_word < floor {
        entries_per_word = floor;
    }
    Ok(WordInfo {
        no_words,
        entries_per_word,
    })
}

/// Where a group lives in one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlacement {
    pub stage: StageId,
    /// Position of the stage in the table's stage list.
    pub stage_idx: usize,
    pub base_word: u32,
    pub adt_base: u32,
    /// Taken from a pre-reserved profile slot rather than the allocators.
    pub from_profile: bool,
}

impl StagePlacement {
    /// Action data table index of a slot.
    pub fn action_index(&self, entries_per_word: u32, word: u32, slot: u32) -> u32 {
        self.adt_base + word * entries_per_word + slot
    }
}

/// An action data table range owned by a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtRange {
    pub pipe: PipeId,
    pub stage: StageId,
    pub base: u32,
    pub count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MIN_MULTIWORD_ENTRIES, DEFAULT_WORD_WIDTH};

    #[test]
    fn test_word_info_single_word() {
        let wi = word_info(10, 120, 65).unwrap();
        assert_eq!(wi, WordInfo { no_words: 1, entries_per_word: 10 });
        let wi = word_info(120, 120, 65).unwrap();
        assert_eq!(wi, WordInfo { no_words: 1, entries_per_word: 120 });
    }

    #[test]
    fn test_word_info_multi_word_floor() {
        // 121 entries need two words; 61 per word is raised to the floor.
        let wi = word_info(121, 120, 65).unwrap();
        assert_eq!(wi, WordInfo { no_words: 2, entries_per_word: 65 });
    }

    #[test]
    fn test_word_info_150_in_128_wide_words() {
        let wi = word_info(150, 128, 65).unwrap();
        assert_eq!(wi, WordInfo { no_words: 2, entries_per_word: 75 });
    }

    #[test]
    fn test_word_info_rounds_to_power_of_two() {
        // 3 words worth of members rounds up to 4 words.
        let wi = word_info(300, 120, 65).unwrap();
        assert_eq!(wi.no_words, 4);
        assert_eq!(wi.entries_per_word, 75);
    }

    #[test]
    fn test_word_info_properties_all_sizes() {
        let max = DEFAULT_WORD_WIDTH * 16;
        for size in 1..=max {
            let wi = word_info(size, DEFAULT_WORD_WIDTH, DEFAULT_MIN_MULTIWORD_ENTRIES).unwrap();
            assert!(wi.no_words.is_power_of_two(), "size {}", size);
            assert!(wi.capacity() >= size, "size {}", size);
            assert!(wi.entries_per_word <= DEFAULT_WORD_WIDTH, "size {}", size);
            if wi.no_words > 1 {
                assert!(wi.entries_per_word >= DEFAULT_MIN_MULTIWORD_ENTRIES, "size {}", size);
            }
        }
    }

    #[test]
    fn test_word_info_rejects_zero() {
        assert!(word_info(0, 120, 65).is_err());
    }

    #[test]
    fn test_fits() {
        let big = WordInfo { no_words: 2, entries_per_word: 80 };
        let small = WordInfo { no_words: 2, entries_per_word: 65 };
        assert!(big.fits(&small));
        assert!(!small.fits(&big));
        assert!(!big.fits(&WordInfo { no_words: 1, entries_per_word: 10 }));
    }

    #[test]
    fn test_action_index() {
        let sp = StagePlacement {
            stage: StageId(0),
            stage_idx: 0,
            base_word: 4,
            adt_base: 1000,
            from_profile: false,
        };
        assert_eq!(sp.action_index(75, 1, 3), 1078);
    }
}
