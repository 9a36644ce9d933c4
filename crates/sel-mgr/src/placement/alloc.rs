//! Power-of-two word allocator.
//!
//! Hands out aligned blocks of `2^k` selector RAM words. Blocks are aligned
//! to their own size, so a block never straddles a larger block boundary and
//! first-fit keeps large runs intact.

use pipe_sel_types::{SelError, SelResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerOfTwoAllocator {
    capacity: u32,
    used: Vec<u64>,
    used_count: u32,
}

impl PowerOfTwoAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            used: vec![0; capacity.div_ceil(64) as usize],
            used_count: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn used_words(&self) -> u32 {
        self.used_count
    }

    pub fn free_words(&self) -> u32 {
        self.capacity - self.used_count
    }

    pub fn is_used(&self, word: u32) -> bool {
        word < self.capacity && self.used[(word / 64) as usize] & (1 << (word % 64)) != 0
    }

    fn check_count(&self, count: u32) -> SelResult<()> {
        if count == 0 || !count.is_power_of_two() {
            return Err(SelError::invalid_argument(format!(
                "word count {} is not a power of two",
                count
            )));
        }
        if count > self.capacity {
            return Err(SelError::no_space(format!(
                "{} words requested, stage holds {}",
                count, self.capacity
            )));
        }
        Ok(())
    }

    fn range_free(&self, base: u32, count: u32) -> bool {
        (base..base + count).all(|w| !self.is_used(w))
    }

    fn mark(&mut self, base: u32, count: u32, used: bool) {
        for w in base..base + count {
            let bit = 1u64 << (w % 64);
            let slot = &mut self.used[(w / 64) as usize];
            if used {
                *slot |= bit;
            } else {
                *slot &= !bit;
            }
        }
        if used {
            self.used_count += count;
        } else {
            self.used_count -= count;
        }
    }

    /// First-fit allocation of `count` words.
    pub fn alloc(&mut self, count: u32) -> SelResult<u32> {
        self.check_count(count)?;
        let mut base = 0;
        while base + count <= self.capacity {
            if self.range_free(base, count) {
                self.mark(base, count, true);
                return Ok(base);
            }
            base += count;
        }
        Err(SelError::no_space(format!(
            "no free block of {} words ({} of {} free)",
            count,
            self.free_words(),
            self.capacity
        )))
    }

    /// Allocates `count` words at an explicit base.
    pub fn alloc_at(&mut self, base: u32, count: u32) -> SelResult<()> {
        self.check_count(count)?;
        if base % count != 0 || base + count > self.capacity {
            return Err(SelError::invalid_argument(format!(
                "block {}+{} is misaligned or out of range",
                base, count
            )));
        }
        if !self.range_free(base, count) {
            return Err(SelError::already_exists(format!("word block {}+{}", base, count)));
        }
        self.mark(base, count, true);
        Ok(())
    }

    pub fn free(&mut self, base: u32, count: u32) -> SelResult<()> {
        if base + count > self.capacity || !(base..base + count).all(|w| self.is_used(w)) {
            return Err(SelError::unexpected(format!(
                "freeing unallocated word block {}+{}",
                base, count
            )));
        }
        self.mark(base, count, false);
        Ok(())
    }
}
