//! Hash input layout.

use std::fmt;

pub const DRAW_BITS: u32 = 14;
pub const DRAW_COUNT: u32 = 3;
pub const PLAN_B_BITS: u32 = 18;
pub const WORD_SELECT_BITS: u32 = 15;

const PLAN_B_SHIFT: u32 = DRAW_BITS * DRAW_COUNT;
const WORD_SELECT_SHIFT: u32 = PLAN_B_SHIFT + PLAN_B_BITS;

/// Hash value handed to the selector by the pipeline.
///
/// | Bits      | Field                     |
/// |-----------|---------------------------|
/// | `[0,14)`  | draw 0                    |
/// | `[14,28)` | draw 1                    |
/// | `[28,42)` | draw 2                    |
/// | `[42,60)` | plan-B seed               |
/// | `[60,75)` | word selector             |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SelHash(pub u128);

impl SelHash {
    fn bits(&self, shift: u32, width: u32) -> u32 {
        ((self.0 >> shift) & ((1u128 << width) - 1)) as u32
    }

    /// One of the three 14-bit resilient draws.
    pub fn draw(&self, i: u32) -> u32 {
        self.bits(i.min(DRAW_COUNT - 1) * DRAW_BITS, DRAW_BITS)
    }

    pub fn plan_b(&self) -> u32 {
        self.bits(PLAN_B_SHIFT, PLAN_B_BITS)
    }

    pub fn word_selector(&self) -> u32 {
        self.bits(WORD_SELECT_SHIFT, WORD_SELECT_BITS)
    }

    /// Builds a hash from its fields; each is truncated to its width.
    pub fn from_fields(draws: [u32; 3], plan_b: u32, word_selector: u32) -> Self {
        let mut v = 0u128;
        for (i, d) in draws.iter().enumerate() {
            v |= ((*d & ((1 << DRAW_BITS) - 1)) as u128) << (i as u32 * DRAW_BITS);
        }
        v |= ((plan_b & ((1 << PLAN_B_BITS) - 1)) as u128) << PLAN_B_SHIFT;
        v |= ((word_selector & ((1 << WORD_SELECT_BITS) - 1)) as u128) << WORD_SELECT_SHIFT;
        Self(v)
    }
}

impl fmt::Display for SelHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_extraction() {
        let h = SelHash::from_fields([0x1234, 0x2abc, 0x3fff], 0x2_5a5a, 0x7001);
        assert_eq!(h.draw(0), 0x1234);
        assert_eq!(h.draw(1), 0x2abc);
        assert_eq!(h.draw(2), 0x3fff);
        assert_eq!(h.plan_b(), 0x2_5a5a);
        assert_eq!(h.word_selector(), 0x7001);
    }

    #[test]
    fn test_fields_truncate() {
        let h = SelHash::from_fields([0xffff, 0, 0], 0, 0);
        assert_eq!(h.draw(0), 0x3fff);
        assert_eq!(h.draw(1), 0);
    }
}
