//! Software model of the member selection network.

use super::scramble::scramble;
use super::types::{SelHash, DRAW_BITS, DRAW_COUNT, PLAN_B_BITS, WORD_SELECT_BITS};
use crate::config::SelectionMode;
use crate::packing::{GroupStageInfo, WordData};
use pipe_sel_types::{MemberHandle, SelError, SelResult};

/// Selection parameters fixed per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    pub mode: SelectionMode,
    pub scramble: bool,
}

impl HashParams {
    fn field(&self, value: u32, width: u32) -> u32 {
        if self.scramble {
            scramble(value, width)
        } else {
            value
        }
    }
}

/// Word the hash lands in, before skipping words without active members.
pub fn select_word(no_words: u32, hash: SelHash, params: HashParams) -> u32 {
    if no_words <= 1 {
        return 0;
    }
    params.field(hash.word_selector(), WORD_SELECT_BITS) % no_words
}

/// Start offset of the plan-B scan: the 18-bit field folded to 7 bits by
/// XOR of its 7/7/4-bit slices.
fn plan_b_seed(value: u32) -> u32 {
    (value & 0x7f) ^ ((value >> 7) & 0x7f) ^ ((value >> 14) & 0xf)
}

/// Active bits of slots `0..len`, slot `i` at bit `i`.
fn active_mask(word: &WordData, len: u32) -> u128 {
    (0..len).filter(|s| word.is_active(*s)).fold(0, |acc, s| acc | (1u128 << s))
}

/// Rotates the low `len` bits of `bits` right by `by`.
fn rotate_within(bits: u128, by: u32, len: u32) -> u128 {
    if by == 0 || len == 0 {
        return bits;
    }
    let mask = if len >= 128 { u128::MAX } else { (1u128 << len) - 1 };
    ((bits >> by) | (bits << (len - by))) & mask
}

/// Cyclic priority encoder: the active vector is rotated so `start` lands
/// on bit 0, the lowest set bit wins, and its position is rotated back.
fn priority_encode(word: &WordData, start: u32, len: u32) -> Option<u32> {
    let rotated = rotate_within(active_mask(word, len), start, len);
    if rotated == 0 {
        return None;
    }
    Some((start + rotated.trailing_zeros()) % len)
}

/// Slot the hash selects inside one word, `None` if the word has no
/// active slot.
pub fn select_slot(word: &WordData, hash: SelHash, params: HashParams) -> Option<u32> {
    match params.mode {
        SelectionMode::Fair => {
            let active = word.active_count();
            if active == 0 {
                return None;
            }
            let rank = params.field(hash.draw(0), DRAW_BITS) % active;
            (0..word.capacity())
                .filter(|s| word.is_active(*s))
                .nth(rank as usize)
        }
        SelectionMode::Resilient => {
            let len = word.usage.min(word.capacity());
            if word.active_count() == 0 || len == 0 {
                return None;
            }
            for i in 0..DRAW_COUNT {
                let slot = params.field(hash.draw(i), DRAW_BITS) % len;
                if word.is_active(slot) {
                    return Some(slot);
                }
            }
            let seed = plan_b_seed(params.field(hash.plan_b(), PLAN_B_BITS)) % len;
            priority_encode(word, seed, len)
        }
    }
}

/// Resolves `hash` to a member of the group laid out in `gsi`.
///
/// A word without active members passes the lookup on to the next word
/// (cyclically) that has one. `NotFound` only when the whole group has no
/// active member.
pub fn resolve(gsi: &GroupStageInfo, hash: SelHash, params: HashParams) -> SelResult<MemberHandle> {
    let n = gsi.no_words();
    let first = select_word(n, hash, params);
    for i in 0..n {
        let w = (first + i) % n;
        let word = &gsi.words[w as usize];
        if let Some(slot) = select_slot(word, hash, params) {
            return word.member_at(slot).ok_or_else(|| {
                SelError::unexpected(format!("active slot {}:{} is empty", w, slot))
            });
        }
    }
    Err(SelError::not_found("active member in group"))
}
