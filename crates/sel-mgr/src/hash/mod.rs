//! Hash-based member resolution.
//!
//! A pure function of the packed word state and the hash input, matching
//! what the selector hardware picks for the same input.

mod resolve;
mod scramble;
mod types;

pub use resolve::{resolve, select_slot, select_word, HashParams};
pub use scramble::{scramble, SCRAMBLE_WIDTHS};
pub use types::{SelHash, DRAW_BITS, DRAW_COUNT, PLAN_B_BITS, WORD_SELECT_BITS};
