//! Group placement engine.
//!
//! Computes packing parameters for a group size ([`word_info`]) and reserves
//! or releases a contiguous, power-of-two sized word range in every stage of
//! a table instance, in lockstep with the paired action data table.

mod alloc;
mod engine;
mod stage;
mod types;

pub use alloc::PowerOfTwoAllocator;
pub use engine::{AdtJournal, PlacementEngine, WordRequest};
pub use stage::{ProfileSlot, StageInfo};
pub use types::{word_info, AdtRange, StagePlacement, WordInfo};
