//! Member packing.
//!
//! Keeps the per-stage word layout of a group in one of two shapes:
//!
//! - **duplicated**: every word holds the same members at the same slots
//!   (while the group fits in one word)
//! - **spread**: distinct members distributed across words, word usage
//!   differing by at most one
//!
//! Every mutation returns the slot-level changes it made so the table can
//! turn them into MoveList nodes and update callbacks.

mod ops;
mod types;

pub use types::{GroupStageInfo, Location, SlotChange, SlotOp, WordData};

use pipe_sel_types::{MemberHandle, SelError};
use std::collections::BTreeSet;
use thiserror::Error;

/// Knobs for one packing call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackOptions<'a> {
    /// Place by insertion rank instead of balancing words.
    pub sequence_order: bool,
    /// Group size the rank formula divides across words.
    pub total_expected: u32,
    /// Members whose slots an add takes over before using a free slot.
    pub placeholders: Option<&'a BTreeSet<MemberHandle>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackError {
    #[error(transparent)]
    Sel(#[from] SelError),

    #[error("weighted operation failed after {applied} iterations: {source}")]
    Partial { applied: u32, source: SelError },
}

impl PackError {
    /// Iterations applied before the failure.
    pub fn applied(&self) -> u32 {
        match self {
            PackError::Sel(_) => 0,
            PackError::Partial { applied, .. } => *applied,
        }
    }

    pub fn into_sel(self) -> SelError {
        match self {
            PackError::Sel(e) => e,
            PackError::Partial { source, .. } => source,
        }
    }
}
