//! Pipeline addressing: pipes, stages and pipe scope bitmaps.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of pipes on one device.
pub const MAX_PIPES: u32 = 16;

/// A pipe identifier. [`PipeId::ALL`] addresses every pipe of a symmetric table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipeId(pub u32);

impl PipeId {
    pub const ALL: PipeId = PipeId(0xFFFF);

    pub fn is_all(&self) -> bool {
        *self == PipeId::ALL
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            write!(f, "pipe:all")
        } else {
            write!(f, "pipe:{}", self.0)
        }
    }
}

/// A match-action stage identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub u8);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage:{}", self.0)
    }
}

/// Set of pipes a table instance is scoped to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipeBitmap(u32);

impl PipeBitmap {
    pub fn empty() -> Self {
        Self(0)
    }

    /// Builds a bitmap from a list of pipes. Out of range pipes are ignored.
    pub fn from_pipes<I: IntoIterator<Item = PipeId>>(pipes: I) -> Self {
        let mut bitmap = Self::empty();
        for pipe in pipes {
            bitmap.set(pipe);
        }
        bitmap
    }

    pub fn set(&mut self, pipe: PipeId) {
        if pipe.0 < MAX_PIPES {
            self.0 |= 1 << pipe.0;
        }
    }

    pub fn contains(&self, pipe: PipeId) -> bool {
        pipe.0 < MAX_PIPES && self.0 & (1 << pipe.0) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Iterates the pipes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = PipeId> + '_ {
        (0..MAX_PIPES)
            .filter(move |p| self.0 & (1 << p) != 0)
            .map(PipeId)
    }

    /// Lowest pipe in the set.
    pub fn first(&self) -> Option<PipeId> {
        self.iter().next()
    }
}
