//! Selector table configuration.
//!
//! A table is described once, at pipeline profile load, by a
//! [`SelectorTableConfig`]. The JSON form mirrors what the profile loader
//! hands over:
//!
//! ```json
//! {
//!   "name": "ecmp_sel",
//!   "table_handle": 4097,
//!   "mode": "resilient",
//!   "max_group_size": 150,
//!   "stages": [{ "stage_id": 2, "ram_words": 1024 }],
//!   "pipes": [0, 1]
//! }
//! ```

use pipe_sel_types::{PipeId, SelError, SelResult, StageId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Hardware word width: member slots in one selector RAM row.
pub const DEFAULT_WORD_WIDTH: u32 = 120;

/// Below this many entries per word the word allocator cannot manage
/// multi-word groups efficiently.
pub const DEFAULT_MIN_MULTIWORD_ENTRIES: u32 = 65;

/// Largest word width the word image format can carry.
pub const MAX_WORD_WIDTH: u32 = 128;

/// Member selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Round-robin rank among active members.
    Fair,
    /// Power-of-choices hashing with a cyclic fallback scan.
    Resilient,
}

impl std::fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionMode::Fair => write!(f, "fair"),
            SelectionMode::Resilient => write!(f, "resilient"),
        }
    }
}

/// One stage the selector table is laid out in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub stage_id: StageId,
    /// Number of selector RAM words available in this stage.
    pub ram_words: u32,
}

/// Pre-reserved group placements of a fixed size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub group_size: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorTableConfig {
    pub name: String,
    pub table_handle: u32,
    #[serde(default)]
    pub device: u32,
    /// Handle of the paired action data table.
    #[serde(default)]
    pub adt_table_handle: u32,
    pub mode: SelectionMode,
    #[serde(default)]
    pub symmetric: bool,
    /// Preserve insertion order instead of balancing words.
    #[serde(default)]
    pub sequence_order: bool,
    pub max_group_size: u32,
    #[serde(default = "default_word_width")]
    pub word_width: u32,
    #[serde(default = "default_min_multiword_entries")]
    pub min_multiword_entries: u32,
    #[serde(default)]
    pub scramble_enable: bool,
    pub stages: Vec<StageConfig>,
    pub pipes: Vec<PipeId>,
    #[serde(default)]
    pub profile: Option<Vec<ProfileEntry>>,
}

fn default_word_width() -> u32 {
    DEFAULT_WORD_WIDTH
}

fn default_min_multiword_entries() -> u32 {
    DEFAULT_MIN_MULTIWORD_ENTRIES
}

impl SelectorTableConfig {
    /// Minimal config used by tests and by callers building tables in code.
    pub fn new(name: impl Into<String>, mode: SelectionMode, max_group_size: u32) -> Self {
        Self {
            name: name.into(),
            table_handle: 1,
            device: 0,
            adt_table_handle: 0,
            mode,
            symmetric: true,
            sequence_order: false,
            max_group_size,
            word_width: DEFAULT_WORD_WIDTH,
            min_multiword_entries: DEFAULT_MIN_MULTIWORD_ENTRIES,
            scramble_enable: false,
            stages: vec![StageConfig {
                stage_id: StageId(0),
                ram_words: 1024,
            }],
            pipes: vec![PipeId(0)],
            profile: None,
        }
    }

    pub fn from_json_str(json: &str) -> SelResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SelError::invalid_argument(format!("config parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SelResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            SelError::invalid_argument(format!("config read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Largest power-of-two word count that fits in every stage.
    pub fn max_words_per_group(&self) -> u32 {
        let smallest = self.stages.iter().map(|s| s.ram_words).min().unwrap_or(0);
        if smallest == 0 {
            0
        } else {
            1 << (31 - smallest.leading_zeros())
        }
    }

    pub fn validate(&self) -> SelResult<()> {
        if self.stages.is_empty() {
            return Err(SelError::invalid_argument("table has no stages"));
        }
        if self.pipes.is_empty() {
            return Err(SelError::invalid_argument("table has no pipes"));
        }
        if self.word_width == 0 || self.word_width > MAX_WORD_WIDTH {
            return Err(SelError::invalid_argument(format!(
                "word width {} outside 1..={}",
                self.word_width, MAX_WORD_WIDTH
            )));
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.ram_words == 0 {
                return Err(SelError::invalid_argument(format!(
                    "{} has no RAM words",
                    stage.stage_id
                )));
            }
            if !seen.insert(stage.stage_id) {
                return Err(SelError::invalid_argument(format!(
                    "duplicate {}",
                    stage.stage_id
                )));
            }
        }
        let capacity = self.word_width as u64 * self.max_words_per_group() as u64;
        if self.max_group_size == 0 || self.max_group_size as u64 > capacity {
            return Err(SelError::invalid_argument(format!(
                "max group size {} outside 1..={}",
                self.max_group_size, capacity
            )));
        }
        if let Some(profile) = &self.profile {
            for entry in profile {
                if entry.group_size == 0 || entry.group_size > self.max_group_size {
                    return Err(SelError::invalid_argument(format!(
                        "profile group size {} outside 1..={}",
                        entry.group_size, self.max_group_size
                    )));
                }
            }
        }
        Ok(())
    }
}
