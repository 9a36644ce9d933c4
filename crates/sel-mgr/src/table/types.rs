//! Group, member and table instance records.

use crate::packing::{GroupStageInfo, Location};
use crate::placement::{StageInfo, StagePlacement, WordInfo};
use pipe_sel_types::{
    ActionFnHandle, GroupHandle, MatchEntryHandle, MatchTableHandle, MemberHandle, PipeBitmap,
    PipeId,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MemberState {
    Active,
    Inactive,
}

impl MemberState {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            MemberState::Active
        } else {
            MemberState::Inactive
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, MemberState::Active)
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberState::Active => write!(f, "active"),
            MemberState::Inactive => write!(f, "inactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub handle: MemberHandle,
    /// Number of placements ("wcmp" weight).
    pub weight: u32,
    pub state: MemberState,
    /// Insertion ranks, one per placement, when the table keeps sequence order.
    pub positions: Option<Vec<u32>>,
}

impl Member {
    pub fn new(handle: MemberHandle, weight: u32, state: MemberState) -> Self {
        Self {
            handle,
            weight,
            state,
            positions: None,
        }
    }

    pub fn ranks(&self) -> Vec<u32> {
        self.positions.clone().unwrap_or_default()
    }

    fn first_rank(&self) -> u32 {
        self.positions
            .as_ref()
            .and_then(|p| p.first().copied())
            .unwrap_or(u32::MAX)
    }
}

/// Member as listed by callers of `group_members_set` and HA replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberSpec {
    pub handle: MemberHandle,
    pub weight: u32,
    pub enabled: bool,
}

impl MemberSpec {
    pub fn new(handle: MemberHandle, weight: u32, enabled: bool) -> Self {
        Self { handle, weight, enabled }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub handle: GroupHandle,
    pub group_id: u32,
    pub max_size: u32,
    /// Distinct members.
    pub num_members: u32,
    /// Distinct active members.
    pub num_active: u32,
    /// Shared by every member; fixed by the first member added.
    pub action_fn: Option<ActionFnHandle>,
    pub members: BTreeMap<MemberHandle, Member>,
    pub references: BTreeSet<(MatchTableHandle, MatchEntryHandle)>,
    /// One layout per table stage, in stage order.
    pub stages: Vec<GroupStageInfo>,
    pub next_rank: u32,
}

impl Group {
    pub fn new(handle: GroupHandle, group_id: u32, max_size: u32, stages: Vec<GroupStageInfo>) -> Self {
        Self {
            handle,
            group_id,
            max_size,
            num_members: 0,
            num_active: 0,
            action_fn: None,
            members: BTreeMap::new(),
            references: BTreeSet::new(),
            stages,
            next_rank: 0,
        }
    }

    /// Placements across all members, weight included.
    pub fn placements(&self) -> u32 {
        self.members.values().map(|m| m.weight).sum()
    }

    pub fn word_info(&self) -> Option<WordInfo> {
        self.stages.first().map(|s| s.info)
    }

    pub fn placements_per_stage(&self) -> Vec<StagePlacement> {
        self.stages.iter().map(|s| s.placement).collect()
    }

    pub fn is_referenced(&self) -> bool {
        !self.references.is_empty()
    }

    /// Recounts the member totals from the member map.
    pub fn refresh_counts(&mut self) {
        self.num_members = self.members.len() as u32;
        self.num_active = self.members.values().filter(|m| m.state.is_active()).count() as u32;
        if self.members.is_empty() {
            self.action_fn = None;
        }
    }

    /// Members ordered by first insertion rank, then handle.
    pub fn members_in_order(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.values().cloned().collect();
        members.sort_by_key(|m| (m.first_rank(), m.handle));
        members
    }

    /// Location of every placement in stage 0.
    pub fn locations(&self, member: MemberHandle) -> Vec<Location> {
        self.stages.first().map(|s| s.locations(member)).unwrap_or_default()
    }
}

/// Per-pipe (or shared, when symmetric) table state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInstance {
    /// `PipeId::ALL` for the shared instance of a symmetric table.
    pub pipe: PipeId,
    pub scope: PipeBitmap,
    pub stages: Vec<StageInfo>,
    pub groups: BTreeMap<GroupHandle, Group>,
}

impl TableInstance {
    pub fn new(pipe: PipeId, scope: PipeBitmap, stages: Vec<StageInfo>) -> Self {
        Self {
            pipe,
            scope,
            stages,
            groups: BTreeMap::new(),
        }
    }

    /// Pipe used when addressing shadow memory and the action table.
    pub fn hw_pipe(&self) -> PipeId {
        if self.pipe.is_all() {
            self.scope.first().unwrap_or(PipeId(0))
        } else {
            self.pipe
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelTableStats {
    pub groups_created: u64,
    pub groups_destroyed: u64,
    pub groups_resized: u64,
    pub members_added: u64,
    pub members_removed: u64,
    pub activations: u64,
    pub deactivations: u64,
    pub spreads: u64,
    pub converges: u64,
    pub rollbacks: u64,
    pub words_synced: u64,
    pub ha_groups_decoded: u64,
    pub ha_groups_matched: u64,
    pub ha_groups_created: u64,
    pub ha_groups_cleaned: u64,
    pub ha_handles_substituted: u64,
}
