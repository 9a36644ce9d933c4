//! Restart bookkeeping: what the hardware holds and what replay intends.

use crate::context::ActionData;
use crate::table::{MemberSpec, TableInstance};
use pipe_sel_types::{
    ActionFnHandle, GroupHandle, MatchEntryHandle, MatchTableHandle, MemberHandle,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Per-stage half of a match entry's selector pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StagePointer {
    pub word_base: u32,
    pub adt_base: u32,
}

/// Selector pointer as found in a decoded match entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectorPointer {
    /// Words the group spans, a power of two.
    pub no_words: u32,
    /// One entry per table stage, in stage order.
    pub stages: Vec<StagePointer>,
}

impl SelectorPointer {
    pub fn new(no_words: u32, stages: Vec<StagePointer>) -> Self {
        Self { no_words, stages }
    }

    /// Stage-0 word base, the key decoded and replayed groups are joined on.
    pub fn base(&self) -> Option<u32> {
        self.stages.first().map(|s| s.word_base)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecodeState {
    /// Rebuilt from hardware, no replayed group bound to it yet.
    DecodedOnly,
    /// A replayed group is bound to it.
    Matched,
}

impl fmt::Display for DecodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeState::DecodedOnly => write!(f, "decoded-only"),
            DecodeState::Matched => write!(f, "matched"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedGroup {
    /// Temporary handle the group lives under until reconciliation.
    pub handle: GroupHandle,
    pub pointer: SelectorPointer,
    pub state: DecodeState,
}

/// A group as the application replayed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayInfo {
    pub handle: GroupHandle,
    /// Index of the table instance the group belongs to.
    pub instance: usize,
    pub group_id: u32,
    pub max_size: u32,
    /// Intended members in replay order.
    pub members: Vec<MemberSpec>,
    pub action_fn: Option<ActionFnHandle>,
    pub references: BTreeSet<(MatchTableHandle, MatchEntryHandle)>,
    /// Stage-0 word base of the decoded group this one binds to.
    pub sel_base: Option<u32>,
}

impl ReplayInfo {
    pub fn new(handle: GroupHandle, instance: usize, group_id: u32, max_size: u32) -> Self {
        Self {
            handle,
            instance,
            group_id,
            max_size,
            members: Vec::new(),
            action_fn: None,
            references: BTreeSet::new(),
            sel_base: None,
        }
    }

    pub fn placements(&self) -> u32 {
        self.members.iter().map(|m| m.weight).sum()
    }

    pub fn position(&self, member: MemberHandle) -> Option<usize> {
        self.members.iter().position(|m| m.handle == member)
    }
}

/// State of a table between `ha_begin` and `ha_reconcile`.
#[derive(Debug, Clone)]
pub struct HaState {
    /// Instances as they were when the restart began.
    pub(crate) cold: Vec<TableInstance>,
    /// Decoded groups keyed by (instance, stage-0 word base).
    pub decoded: BTreeMap<(usize, u32), DecodedGroup>,
    /// Action data behind every temporary member handle.
    pub member_data: BTreeMap<MemberHandle, ActionData>,
    pub decoded_fallback: Option<ActionData>,
    pub replay: BTreeMap<GroupHandle, ReplayInfo>,
    pub replay_fallback: Option<MemberHandle>,
    next_temp_group: u32,
    next_temp_member: u32,
}

impl HaState {
    pub(crate) fn new(cold: Vec<TableInstance>) -> Self {
        Self {
            cold,
            decoded: BTreeMap::new(),
            member_data: BTreeMap::new(),
            decoded_fallback: None,
            replay: BTreeMap::new(),
            replay_fallback: None,
            next_temp_group: 1,
            next_temp_member: 1,
        }
    }

    pub(crate) fn mint_group(&mut self) -> GroupHandle {
        let handle = GroupHandle::temporary(self.next_temp_group);
        self.next_temp_group += 1;
        handle
    }

    pub(crate) fn mint_member(&mut self, data: ActionData) -> MemberHandle {
        let handle = MemberHandle::temporary(self.next_temp_member);
        self.next_temp_member += 1;
        self.member_data.insert(handle, data);
        handle
    }

    /// The decoded group living under temporary handle `handle`.
    pub fn decoded_by_handle(&self, handle: GroupHandle) -> Option<&DecodedGroup> {
        self.decoded.values().find(|d| d.handle == handle)
    }

    pub fn replay_of(&self, handle: GroupHandle) -> Option<&ReplayInfo> {
        self.replay.get(&handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_handles_are_distinct() {
        let mut ha = HaState::new(Vec::new());
        let g1 = ha.mint_group();
        let g2 = ha.mint_group();
        assert!(g1.is_temporary() && g2.is_temporary());
        assert_ne!(g1, g2);

        let m = ha.mint_member(ActionData::new(vec![1, 2]));
        assert!(m.is_temporary());
        assert_eq!(ha.member_data.get(&m), Some(&ActionData::new(vec![1, 2])));
    }

    #[test]
    fn test_replay_info_placements() {
        let mut info = ReplayInfo::new(GroupHandle::from_raw_unchecked(4), 0, 9, 16);
        info.members.push(MemberSpec::new(MemberHandle::from_raw_unchecked(1), 3, true));
        info.members.push(MemberSpec::new(MemberHandle::from_raw_unchecked(2), 1, false));
        assert_eq!(info.placements(), 4);
        assert_eq!(info.position(MemberHandle::from_raw_unchecked(2)), Some(1));
    }

    #[test]
    fn test_pointer_base() {
        let p = SelectorPointer::new(2, vec![StagePointer { word_base: 6, adt_base: 100 }]);
        assert_eq!(p.base(), Some(6));
        assert_eq!(SelectorPointer::new(1, Vec::new()).base(), None);
    }
}
