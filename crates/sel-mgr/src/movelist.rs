//! MoveList: the ordered log of placement mutations handed to the
//! hardware-programming layer.
//!
//! Nodes are append-only. A failed call truncates back to the mark taken
//! when the call started, so the consumer never sees a partial operation.

use pipe_sel_types::{GroupHandle, MemberHandle, PipeId};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveOp {
    GroupCreate,
    GroupDestroy,
    Add,
    Del,
    Activate,
    Deactivate,
    SetFallback,
    ClrFallback,
}

impl fmt::Display for MoveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MoveOp::GroupCreate => "GRP_CREATE",
            MoveOp::GroupDestroy => "GRP_DESTROY",
            MoveOp::Add => "ADD",
            MoveOp::Del => "DEL",
            MoveOp::Activate => "ACTIVATE",
            MoveOp::Deactivate => "DEACTIVATE",
            MoveOp::SetFallback => "SET_FALLBACK",
            MoveOp::ClrFallback => "CLR_FALLBACK",
        };
        write!(f, "{}", s)
    }
}

/// One recorded mutation.
///
/// For member operations `logical_index` is the word inside the group and
/// `logical_subindex` the slot inside that word. For `GroupCreate` they
/// carry the word count and entries per word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveListNode {
    pub op: MoveOp,
    pub pipe: PipeId,
    pub group: GroupHandle,
    pub member: MemberHandle,
    pub logical_index: u32,
    pub logical_subindex: u32,
    /// Action data table index of this location in every stage, in stage order.
    pub per_stage_action_index: Vec<u32>,
    pub disabled: bool,
    /// The location held another member that this write overwrites.
    pub replace: bool,
}

impl MoveListNode {
    pub fn new(op: MoveOp, pipe: PipeId, group: GroupHandle) -> Self {
        Self {
            op,
            pipe,
            group,
            member: MemberHandle::NULL,
            logical_index: 0,
            logical_subindex: 0,
            per_stage_action_index: Vec::new(),
            disabled: false,
            replace: false,
        }
    }
}

impl fmt::Display for MoveListNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} grp {} mbr {} [{}:{}]",
            self.op, self.pipe, self.group, self.member, self.logical_index, self.logical_subindex
        )?;
        if self.disabled {
            write!(f, " disabled")?;
        }
        if self.replace {
            write!(f, " replace")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveList {
    nodes: Vec<MoveListNode>,
}

impl MoveList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: MoveListNode) {
        self.nodes.push(node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current length, to be passed to [`MoveList::truncate`] on failure.
    pub fn mark(&self) -> usize {
        self.nodes.len()
    }

    pub fn truncate(&mut self, mark: usize) {
        self.nodes.truncate(mark);
    }

    pub fn iter(&self) -> impl Iterator<Item = &MoveListNode> {
        self.nodes.iter()
    }

    pub fn nodes(&self) -> &[MoveListNode] {
        &self.nodes
    }

    /// Nodes recorded since `mark`.
    pub fn since(&self, mark: usize) -> &[MoveListNode] {
        &self.nodes[mark.min(self.nodes.len())..]
    }

    /// Hands every recorded node to the consumer and leaves the list empty.
    pub fn take(&mut self) -> MoveList {
        std::mem::take(self)
    }

    /// Nodes touching one member, in order.
    pub fn for_member(&self, member: MemberHandle) -> impl Iterator<Item = &MoveListNode> {
        self.nodes.iter().filter(move |n| n.member == member)
    }

    /// Number of nodes with the given operation.
    pub fn count_op(&self, op: MoveOp) -> usize {
        self.nodes.iter().filter(|n| n.op == op).count()
    }
}

impl IntoIterator for MoveList {
    type Item = MoveListNode;
    type IntoIter = std::vec::IntoIter<MoveListNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}
