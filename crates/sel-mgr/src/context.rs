//! External collaborators and the context that carries them.
//!
//! The selector core never touches hardware directly. Everything it needs
//! from the outside world comes through the traits below, bundled in a
//! [`SelContext`] that is handed to each table at construction.

use pipe_sel_types::{
    ActionFnHandle, GroupHandle, MemberHandle, PipeId, SelResult, StageId,
};
use std::fmt;
use std::sync::Arc;

/// Caller-supplied session token. Mutating calls on one table instance are
/// serialized by the caller under a session; the core only records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Session(pub u32);

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess:{}", self.0)
    }
}

/// Action data of one action-table entry. HA reconciliation compares
/// members by this value, never by handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ActionData(pub Vec<u8>);

impl ActionData {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Kind of physical memory addressed in shadow memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemType {
    SelectorRam,
    ActionRam,
}

/// Physical address of one shadow memory line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemAddr {
    pub mem_type: MemType,
    pub mem_id: u32,
    pub line: u32,
}

impl MemAddr {
    pub fn selector_word(mem_id: u32, line: u32) -> Self {
        Self {
            mem_type: MemType::SelectorRam,
            mem_id,
            line,
        }
    }
}

/// Instruction appended to the caller's DMA/instruction batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    WriteSelWord {
        pipe: PipeId,
        stage: StageId,
        word: u32,
        data: Vec<u8>,
    },
}

/// Physical shadow memory.
pub trait ShadowMemory: Send + Sync {
    fn write(&self, pipe: PipeId, stage: StageId, addr: MemAddr, data: &[u8]) -> SelResult<()>;
    /// Returns `None` for a line that was never written.
    fn read_ref(&self, pipe: PipeId, stage: StageId, addr: MemAddr) -> SelResult<Option<Vec<u8>>>;
    fn copy(&self, pipe: PipeId, stage: StageId, src: MemAddr, dst: MemAddr) -> SelResult<()>;
}

/// The paired action data table allocator.
pub trait ActionTableAllocator: Send + Sync {
    /// Reserves `count` consecutive entries, returning the base index.
    fn reserve(&self, pipe: PipeId, stage: StageId, count: u32) -> SelResult<u32>;
    fn release(&self, pipe: PipeId, stage: StageId, base: u32, count: u32) -> SelResult<()>;
    /// Action data currently programmed at `index`.
    fn lookup(&self, pipe: PipeId, stage: StageId, index: u32) -> Option<ActionData>;
    /// Action data of a member entry.
    fn member_data(&self, member: MemberHandle) -> Option<ActionData>;
}

/// Instruction/DMA submission.
pub trait InstructionSink: Send + Sync {
    fn append(&self, session: Session, instruction: Instruction) -> SelResult<()>;
}

/// Arguments of one update notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub device: u32,
    pub adt_table: u32,
    pub action_fn: Option<ActionFnHandle>,
    pub group: GroupHandle,
    pub member: MemberHandle,
    pub logical_index: u32,
    pub is_add: bool,
}

impl UpdateEvent {
    /// The event that undoes this one.
    pub fn inverse(&self) -> Self {
        Self {
            is_add: !self.is_add,
            ..self.clone()
        }
    }
}

/// Synchronous notification for stage-0 placement changes.
pub trait UpdateCallback: Send + Sync {
    fn on_update(&self, session: Session, event: &UpdateEvent) -> SelResult<()>;
}

/// Collaborators injected into every table.
#[derive(Clone)]
pub struct SelContext {
    pub shadow: Arc<dyn ShadowMemory>,
    pub adt: Arc<dyn ActionTableAllocator>,
    pub instructions: Arc<dyn InstructionSink>,
    pub update_cb: Option<Arc<dyn UpdateCallback>>,
}

impl SelContext {
    pub fn new(
        shadow: Arc<dyn ShadowMemory>,
        adt: Arc<dyn ActionTableAllocator>,
        instructions: Arc<dyn InstructionSink>,
    ) -> Self {
        Self {
            shadow,
            adt,
            instructions,
            update_cb: None,
        }
    }

    pub fn with_update_callback(mut self, cb: Arc<dyn UpdateCallback>) -> Self {
        self.update_cb = Some(cb);
        self
    }
}

impl fmt::Debug for SelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelContext")
            .field("update_cb", &self.update_cb.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_event_inverse() {
        let event = UpdateEvent {
            device: 0,
            adt_table: 9,
            action_fn: None,
            group: GroupHandle::from_raw_unchecked(1),
            member: MemberHandle::from_raw_unchecked(2),
            logical_index: 5,
            is_add: true,
        };
        let inv = event.inverse();
        assert!(!inv.is_add);
        assert_eq!(inv.logical_index, 5);
        assert_eq!(inv.inverse(), event);
    }

    #[test]
    fn test_selector_word_addr() {
        let addr = MemAddr::selector_word(3, 17);
        assert_eq!(addr.mem_type, MemType::SelectorRam);
        assert_eq!(addr.line, 17);
    }
}
