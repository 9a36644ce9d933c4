//! Pipeline selector table manager.
//!
//! Control plane for the selector tables of a match-action pipeline: groups
//! of weighted members one of which is chosen per packet by hash.
//!
//! # Architecture
//!
//! ```text
//! [caller] ──> [SelectorTable] ──> MoveList ──> [programming layer]
//!                    │
//!        ┌───────────┼──────────────┐
//!        ↓           ↓              ↓
//!   [placement]  [packing]    [shadow memory / ADT / DMA]
//! ```
//!
//! # Key Components
//!
//! - [`placement`]: word and action-table reservation per stage
//! - [`packing`]: duplicated / spread member layout inside a group
//! - [`hash`]: software model of the hardware member selection
//! - [`table::SelectorTable`]: the group and member API, transactions and
//!   hardware sync
//! - [`ha`]: restart decode, replay and reconciliation
//!
//! Collaborators (shadow memory, action data table, instruction sink and
//! update callback) are injected through [`context::SelContext`].

pub mod audit;
pub mod config;
pub mod context;
pub mod ha;
pub mod hash;
pub mod movelist;
pub mod packing;
pub mod placement;
pub mod table;

pub use audit::{AuditCategory, AuditOutcome, AuditRecord};
pub use config::{ProfileEntry, SelectionMode, SelectorTableConfig, StageConfig};
pub use context::{
    ActionData, ActionTableAllocator, Instruction, InstructionSink, MemAddr, MemType, SelContext,
    Session, ShadowMemory, UpdateCallback, UpdateEvent,
};
pub use ha::{HaState, SelectorPointer, StagePointer};
pub use hash::{HashParams, SelHash};
pub use movelist::{MoveList, MoveListNode, MoveOp};
pub use table::{Group, Member, MemberSpec, MemberState, SelTableStats, SelectorTable};
