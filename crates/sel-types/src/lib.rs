//! Common types for the pipeline selector table manager.
//!
//! This crate provides the type-safe primitives shared by every layer of the
//! selector table control plane:
//!
//! - [`Handle`]: typed 32-bit handles (group, member, action function, ...)
//! - [`PipeId`], [`StageId`], [`PipeBitmap`]: pipeline addressing
//! - [`SelError`], [`SelStatus`]: the error taxonomy and its status codes

mod error;
mod handle;
mod pipe;

pub use error::{SelError, SelResult, SelStatus};
pub use handle::{
    ActionFnHandle, ActionFnKind, GroupHandle, GroupKind, Handle, HandleKind, MatchEntryHandle,
    MatchEntryKind, MatchTableHandle, MatchTableKind, MemberHandle, MemberKind, RawHandle,
    TableHandle, TableKind, TEMP_HANDLE_BIT,
};
pub use pipe::{PipeBitmap, PipeId, StageId, MAX_PIPES};
