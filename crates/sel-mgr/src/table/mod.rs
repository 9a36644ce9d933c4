//! Selector table: per-pipe instances, the group / member API, per-call
//! transactions and the hardware word image.

pub mod hw;
mod orch;
mod txn;
mod types;

pub use orch::SelectorTable;
pub use types::{Group, Member, MemberSpec, MemberState, SelTableStats, TableInstance};
