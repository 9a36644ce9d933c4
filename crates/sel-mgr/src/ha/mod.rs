//! HA restart.
//!
//! A restarting table is rebuilt in three steps:
//!
//! 1. **Decode** (LLP): `llp_decode_group` reads each group a match entry
//!    points at back from shadow memory under temporary handles.
//! 2. **Replay** (HLP): the application repeats its configuration through
//!    the normal API, which only records it, and binds every replayed group
//!    to a decoded base with `ha_bind_group`.
//! 3. **Reconcile**: `ha_reconcile` matches members by action data, keeps
//!    what hardware already holds and returns the MoveList of what differs.
//!    Decoded groups nobody bound are destroyed.

mod hlp;
mod llp;
mod replay;
mod types;

pub use types::{DecodeState, DecodedGroup, HaState, ReplayInfo, SelectorPointer, StagePointer};
