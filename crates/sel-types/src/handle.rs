//! Type-safe handle wrappers.
//!
//! Every object the selector manager tracks is named by a 32-bit handle. The
//! wrappers here keep a member handle from being passed where a group handle
//! is expected, while staying `Copy` and as cheap as the raw integer.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw handle value as carried on the wire and in the MoveList.
pub type RawHandle = u32;

/// Handles minted by the HA decoder carry this bit so they can never collide
/// with handles replayed by the application.
pub const TEMP_HANDLE_BIT: RawHandle = 0x8000_0000;

/// Marker trait for handle kinds.
pub trait HandleKind: Send + Sync + 'static {
    /// Returns the kind name for debugging.
    fn kind_name() -> &'static str;
}

/// A typed handle.
///
/// # Examples
///
/// ```
/// use pipe_sel_types::{GroupHandle, MemberHandle};
///
/// let grp = GroupHandle::from_raw(7).unwrap();
/// let mbr = MemberHandle::from_raw(7).unwrap();
/// assert_eq!(grp.as_raw(), mbr.as_raw());
///
/// // This would fail to compile:
/// // fn takes_group(g: GroupHandle) {}
/// // takes_group(mbr);
/// ```
pub struct Handle<T: HandleKind> {
    raw: RawHandle,
    _marker: PhantomData<T>,
}

impl<T: HandleKind> Handle<T> {
    /// The null handle.
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Creates a handle from a raw value, returning `None` for 0.
    pub fn from_raw(raw: RawHandle) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self::from_raw_unchecked(raw))
        }
    }

    /// Creates a handle from a raw value, including null.
    pub const fn from_raw_unchecked(raw: RawHandle) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Mints the `n`-th temporary handle of this kind.
    pub const fn temporary(n: u32) -> Self {
        Self::from_raw_unchecked(TEMP_HANDLE_BIT | (n & !TEMP_HANDLE_BIT))
    }

    pub const fn as_raw(&self) -> RawHandle {
        self.raw
    }

    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }

    /// Returns true for handles minted during HA decode.
    pub const fn is_temporary(&self) -> bool {
        self.raw & TEMP_HANDLE_BIT != 0
    }
}

impl<T: HandleKind> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: HandleKind> Copy for Handle<T> {}

impl<T: HandleKind> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:08x})", T::kind_name(), self.raw)
    }
}

impl<T: HandleKind> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.raw)
    }
}

impl<T: HandleKind> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: HandleKind> Eq for Handle<T> {}

impl<T: HandleKind> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: HandleKind> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T: HandleKind> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: HandleKind> Default for Handle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

// ============================================================================
// Handle Kind Markers
// ============================================================================

macro_rules! define_handle_kind {
    ($name:ident, $kind_name:literal, $alias:ident) => {
        #[doc = concat!("Marker type for ", $kind_name, " handles.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl HandleKind for $name {
            fn kind_name() -> &'static str {
                $kind_name
            }
        }

        #[doc = concat!("Typed ", $kind_name, " handle.")]
        pub type $alias = Handle<$name>;
    };
}

define_handle_kind!(TableKind, "SelTable", TableHandle);
define_handle_kind!(GroupKind, "SelGroup", GroupHandle);
define_handle_kind!(MemberKind, "SelMember", MemberHandle);
define_handle_kind!(ActionFnKind, "ActionFn", ActionFnHandle);
define_handle_kind!(MatchTableKind, "MatchTable", MatchTableHandle);
define_handle_kind!(MatchEntryKind, "MatchEntry", MatchEntryHandle);
