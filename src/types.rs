// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Common type aliases and handle types used throughout the crate

use core::fmt;

/// Virtual address type
pub type VAddr = usize;

/// Size type
pub type Size = usize;

/// Error code type (negative values indicate errors)
pub type Status = i32;

/// ============================================================================
/// Store Handles
/// ============================================================================

/// Handle to a backing store registered with the fault context
///
/// Handles are index + generation pairs into the store registry. A released
/// store bumps the generation of its slot, so stale handles are rejected
/// instead of dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId {
    index: u32,
    generation: u32,
}

impl StoreId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Registry slot index
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Slot generation this handle was issued for
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}.{}", self.index, self.generation)
    }
}

/// ============================================================================
/// Mapping Handles
/// ============================================================================

/// Caller-visible handle of an active file mapping
///
/// Identifiers are issued from a monotonic counter and retired on unmap;
/// an identifier is never handed out twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MappingId(pub(crate) u64);

impl MappingId {
    /// Raw identifier value
    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mapping#{}", self.0)
    }
}

/// Common status codes
pub mod status {
    use super::Status;

    pub const OK: Status = 0;
    pub const ERR_OUT_OF_BOUNDS: Status = -1;
    pub const ERR_READ_ONLY: Status = -2;
    pub const ERR_RESERVATION_EXHAUSTED: Status = -3;
    pub const ERR_INVALID_SIZE: Status = -4;
    pub const ERR_GROW_BEYOND_RESERVATION: Status = -5;
    pub const ERR_SOURCE_NOT_COMMITTED: Status = -6;
    pub const ERR_RANGE_OVERLAP: Status = -7;
    pub const ERR_FILE_NOT_FOUND: Status = -8;
    pub const ERR_FILE_ACCESS_DENIED: Status = -9;
    pub const ERR_UNKNOWN_MAPPING: Status = -10;
    pub const ERR_INVALID_STORE: Status = -11;
    pub const ERR_STORE_IN_USE: Status = -12;
    pub const ERR_FLUSH_FAILED: Status = -13;
    pub const ERR_IO: Status = -14;
    pub const ERR_HANDLER_INSTALL: Status = -15;
    pub const ERR_PROTECT: Status = -16;
    pub const ERR_PAGE_IN: Status = -17;
}
