// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Error types
//!
//! Every failure the crate reports to a caller is one of these variants.
//! Unclassified protection faults are deliberately absent: they never
//! become a value, the process terminates instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{status, MappingId, Size, Status, StoreId, VAddr};

/// Result type for memory operations
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Recoverable memory errors
#[derive(Debug, Error)]
pub enum Error {
    /// Access landed in a trapped guard range outside committed memory
    #[error("out-of-bounds access at {addr:#x}")]
    OutOfBoundsAccess { addr: VAddr },

    /// Write into a read-only file mapping
    #[error("write to read-only mapping at {addr:#x}")]
    ReadOnlyViolation { addr: VAddr },

    /// The host refused to reserve the virtual range
    #[error("cannot reserve {size:#x} bytes of address space")]
    ReservationExhausted {
        size: Size,
        #[source]
        source: io::Error,
    },

    /// Size or offset argument is zero, unaligned or inconsistent
    #[error("invalid size: {reason}")]
    InvalidSize { reason: &'static str },

    /// Growth request exceeds the reservation
    #[error("cannot grow to {requested:#x} bytes, reservation is {reserved:#x}")]
    GrowBeyondReservation { requested: Size, reserved: Size },

    /// Copy-on-write source has nothing committed
    #[error("{0} has no committed pages to share")]
    SourceNotCommitted(StoreId),

    /// Mapping range leaves committed memory or collides with another mapping
    #[error("range {offset:#x}+{length:#x} overlaps a mapping or leaves committed memory")]
    RangeOverlap { offset: Size, length: Size },

    /// Mapped file does not exist
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Mapped file cannot be opened with the requested access
    #[error("access denied: {}", .0.display())]
    FileAccessDenied(PathBuf),

    /// Mapping id is not active
    #[error("unknown {0}")]
    UnknownMapping(MappingId),

    /// Store handle is stale or was never issued
    #[error("invalid {0}")]
    InvalidStore(StoreId),

    /// Store still has file mappings layered on it
    #[error("{store} still has {mappings} active mapping(s)")]
    StoreInUse { store: StoreId, mappings: usize },

    /// Writing dirty pages back failed; the mapping is gone regardless
    #[error("flushing {id} failed")]
    FlushFailed {
        id: MappingId,
        #[source]
        source: io::Error,
    },

    /// Other file-system failure while mapping
    #[error("i/o error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading file content into a lazily populated page failed
    #[error("paging in {id} failed")]
    PageIn {
        id: MappingId,
        #[source]
        source: io::Error,
    },

    /// sigaction refused the fault handler
    #[error("cannot install fault handler")]
    HandlerInstall(#[source] io::Error),

    /// mprotect failed on a range we own
    #[error("cannot change protection of {addr:#x}+{len:#x}")]
    Protect {
        addr: VAddr,
        len: Size,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Convert error to status code
    pub fn as_raw(&self) -> Status {
        match self {
            Error::OutOfBoundsAccess { .. } => status::ERR_OUT_OF_BOUNDS,
            Error::ReadOnlyViolation { .. } => status::ERR_READ_ONLY,
            Error::ReservationExhausted { .. } => status::ERR_RESERVATION_EXHAUSTED,
            Error::InvalidSize { .. } => status::ERR_INVALID_SIZE,
            Error::GrowBeyondReservation { .. } => status::ERR_GROW_BEYOND_RESERVATION,
            Error::SourceNotCommitted(_) => status::ERR_SOURCE_NOT_COMMITTED,
            Error::RangeOverlap { .. } => status::ERR_RANGE_OVERLAP,
            Error::FileNotFound(_) => status::ERR_FILE_NOT_FOUND,
            Error::FileAccessDenied(_) => status::ERR_FILE_ACCESS_DENIED,
            Error::UnknownMapping(_) => status::ERR_UNKNOWN_MAPPING,
            Error::InvalidStore(_) => status::ERR_INVALID_STORE,
            Error::StoreInUse { .. } => status::ERR_STORE_IN_USE,
            Error::FlushFailed { .. } => status::ERR_FLUSH_FAILED,
            Error::Io { .. } => status::ERR_IO,
            Error::PageIn { .. } => status::ERR_PAGE_IN,
            Error::HandlerInstall(_) => status::ERR_HANDLER_INSTALL,
            Error::Protect { .. } => status::ERR_PROTECT,
        }
    }

    /// Whether this error came from a trapped memory access
    pub fn is_trap(&self) -> bool {
        matches!(
            self,
            Error::OutOfBoundsAccess { .. } | Error::ReadOnlyViolation { .. }
        )
    }

    /// Classify an error from opening a mapped file
    pub(crate) fn from_open(path: PathBuf, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Error::FileNotFound(path),
            io::ErrorKind::PermissionDenied => Error::FileAccessDenied(path),
            _ => Error::Io { path, source: err },
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        err.as_raw()
    }
}
