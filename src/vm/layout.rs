// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Page Geometry and Protection
//!
//! Page size is a property of the host, read once from `sysconf`. All
//! alignment helpers take it explicitly.

use core::fmt;

use bitflags::bitflags;
use spin::Once;

use crate::types::{Size, VAddr};

/// Fallback when sysconf does not report a page size
const DEFAULT_PAGE_SIZE: Size = 4096;

static PAGE_SIZE: Once<Size> = Once::new();

/// Host page size in bytes
pub fn page_size() -> Size {
    *PAGE_SIZE.call_once(|| {
        // SAFETY: sysconf has no memory-safety preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 && (size as Size).is_power_of_two() {
            size as Size
        } else {
            DEFAULT_PAGE_SIZE
        }
    })
}

/// Align down to a page boundary
#[inline]
pub const fn page_align_down(addr: usize, page_size: Size) -> usize {
    addr & !(page_size - 1)
}

/// Align up to a page boundary; `None` on overflow
#[inline]
pub const fn page_align_up(addr: usize, page_size: Size) -> Option<usize> {
    match addr.checked_add(page_size - 1) {
        Some(end) => Some(end & !(page_size - 1)),
        None => None,
    }
}

/// Check if an address or size is page-aligned
#[inline]
pub const fn is_page_aligned(addr: usize, page_size: Size) -> bool {
    addr & (page_size - 1) == 0
}

/// Number of pages covering `len` bytes
#[inline]
pub const fn pages_for(len: Size, page_size: Size) -> usize {
    len.div_ceil(page_size)
}

// ============================================================================
// Protection Flags
// ============================================================================

bitflags! {
    /// Hardware protection of a page, as last set with mprotect
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Prot: u8 {
        /// Readable
        const READ = 1 << 0;
        /// Writable
        const WRITE = 1 << 1;
        /// Read + Write
        const RW = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Prot {
    /// Matching `PROT_*` bits for mprotect
    pub fn to_native(self) -> libc::c_int {
        let mut native = libc::PROT_NONE;
        if self.contains(Prot::READ) {
            native |= libc::PROT_READ;
        }
        if self.contains(Prot::WRITE) {
            native |= libc::PROT_WRITE;
        }
        native
    }

    /// Whether an access of `kind` goes through without faulting
    pub fn permits(self, kind: Access) -> bool {
        match kind {
            Access::Read => self.contains(Prot::READ),
            Access::Write => self.contains(Prot::RW),
        }
    }
}

impl fmt::Display for Prot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        if self.contains(Prot::READ) {
            write!(f, "R")?;
        }
        if self.contains(Prot::WRITE) {
            write!(f, "W")?;
        }
        Ok(())
    }
}

/// ============================================================================
/// Access Kind
/// ============================================================================

/// Kind of memory access that faulted (or would fault)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Load
    Read,

    /// Store
    Write,
}

impl Access {
    /// Infer the access kind of a hardware fault from the page protection
    ///
    /// An inaccessible page faults on any access and is resolved as a read;
    /// if the access really was a store it faults again on the now readable
    /// page. A fault on a readable page can only be a store.
    pub fn infer(prot: Prot) -> Self {
        if prot.contains(Prot::READ) {
            Access::Write
        } else {
            Access::Read
        }
    }
}

/// Half-open address range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First address
    pub start: VAddr,

    /// One past the last address
    pub end: VAddr,
}

impl Span {
    /// Create a span
    pub const fn new(start: VAddr, end: VAddr) -> Self {
        Self { start, end }
    }

    /// Length in bytes
    pub const fn len(&self) -> Size {
        self.end - self.start
    }

    /// Whether the span covers no bytes
    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check if this span contains an address
    pub const fn contains(&self, addr: VAddr) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Check if this span overlaps another
    pub const fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}
