// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Host Address Space Reservations
//!
//! A [`Region`] owns one anonymous private mapping obtained from the host.
//! It starts fully inaccessible; callers open pages with [`Region::protect`].
//! Dropping the region returns the range to the OS.
//!
//! `protect` and `copy_in` are the only calls the fault handler makes on a
//! region; both are plain syscalls or memcpy and never allocate.

use std::io;
use std::ptr::{self, NonNull};

use crate::err::{Error, Result};
use crate::types::{Size, VAddr};
use crate::vm::layout::Prot;

/// Reserved virtual range
#[derive(Debug)]
pub struct Region {
    base: NonNull<u8>,
    len: Size,
}

// SAFETY: the region is plain memory owned by this value; the registry
// serialises access through the context lock.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Reserve `len` bytes of inaccessible address space
    ///
    /// Nothing is committed; the OS backs pages on first write after they
    /// are made accessible.
    pub fn reserve(len: Size) -> Result<Self> {
        // SAFETY: anonymous mapping at a kernel-chosen address; no existing
        // memory is affected.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::ReservationExhausted {
                size: len,
                source: io::Error::last_os_error(),
            });
        }
        match NonNull::new(ptr.cast::<u8>()) {
            Some(base) => Ok(Self { base, len }),
            None => Err(Error::ReservationExhausted {
                size: len,
                source: io::Error::from(io::ErrorKind::AddrNotAvailable),
            }),
        }
    }

    /// First address of the reservation
    pub fn start(&self) -> VAddr {
        self.base.as_ptr() as VAddr
    }

    /// Reservation length
    pub fn len(&self) -> Size {
        self.len
    }

    /// Whether the reservation is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to `offset` bytes into the reservation
    pub fn ptr_at(&self, offset: Size) -> *mut u8 {
        debug_assert!(offset <= self.len);
        // SAFETY: offset stays within the mapping (checked by callers).
        unsafe { self.base.as_ptr().add(offset) }
    }

    /// Change the protection of `[offset, offset + len)`
    ///
    /// Both values must be page-aligned.
    pub fn protect(&self, offset: Size, len: Size, prot: Prot) -> Result {
        if len == 0 {
            return Ok(());
        }
        debug_assert!(offset + len <= self.len);
        // SAFETY: the range lies inside our own mapping.
        let rc = unsafe { libc::mprotect(self.ptr_at(offset).cast(), len, prot.to_native()) };
        if rc != 0 {
            return Err(Error::Protect {
                addr: self.start() + offset,
                len,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Copy `src` into the region at `offset`
    ///
    /// # Safety
    ///
    /// The destination range must currently be writable.
    pub unsafe fn copy_in(&self, offset: Size, src: &[u8]) {
        debug_assert!(offset + src.len() <= self.len);
        ptr::copy_nonoverlapping(src.as_ptr(), self.ptr_at(offset), src.len());
    }

    /// Copy out of the region at `offset`
    ///
    /// # Safety
    ///
    /// The source range must currently be readable.
    pub unsafe fn copy_out(&self, offset: Size, dst: &mut [u8]) {
        debug_assert!(offset + dst.len() <= self.len);
        ptr::copy_nonoverlapping(self.ptr_at(offset), dst.as_mut_ptr(), dst.len());
    }

    /// Borrow `[offset, offset + len)` as a slice
    ///
    /// # Safety
    ///
    /// The range must be readable and not written for the slice's lifetime.
    pub unsafe fn slice(&self, offset: Size, len: Size) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts(self.ptr_at(offset), len)
    }

    /// Borrow `[offset, offset + len)` mutably
    ///
    /// # Safety
    ///
    /// The range must be writable and not otherwise borrowed for the
    /// slice's lifetime.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, offset: Size, len: Size) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts_mut(self.ptr_at(offset), len)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: we own the whole mapping and nothing borrows it past drop.
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
        debug_assert_eq!(rc, 0, "munmap failed: {}", io::Error::last_os_error());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::layout::page_size;

    #[test]
    fn test_reserve_and_protect() {
        let ps = page_size();
        let region = Region::reserve(4 * ps).unwrap();
        assert_eq!(region.len(), 4 * ps);
        region.protect(0, ps, Prot::RW).unwrap();
        unsafe {
            region.copy_in(10, &[1, 2, 3]);
            let mut out = [0u8; 3];
            region.copy_out(10, &mut out);
            assert_eq!(out, [1, 2, 3]);
        }
    }

    #[test]
    fn test_fresh_pages_are_zero() {
        let ps = page_size();
        let region = Region::reserve(2 * ps).unwrap();
        region.protect(ps, ps, Prot::READ).unwrap();
        let page = unsafe { region.slice(ps, ps) };
        assert!(page.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reserve_absurd_size_fails() {
        let err = Region::reserve(usize::MAX & !0xffff).unwrap_err();
        assert!(matches!(err, Error::ReservationExhausted { .. }));
    }
}
