// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Backing Stores
//!
//! A backing store is one contiguous reservation backing a VM linear
//! memory. The store keeps the protection it last applied to every
//! committed page, so both the fault handler and the checked access path
//! can tell whether an access would fault without asking the OS.
//!
//! # Layout
//!
//! ```text
//! region.start   base                 base+committed        base+reserved
//!    |  guard    |  committed pages   |  trapped tail       |
//! ```
//!
//! Stores live in a [`StoreRegistry`] and are addressed by [`StoreId`].
//! Releasing a store frees its slot and bumps the slot generation, so any
//! guard record or handle still naming it resolves to nothing.

use std::fmt;
use std::sync::Arc;

use crate::err::{Error, Result};
use crate::types::{Size, StoreId, VAddr};
use crate::vm::cow::Template;
use crate::vm::layout::{Prot, Span};
use crate::vm::region::Region;

/// ============================================================================
/// Store Kind
/// ============================================================================

/// Provenance of a store's initial content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Zero-filled reservation
    Plain,

    /// Pages initially shared with a template
    CopyOnWrite,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Plain => write!(f, "plain"),
            StoreKind::CopyOnWrite => write!(f, "copy-on-write"),
        }
    }
}

/// ============================================================================
/// Backing Store
/// ============================================================================

/// Contiguous virtual range backing one linear memory
#[derive(Debug)]
pub struct BackingStore {
    region: Region,
    guard_before: Size,
    reserved: Size,
    committed: Size,
    page_size: Size,
    kind: StoreKind,

    /// Template this store was cloned from
    pub(crate) origin: Option<Arc<Template>>,

    /// Snapshot of this store handed to its own clones
    pub(crate) snapshot: Option<Arc<Template>>,

    /// Set by the fault path when a frozen page is written
    pub(crate) snapshot_stale: bool,

    /// Current protection of each committed page
    prot: Vec<Prot>,

    /// Number of file mappings layered on this store
    pub(crate) mappings: usize,
}

impl BackingStore {
    /// Wrap a reservation; nothing is committed yet
    ///
    /// Bytes of `region` past `guard_before + reserved` form the trailing
    /// guard.
    pub(crate) fn new(region: Region, guard_before: Size, reserved: Size, page_size: Size, kind: StoreKind) -> Self {
        debug_assert!(region.len() >= guard_before + reserved);
        Self {
            region,
            guard_before,
            reserved,
            committed: 0,
            page_size,
            kind,
            origin: None,
            snapshot: None,
            snapshot_stale: false,
            prot: Vec::new(),
            mappings: 0,
        }
    }

    /// Address of offset 0
    pub fn base(&self) -> VAddr {
        self.region.start() + self.guard_before
    }

    /// Bytes reserved (excluding the leading guard)
    pub fn reserved_size(&self) -> Size {
        self.reserved
    }

    /// Bytes committed
    pub fn committed_size(&self) -> Size {
        self.committed
    }

    /// Host page size
    pub fn page_size(&self) -> Size {
        self.page_size
    }

    /// Store kind
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Number of committed pages
    pub fn committed_pages(&self) -> usize {
        self.prot.len()
    }

    /// Leading guard range, empty if none was configured
    pub fn guard_span(&self) -> Span {
        Span::new(self.region.start(), self.base())
    }

    /// Committed address range
    pub fn committed_span(&self) -> Span {
        Span::new(self.base(), self.base() + self.committed)
    }

    /// Reserved-but-uncommitted address range
    pub fn tail_span(&self) -> Span {
        Span::new(self.base() + self.committed, self.base() + self.reserved)
    }

    /// Inaccessible range after the reservation, covered by no record
    pub fn trailing_span(&self) -> Span {
        Span::new(self.base() + self.reserved, self.region.start() + self.region.len())
    }

    /// Whole mapping including both guards
    pub fn full_span(&self) -> Span {
        Span::new(self.region.start(), self.region.start() + self.region.len())
    }

    /// Offset of `addr` from base, if inside `[base, base + reserved)`
    pub fn offset_of(&self, addr: VAddr) -> Option<Size> {
        addr.checked_sub(self.base()).filter(|&off| off < self.reserved)
    }

    /// Committed page holding byte `offset`
    pub fn page_of(&self, offset: Size) -> usize {
        offset / self.page_size
    }

    /// Protection of a committed page
    pub fn page_prot(&self, page: usize) -> Option<Prot> {
        self.prot.get(page).copied()
    }

    /// Count committed pages with exactly `prot`
    pub fn pages_with(&self, prot: Prot) -> usize {
        self.prot.iter().filter(|&&p| p == prot).count()
    }

    /// Raw pointer to offset 0, handed to the VM host
    pub fn as_ptr(&self) -> *mut u8 {
        self.region.ptr_at(self.guard_before)
    }

    /// Change protection of committed pages `[first, first + count)`
    pub(crate) fn set_prot(&mut self, first: usize, count: usize, prot: Prot) -> Result {
        debug_assert!(first + count <= self.prot.len());
        self.region.protect(
            self.guard_before + first * self.page_size,
            count * self.page_size,
            prot,
        )?;
        self.prot[first..first + count].fill(prot);
        Ok(())
    }

    /// Commit up to `new_committed` bytes with protection `prot`
    pub(crate) fn commit_to(&mut self, new_committed: Size, prot: Prot) -> Result {
        debug_assert!(new_committed <= self.reserved && new_committed >= self.committed);
        self.region.protect(
            self.guard_before + self.committed,
            new_committed - self.committed,
            prot,
        )?;
        self.prot.resize(new_committed / self.page_size, prot);
        self.committed = new_committed;
        Ok(())
    }

    /// Copy bytes into the store
    ///
    /// # Safety
    ///
    /// The destination pages must be writable.
    pub(crate) unsafe fn copy_in(&self, offset: Size, src: &[u8]) {
        self.region.copy_in(self.guard_before + offset, src);
    }

    /// Copy bytes out of the store
    ///
    /// # Safety
    ///
    /// The source pages must be readable.
    pub(crate) unsafe fn copy_out(&self, offset: Size, dst: &mut [u8]) {
        self.region.copy_out(self.guard_before + offset, dst);
    }

    /// Borrow committed bytes
    ///
    /// # Safety
    ///
    /// The pages must be readable and not written while borrowed.
    pub(crate) unsafe fn bytes(&self, offset: Size, len: Size) -> &[u8] {
        self.region.slice(self.guard_before + offset, len)
    }

    /// Borrow committed bytes mutably
    ///
    /// # Safety
    ///
    /// The pages must be writable and not otherwise borrowed.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut(&self, offset: Size, len: Size) -> &mut [u8] {
        self.region.slice_mut(self.guard_before + offset, len)
    }

    /// Usable snapshot, if one is cached and still valid
    pub(crate) fn live_snapshot(&self) -> Option<&Arc<Template>> {
        self.snapshot.as_ref().filter(|_| !self.snapshot_stale)
    }

    /// Forget the cached snapshot; clones already made keep theirs
    pub(crate) fn invalidate_snapshot(&mut self) {
        self.snapshot_stale = true;
    }
}

/// ============================================================================
/// Store Registry
/// ============================================================================

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    store: Option<BackingStore>,
}

/// Index-addressed table of live stores
#[derive(Debug, Default)]
pub struct StoreRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl StoreRegistry {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Register a store and hand out its id
    pub fn insert(&mut self, store: BackingStore) -> StoreId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.store = Some(store);
                StoreId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    store: Some(store),
                });
                StoreId::new(index, 0)
            }
        }
    }

    /// Look up a live store
    pub fn get(&self, id: StoreId) -> Result<&BackingStore> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.store.as_ref())
            .ok_or(Error::InvalidStore(id))
    }

    /// Look up a live store mutably
    pub fn get_mut(&mut self, id: StoreId) -> Result<&mut BackingStore> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.store.as_mut())
            .ok_or(Error::InvalidStore(id))
    }

    /// Unregister a store, invalidating its id
    pub fn remove(&mut self, id: StoreId) -> Result<BackingStore> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation() && slot.store.is_some())
            .ok_or(Error::InvalidStore(id))?;
        let store = slot.store.take().ok_or(Error::InvalidStore(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        Ok(store)
    }

    /// Number of live stores
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.store.is_some()).count()
    }

    /// Whether no store is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
