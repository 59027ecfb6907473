// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Linear Memory Backing Stores
//!
//! This module manages the host memory behind sandboxed VM linear
//! memories: large reservations with a committed prefix, copy-on-write
//! clones and file mappings, all policed by one protection fault handler.
//!
//! # Design Goals
//!
//! 1. **Deterministic traps** - every access past committed memory faults
//!    into the resolver and is classified
//! 2. **Pay for what is touched** - reservations, clones and lazy mappings
//!    cost memory only for pages actually used
//! 3. **One lock** - table edits and fault resolution are serialised by the
//!    same process-wide lock
//! 4. **Unknown faults stay fatal** - nothing outside a guard record is ever
//!    swallowed
//!
//! # Organization
//!
//! - [`layout`] - Page geometry and protection flags
//! - [`region`] - Host address space reservations
//! - [`guard`] - Guard records and the guard table
//! - [`store`] - Backing stores and the store registry
//! - [`reserve`] - Reservation allocator
//! - [`cow`] - Copy-on-write allocator
//! - [`mapping`] - File mapping table
//! - [`fault`] - Fault resolution and the signal handler
//! - [`stats`] - Fault counters
//! - [`debug`] - Diagnostics

pub mod cow;
pub mod debug;
pub mod fault;
pub mod guard;
pub mod layout;
pub mod mapping;
pub mod region;
pub mod reserve;
pub mod stats;
pub mod store;

use std::path::Path;

use spin::Once;

use crate::cmdline::Config;
use crate::err::{Error, Result};
use crate::sync::FaultLock;
use crate::types::{MappingId, Size, StoreId, VAddr};
use crate::{log_error, log_info};

pub use debug::StoreInfo;
pub use guard::{GuardPolicy, GuardRecord, Owner};
pub use layout::{page_size, Access, Prot};
pub use mapping::{MapOptions, Populate};
pub use stats::FaultStatsSnapshot;
pub use store::StoreKind;

use fault::Resolution;
use guard::GuardTable;
use mapping::MappingTable;
use stats::FaultStats;
use store::StoreRegistry;

/// ============================================================================
/// Process Context
/// ============================================================================

/// Tables guarded by the context lock
#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) stores: StoreRegistry,
    pub(crate) guards: GuardTable,
    pub(crate) mappings: MappingTable,
}

impl State {
    pub(crate) const fn new() -> Self {
        Self {
            stores: StoreRegistry::new(),
            guards: GuardTable::new(),
            mappings: MappingTable::new(),
        }
    }
}

/// Process-scoped owner of every store, mapping and guard record
pub struct Context {
    pub(crate) state: FaultLock<State>,
    pub(crate) stats: FaultStats,
    config: Config,
    page_size: Size,
}

static CONTEXT: Once<Context> = Once::new();

/// Installed context, if any
pub(crate) fn context() -> Option<&'static Context> {
    CONTEXT.get()
}

/// Install the fault handler and create the process context
///
/// Options come from `WAMEM_OPTS`. Later calls return the same context.
pub fn install_once() -> Result<&'static Context> {
    install_once_with(Config::from_env())
}

/// Install the fault handler with explicit options
///
/// `config` is honoured only by the call that performs the installation.
pub fn install_once_with(config: Config) -> Result<&'static Context> {
    CONTEXT.try_call_once(|| {
        fault::install_handler()?;
        let ctx = Context::new(config);
        log_info!(
            "fault handler installed (page size {:#x}, guards {:#x}/{:#x}, {:?} mappings)",
            ctx.page_size,
            config.guard_before,
            config.guard_after,
            config.populate
        );
        Ok(ctx)
    })
}

impl Context {
    /// Create a context that is not wired to the signal handler
    pub(crate) fn new(config: Config) -> Self {
        Self {
            state: FaultLock::new(State::new()),
            stats: FaultStats::new(),
            config,
            page_size: page_size(),
        }
    }

    /// Options in effect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Host page size
    pub fn page_size(&self) -> Size {
        self.page_size
    }

    /// Fault counters
    pub fn stats(&self) -> FaultStatsSnapshot {
        self.stats.snapshot()
    }

    /// ========================================================================
    /// Allocation
    /// ========================================================================

    /// Reserve `reserved` bytes with the first `initial` committed read-write
    ///
    /// # Arguments
    ///
    /// * `reserved` - Page-aligned, non-zero reservation size
    /// * `initial` - Page-aligned committed prefix, at most `reserved`
    pub fn create_reserved(&self, reserved: Size, initial: Size) -> Result<StoreId> {
        let mut state = self.state.lock();
        reserve::create_reserved(&mut state, &self.config, self.page_size, reserved, initial)
    }

    /// Grow the committed prefix of a store
    pub fn grow(&self, store: StoreId, new_committed: Size) -> Result {
        let mut state = self.state.lock();
        reserve::grow(&mut state, store, new_committed)
    }

    /// Create a copy-on-write clone of `source`'s committed content
    pub fn create_copy_on_write(&self, source: StoreId) -> Result<StoreId> {
        let mut state = self.state.lock();
        cow::create_copy_on_write(&mut state, &self.stats, &self.config, source)
    }

    /// Release a store and return its range to the OS
    ///
    /// Fails with `StoreInUse` while file mappings are layered on it.
    /// Clones of the store keep their own copy of its content.
    pub fn release(&self, id: StoreId) -> Result {
        let mut state = self.state.lock();
        let mappings = state.stores.get(id)?.mappings;
        if mappings > 0 {
            return Err(Error::StoreInUse { store: id, mappings });
        }
        state.guards.remove_owner(Owner::Store(id));
        let store = state.stores.remove(id)?;
        log_info!("{}: released {:#x} bytes at {:#x}", id, store.reserved_size(), store.base());
        Ok(())
    }

    /// ========================================================================
    /// File Mappings
    /// ========================================================================

    /// Map `length` bytes of a file into `store` at `offset`
    ///
    /// Content is loaded according to the configured populate policy.
    pub fn map_file(&self, store: StoreId, path: impl AsRef<Path>, offset: Size, length: Size, writable: bool) -> Result<MappingId> {
        let options = MapOptions {
            writable,
            populate: self.config.populate,
        };
        self.map_file_with(store, path, offset, length, options)
    }

    /// Map a file with explicit options
    pub fn map_file_with(&self, store: StoreId, path: impl AsRef<Path>, offset: Size, length: Size, options: MapOptions) -> Result<MappingId> {
        let mut state = self.state.lock();
        mapping::map_file(&mut state, store, path.as_ref(), offset, length, options)
    }

    /// Remove a mapping, writing dirty pages back first
    pub fn unmap(&self, id: MappingId) -> Result {
        let mut state = self.state.lock();
        mapping::unmap(&mut state, &self.stats, id)
    }

    /// ========================================================================
    /// Diagnostics
    /// ========================================================================

    /// Report a store's provenance and protection attributes
    pub fn describe_backing_store(&self, store: StoreId) -> Result<StoreInfo> {
        let state = self.state.lock();
        debug::describe_backing_store(&state, store)
    }

    /// Log a store's guard records and mappings
    pub fn dump_store(&self, store: StoreId) -> Result {
        let state = self.state.lock();
        debug::dump_store(&state, store)
    }

    /// ========================================================================
    /// Memory Access
    /// ========================================================================

    /// Raw memory handed to the VM host: base pointer and committed size
    ///
    /// Native accesses through the pointer are policed by the fault
    /// handler; traps on that path terminate the process.
    pub fn raw_parts(&self, store: StoreId) -> Result<(*mut u8, Size)> {
        let state = self.state.lock();
        let store = state.stores.get(store)?;
        Ok((store.as_ptr(), store.committed_size()))
    }

    /// Copy `buf.len()` bytes out of a store starting at `offset`
    pub fn read(&self, store: StoreId, offset: Size, buf: &mut [u8]) -> Result {
        let mut state = self.state.lock();
        self.check_access(&mut state, store, offset, buf.len(), Access::Read)?;
        // SAFETY: every touched page was just verified readable.
        unsafe { state.stores.get(store)?.copy_out(offset, buf) };
        Ok(())
    }

    /// Copy `data` into a store starting at `offset`
    ///
    /// A trap on any touched page fails the whole write; no byte is stored.
    pub fn write(&self, store: StoreId, offset: Size, data: &[u8]) -> Result {
        let mut state = self.state.lock();
        self.check_access(&mut state, store, offset, data.len(), Access::Write)?;
        // SAFETY: every touched page was just verified writable.
        unsafe { state.stores.get(store)?.copy_in(offset, data) };
        Ok(())
    }

    /// Load one byte
    pub fn load_u8(&self, store: StoreId, offset: Size) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read(store, offset, &mut byte)?;
        Ok(byte[0])
    }

    /// Store one byte
    pub fn store_u8(&self, store: StoreId, offset: Size, value: u8) -> Result {
        self.write(store, offset, &[value])
    }

    /// Make every page of `[offset, offset + len)` permit `access`
    ///
    /// Pages that would fault are handed to the resolver exactly as the MMU
    /// would hand them to the signal handler. Accesses beyond the
    /// reservation are unclassified and abort the process.
    fn check_access(&self, state: &mut State, id: StoreId, offset: Size, len: Size, access: Access) -> Result {
        let store = state.stores.get(id)?;
        if len == 0 {
            return Ok(());
        }
        let base = store.base();
        let reserved = store.reserved_size();
        let ps = store.page_size();

        let end = match offset.checked_add(len) {
            Some(end) if end <= reserved => end,
            _ => self.unclassified(base.wrapping_add(offset.max(reserved))),
        };

        for page in offset / ps..=(end - 1) / ps {
            let addr = base + offset.max(page * ps);
            if self.page_permits(state, id, page, access)? {
                continue;
            }
            match fault::resolve(state, &self.stats, addr, access) {
                Resolution::Resumed => {}
                Resolution::Trap(err) | Resolution::Failed(err) => return Err(err),
                Resolution::Unclassified => self.unclassified(addr),
            }
            if !self.page_permits(state, id, page, access)? {
                self.unclassified(addr);
            }
        }
        Ok(())
    }

    fn page_permits(&self, state: &State, id: StoreId, page: usize, access: Access) -> Result<bool> {
        let store = state.stores.get(id)?;
        Ok(store.page_prot(page).is_some_and(|prot| prot.permits(access)))
    }

    fn unclassified(&self, addr: VAddr) -> ! {
        log_error!("unclassified access at {:#x}, aborting", addr);
        std::process::abort()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new(Config::default())
    }

    #[test]
    fn test_checked_access_within_committed() {
        let ctx = ctx();
        let ps = ctx.page_size();
        let id = ctx.create_reserved(4 * ps, ps).unwrap();

        ctx.store_u8(id, 10, 42).unwrap();
        assert_eq!(ctx.load_u8(id, 10).unwrap(), 42);

        let err = ctx.store_u8(id, ps + 10, 1).unwrap_err();
        assert!(matches!(err, Error::OutOfBoundsAccess { .. }));
        let err = ctx.load_u8(id, 3 * ps).unwrap_err();
        assert!(matches!(err, Error::OutOfBoundsAccess { .. }));
    }

    #[test]
    fn test_straddling_write_is_all_or_nothing() {
        let ctx = ctx();
        let ps = ctx.page_size();
        let id = ctx.create_reserved(2 * ps, ps).unwrap();

        let err = ctx.write(id, ps - 2, &[7, 7, 7, 7]).unwrap_err();
        assert!(matches!(err, Error::OutOfBoundsAccess { addr } if addr == ctx.raw_parts(id).unwrap().0 as usize + ps));
        let mut buf = [0u8; 2];
        ctx.read(id, ps - 2, &mut buf).unwrap();
        assert_eq!(buf, [0, 0]);
    }

    #[test]
    fn test_release() {
        let ctx = ctx();
        let ps = ctx.page_size();
        let id = ctx.create_reserved(2 * ps, ps).unwrap();
        ctx.release(id).unwrap();
        assert!(matches!(ctx.load_u8(id, 0), Err(Error::InvalidStore(_))));
        assert!(matches!(ctx.release(id), Err(Error::InvalidStore(_))));
        assert!(ctx.state.lock().guards.is_empty());
    }

    #[test]
    fn test_copy_on_write_isolation() {
        let ctx = ctx();
        let ps = ctx.page_size();
        let src = ctx.create_reserved(4 * ps, 2 * ps).unwrap();
        ctx.write(src, 0, b"hello").unwrap();

        let clone = ctx.create_copy_on_write(src).unwrap();
        let mut buf = [0u8; 5];
        ctx.read(clone, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        ctx.write(clone, 0, b"HELLO").unwrap();
        ctx.write(src, 1, b"ELL").unwrap();
        ctx.read(src, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hELLo");
        ctx.read(clone, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"HELLO");

        let later = ctx.create_copy_on_write(src).unwrap();
        ctx.read(later, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hELLo");
        assert!(ctx.stats().cow_copies >= 2);
    }
}
