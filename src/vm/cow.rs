// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Copy-on-Write Allocator
//!
//! A copy-on-write store starts as a view of a [`Template`], a shared,
//! reference-counted snapshot of its source's committed pages. Clone pages
//! are inaccessible until first touched; the fault resolver then copies
//! the template page into place.
//!
//! # Design
//!
//! - **Snapshot at creation**: later growth of the source is invisible to
//!   existing clones
//! - **Both sides copy**: while a snapshot is cached on the source, the
//!   source's pages are frozen read-only; writing one unfreezes it and
//!   marks the snapshot stale, so the next clone takes a fresh one
//! - **No frees in the handler**: the fault path only flags a snapshot as
//!   stale; the old template is dropped by the next API call that
//!   replaces it
//!
//! # Usage
//!
//! ```rust,ignore
//! let template = ctx.create_reserved(1 << 20, 64 << 10)?;
//! ctx.write(template, 0, b"initial state")?;
//! let a = ctx.create_copy_on_write(template)?;
//! let b = ctx.create_copy_on_write(template)?;
//! ```

use std::sync::Arc;

use crate::cmdline::Config;
use crate::err::{Error, Result};
use crate::types::{Size, StoreId, VAddr};
use crate::vm::fault::Resolution;
use crate::vm::guard::{GuardPolicy, Owner};
use crate::vm::layout::{Access, Prot};
use crate::vm::reserve;
use crate::vm::stats::FaultStats;
use crate::vm::store::{BackingStore, StoreKind, StoreRegistry};
use crate::vm::State;
use crate::{log_debug, log_info};

/// ============================================================================
/// Template
/// ============================================================================

/// Page arena holding a store's content as of one point in time
#[derive(Debug)]
pub struct Template {
    page_size: Size,
    bytes: Box<[u8]>,
}

impl Template {
    /// Copy the committed content of `store`
    ///
    /// Readable pages are copied as they are. Pages still inaccessible
    /// because they were never touched come from the store's own origin,
    /// or are zero.
    fn capture(store: &BackingStore) -> Self {
        let page_size = store.page_size();
        let mut bytes = vec![0u8; store.committed_size()].into_boxed_slice();

        for (page, dst) in bytes.chunks_mut(page_size).enumerate() {
            match store.page_prot(page) {
                Some(prot) if prot.contains(Prot::READ) => {
                    // SAFETY: the page is readable and we hold the state lock.
                    dst.copy_from_slice(unsafe { store.bytes(page * page_size, page_size) });
                }
                _ => {
                    if let Some(src) = store.origin.as_ref().and_then(|t| t.page(page)) {
                        dst.copy_from_slice(src);
                    }
                }
            }
        }

        Self { page_size, bytes }
    }

    /// Size in bytes
    pub fn len(&self) -> Size {
        self.bytes.len()
    }

    /// Whether the template holds no pages
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of pages
    pub fn pages(&self) -> usize {
        self.bytes.len() / self.page_size
    }

    /// Content of page `index`
    pub fn page(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.page_size)?;
        self.bytes.get(start..start + self.page_size)
    }
}

/// ============================================================================
/// Duplication
/// ============================================================================

/// Bring a never-touched copy-on-write page into the store
///
/// The page ends up read-write, except for reads on a store whose own
/// snapshot is live: those map it read-only so a later write still marks
/// the snapshot stale.
pub(crate) fn duplicate_page(store: &mut BackingStore, page: usize, access: Access) -> Result {
    let page_size = store.page_size();
    store.set_prot(page, 1, Prot::RW)?;

    if let Some(src) = store.origin.as_ref().and_then(|t| t.page(page)) {
        // SAFETY: the page was made writable above.
        unsafe { store.copy_in(page * page_size, src) };
    }

    match access {
        Access::Write => store.invalidate_snapshot(),
        Access::Read if store.live_snapshot().is_some() => store.set_prot(page, 1, Prot::READ)?,
        Access::Read => {}
    }
    Ok(())
}

/// Resolve a fault inside a `CopyOnWriteThenAllow` record
pub(crate) fn resolve(stores: &mut StoreRegistry, stats: &FaultStats, id: StoreId, addr: VAddr, access: Access) -> Resolution {
    let store = match stores.get_mut(id) {
        Ok(store) => store,
        Err(_) => return Resolution::Unclassified,
    };
    let page = match store.offset_of(addr) {
        Some(offset) => store.page_of(offset),
        None => return Resolution::Unclassified,
    };
    let prot = match store.page_prot(page) {
        Some(prot) => prot,
        None => return Resolution::Trap(Error::OutOfBoundsAccess { addr }),
    };

    let result = if prot.is_empty() {
        duplicate_page(store, page, access).map(|()| stats.record_cow_copy())
    } else if !prot.permits(access) {
        // Frozen page of a snapshot source
        store.invalidate_snapshot();
        store.set_prot(page, 1, Prot::RW)
    } else {
        Ok(())
    };

    match result {
        Ok(()) => Resolution::Resumed,
        Err(err) => Resolution::Failed(err),
    }
}

/// ============================================================================
/// Snapshots
/// ============================================================================

/// Make every read-write committed page read-only
fn freeze(store: &mut BackingStore) -> Result {
    let pages = store.committed_pages();
    let mut page = 0;
    while page < pages {
        if store.page_prot(page) != Some(Prot::RW) {
            page += 1;
            continue;
        }
        let first = page;
        while page < pages && store.page_prot(page) == Some(Prot::RW) {
            page += 1;
        }
        store.set_prot(first, page - first, Prot::READ)?;
    }
    Ok(())
}

/// Current template of `id`, capturing a new one if needed
///
/// Capturing freezes the source under a `CopyOnWriteThenAllow` record so
/// its own writes stop showing through to clones.
pub(crate) fn snapshot(state: &mut State, stats: &FaultStats, id: StoreId) -> Result<Arc<Template>> {
    let store = state.stores.get(id)?;
    if store.committed_size() == 0 {
        return Err(Error::SourceNotCommitted(id));
    }
    if let Some(template) = store.live_snapshot() {
        return Ok(Arc::clone(template));
    }

    // Lazily mapped file pages must hold file content before capture.
    state.mappings.materialize(&mut state.stores, stats, id)?;

    let store = state.stores.get_mut(id)?;
    let template = Arc::new(Template::capture(store));
    freeze(store)?;
    store.snapshot = Some(Arc::clone(&template));
    store.snapshot_stale = false;

    let span = store.committed_span();
    state
        .guards
        .fill(span, Owner::Store(id), GuardPolicy::CopyOnWriteThenAllow);

    log_debug!("{}: captured {} page template", id, template.pages());
    Ok(template)
}

/// Create a store sharing the committed content of `source`
pub(crate) fn create_copy_on_write(state: &mut State, stats: &FaultStats, config: &Config, source: StoreId) -> Result<StoreId> {
    let template = snapshot(state, stats, source)?;
    let (reserved, page_size) = {
        let src = state.stores.get(source)?;
        (src.reserved_size(), src.page_size())
    };

    let mut store = reserve::reserve_store(config, reserved, page_size, StoreKind::CopyOnWrite)?;
    store.commit_to(template.len(), Prot::empty())?;
    store.origin = Some(template);
    let base = store.base();

    let id = reserve::register(state, store, Some(GuardPolicy::CopyOnWriteThenAllow));
    log_info!("{}: copy-on-write clone of {} at {:#x}", id, source, base);
    Ok(id)
}
