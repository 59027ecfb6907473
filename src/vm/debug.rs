// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Store Diagnostics
//!
//! Read-only reports on backing stores. Nothing here changes state.
//!
//! # Usage
//!
//! ```rust,ignore
//! let info = ctx.describe_backing_store(store)?;
//! log_info!("{}", info);
//! ctx.dump_store(store)?;
//! ```

use core::fmt;

use crate::err::Result;
use crate::types::{Size, StoreId, VAddr};
use crate::vm::guard::{GuardPolicy, Owner};
use crate::vm::layout::Prot;
use crate::vm::store::StoreKind;
use crate::vm::State;
use crate::log_info;

/// ============================================================================
/// Store Info
/// ============================================================================

/// Snapshot of a store's provenance and protection attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreInfo {
    /// Address of offset 0
    pub base: VAddr,

    /// Bytes reserved
    pub reserved_size: Size,

    /// Bytes committed
    pub committed_size: Size,

    /// Host page size
    pub page_size: Size,

    /// Provenance
    pub kind: StoreKind,

    /// File mappings layered on the store
    pub active_mapping_count: usize,

    /// Committed pages owned by this store alone
    pub private_pages: usize,

    /// Committed pages still backed by a copy-on-write template
    pub shared_pages: usize,
}

impl fmt::Display for StoreInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} store at {:#x}: {:#x}/{:#x} bytes committed, {} private / {} shared pages, {} mapping(s)",
            self.kind,
            self.base,
            self.committed_size,
            self.reserved_size,
            self.private_pages,
            self.shared_pages,
            self.active_mapping_count
        )
    }
}

/// Describe a store
pub(crate) fn describe_backing_store(state: &State, id: StoreId) -> Result<StoreInfo> {
    let store = state.stores.get(id)?;
    let page_size = store.page_size();

    let shared_pages = (0..store.committed_pages())
        .filter(|&page| store.page_prot(page) == Some(Prot::empty()))
        .filter(|&page| {
            state
                .guards
                .lookup(store.base() + page * page_size)
                .is_some_and(|r| {
                    r.owner == Owner::Store(id) && r.policy == GuardPolicy::CopyOnWriteThenAllow
                })
        })
        .count();

    Ok(StoreInfo {
        base: store.base(),
        reserved_size: store.reserved_size(),
        committed_size: store.committed_size(),
        page_size,
        kind: store.kind(),
        active_mapping_count: store.mappings,
        private_pages: store.committed_pages() - shared_pages,
        shared_pages,
    })
}

/// Log the guard records of a store and its mappings
pub(crate) fn dump_store(state: &State, id: StoreId) -> Result {
    let store = state.stores.get(id)?;
    let span = store.full_span();

    log_info!("{} [{:#x}, {:#x}):", id, span.start, span.end);
    for record in state.guards.iter().filter(|r| r.span.overlaps(&span)) {
        log_info!(
            "  {:#x}..{:#x} {:?} {:?}",
            record.span.start,
            record.span.end,
            record.policy,
            record.owner
        );
    }
    for mapping in state.mappings.on_store(id) {
        log_info!(
            "  {} {} +{:#x} len {:#x} {} dirty",
            mapping.id(),
            mapping.path().display(),
            mapping.offset(),
            mapping.length(),
            mapping.dirty_pages()
        );
    }
    Ok(())
}
