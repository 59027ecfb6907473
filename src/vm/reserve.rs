// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Reservation Allocator
//!
//! Reserves a large inaccessible range, opens a read-write prefix and
//! leaves the rest trapped. Compiled code can then address a big static
//! layout while only the committed prefix costs memory.
//!
//! # Design
//!
//! - **One block**: the leading guard and the reservation are one mapping
//! - **Tail record**: `[committed, reserved)` is covered by a `TrapAlways`
//!   record owned by the store; `grow` narrows it
//! - **Monotonic**: committed size never shrinks
//!
//! # Usage
//!
//! ```rust,ignore
//! let ctx = install_once()?;
//! let store = ctx.create_reserved(512 << 20, 64 << 10)?;
//! ctx.grow(store, 128 << 10)?;
//! ```

use crate::cmdline::Config;
use crate::err::{Error, Result};
use crate::types::{Size, StoreId};
use crate::vm::guard::{GuardPolicy, GuardRecord, Owner};
use crate::vm::layout::{is_page_aligned, page_align_up, Prot, Span};
use crate::vm::region::Region;
use crate::vm::store::{BackingStore, StoreKind};
use crate::vm::State;
use crate::{log_debug, log_error, log_info};

/// Reserve address space for a store of `reserved` bytes
///
/// The configured leading guard is rounded up to a whole page and
/// reserved directly below the store's base. The trailing guard is at
/// least one page and gets no guard record: accesses there are never
/// classified, and a neighbouring reservation can never start at
/// `base + reserved`.
pub(crate) fn reserve_store(config: &Config, reserved: Size, page_size: Size, kind: StoreKind) -> Result<BackingStore> {
    let guard_before = page_align_up(config.guard_before, page_size).ok_or(Error::InvalidSize {
        reason: "leading guard overflows the address space",
    })?;
    let guard_after = page_align_up(config.guard_after, page_size)
        .ok_or(Error::InvalidSize {
            reason: "trailing guard overflows the address space",
        })?
        .max(page_size);
    let total = guard_before
        .checked_add(reserved)
        .and_then(|len| len.checked_add(guard_after))
        .ok_or(Error::InvalidSize {
            reason: "reservation overflows the address space",
        })?;

    let region = Region::reserve(total)?;
    log_debug!(
        "reserved {:#x} bytes at {:#x} ({:#x} + {:#x} guard)",
        total,
        region.start(),
        guard_before,
        guard_after
    );
    Ok(BackingStore::new(region, guard_before, reserved, page_size, kind))
}

/// Add a store to the registry and install its guard records
///
/// # Arguments
///
/// * `state` - Locked context state
/// * `store` - Store with its initial commitment applied
/// * `committed` - Policy covering the committed pages, if any
pub(crate) fn register(state: &mut State, store: BackingStore, committed: Option<GuardPolicy>) -> StoreId {
    let spans = [
        (store.guard_span(), Some(GuardPolicy::TrapAlways)),
        (store.committed_span(), committed),
        (store.tail_span(), Some(GuardPolicy::TrapAlways)),
    ];

    let id = state.stores.insert(store);
    for (span, policy) in spans {
        let Some(policy) = policy else { continue };
        if !state.guards.insert(GuardRecord::new(span, Owner::Store(id), policy)) {
            log_error!("{}: guard record {:#x}..{:#x} overlaps an existing record", id, span.start, span.end);
        }
    }
    id
}

/// Create a plain store with `initial` bytes committed read-write
pub(crate) fn create_reserved(state: &mut State, config: &Config, page_size: Size, reserved: Size, initial: Size) -> Result<StoreId> {
    if reserved == 0 {
        return Err(Error::InvalidSize {
            reason: "reserved size is zero",
        });
    }
    if !is_page_aligned(reserved, page_size) || !is_page_aligned(initial, page_size) {
        return Err(Error::InvalidSize {
            reason: "sizes must be page-aligned",
        });
    }
    if initial > reserved {
        return Err(Error::InvalidSize {
            reason: "initial size exceeds the reservation",
        });
    }

    let mut store = reserve_store(config, reserved, page_size, StoreKind::Plain)?;
    store.commit_to(initial, Prot::RW)?;
    let base = store.base();
    let id = register(state, store, None);

    log_info!(
        "{}: reserved {:#x} bytes at {:#x}, {:#x} committed",
        id,
        reserved,
        base,
        initial
    );
    Ok(id)
}

/// Extend the committed prefix of a store to `new_committed` bytes
///
/// Growing to the current size is a no-op. Growth never shrinks and never
/// mutates the store on failure.
pub(crate) fn grow(state: &mut State, id: StoreId, new_committed: Size) -> Result {
    let store = state.stores.get_mut(id)?;
    let old_committed = store.committed_size();

    if !is_page_aligned(new_committed, store.page_size()) {
        return Err(Error::InvalidSize {
            reason: "committed size must be page-aligned",
        });
    }
    if new_committed > store.reserved_size() {
        return Err(Error::GrowBeyondReservation {
            requested: new_committed,
            reserved: store.reserved_size(),
        });
    }
    if new_committed == old_committed {
        return Ok(());
    }
    if new_committed < old_committed {
        return Err(Error::InvalidSize {
            reason: "committed size never shrinks",
        });
    }

    store.commit_to(new_committed, Prot::RW)?;
    store.invalidate_snapshot();

    let base = store.base();
    state
        .guards
        .carve(Span::new(base + old_committed, base + new_committed));

    log_debug!("{}: committed {:#x} -> {:#x}", id, old_committed, new_committed);
    Ok(())
}
