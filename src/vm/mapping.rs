// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! File Mapping Table
//!
//! Projects a file region into a store's committed memory. Reads observe
//! file content; writes either trap (read-only mappings) or go straight to
//! memory and mark the page dirty (writable mappings). Dirty pages are
//! written back when the mapping is removed.
//!
//! # Design
//!
//! - **Page spans**: a mapping occupies the whole pages
//!   `[align_down(offset), align_up(offset + length))`; two mappings on one
//!   store never share a page
//! - **Records per mapping**: eager read-only mappings use `TrapAlways`,
//!   lazy read-only mappings `TrapOnWrite`, writable ones `TrackDirty`
//! - **Fixed dirty set**: the dirty bitmap is sized at map time so the
//!   fault path never allocates
//! - **Ids retire**: ids come from a monotonic counter and are never reused
//!
//! # Usage
//!
//! ```rust,ignore
//! let id = ctx.map_file(store, "data.bin", 0x1000, 6, true)?;
//! ctx.store_u8(store, 0x1002, 42)?;
//! ctx.unmap(id)?;
//! ```

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::bitmap::Bitmap;
use crate::err::{Error, Result};
use crate::types::{MappingId, Size, StoreId, VAddr};
use crate::vm::cow;
use crate::vm::fault::Resolution;
use crate::vm::guard::{GuardPolicy, GuardRecord, Owner};
use crate::vm::layout::{page_align_down, page_align_up, pages_for, Access, Prot, Span};
use crate::vm::stats::FaultStats;
use crate::vm::store::{BackingStore, StoreRegistry};
use crate::vm::State;
use crate::{log_debug, log_info, log_warn};

/// ============================================================================
/// Options
/// ============================================================================

/// When file content is loaded into memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Populate {
    /// Copy the whole range at map time
    Eager,

    /// Copy each page on its first read
    Lazy,
}

/// Mapping options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapOptions {
    /// Writes reach memory and are flushed back on unmap
    pub writable: bool,

    /// Load policy
    pub populate: Populate,
}

impl MapOptions {
    /// Read-only mapping
    pub const fn read_only(populate: Populate) -> Self {
        Self {
            writable: false,
            populate,
        }
    }

    /// Writable mapping
    pub const fn writable(populate: Populate) -> Self {
        Self {
            writable: true,
            populate,
        }
    }
}

/// ============================================================================
/// File Mapping
/// ============================================================================

/// Active file region projected into a store
#[derive(Debug)]
pub struct FileMapping {
    id: MappingId,
    store: StoreId,
    offset: Size,
    length: Size,
    writable: bool,
    page_size: Size,
    dirty: Bitmap,
    file: File,
    path: PathBuf,
}

impl FileMapping {
    /// Mapping id
    pub fn id(&self) -> MappingId {
        self.id
    }

    /// Store the mapping overlays
    pub fn store(&self) -> StoreId {
        self.store
    }

    /// Offset within the store
    pub fn offset(&self) -> Size {
        self.offset
    }

    /// Mapped length in bytes
    pub fn length(&self) -> Size {
        self.length
    }

    /// Path the file was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages written since the mapping was created
    pub fn dirty_pages(&self) -> usize {
        self.dirty.count_ones()
    }

    /// Number of pages the mapping spans
    pub fn pages(&self) -> usize {
        self.dirty.size()
    }

    /// Store page holding mapping page 0
    fn first_page(&self) -> usize {
        self.offset / self.page_size
    }

    /// Bytes of the first page that precede the mapping
    fn lead(&self) -> Size {
        self.offset % self.page_size
    }

    /// Store offsets occupied by the mapping, rounded out to whole pages
    fn page_span(&self) -> Span {
        let start = page_align_down(self.offset, self.page_size);
        Span::new(start, start + self.pages() * self.page_size)
    }

    /// Mapped bytes of mapping page `page`
    ///
    /// Returns the store offset, the file offset and the length.
    fn chunk(&self, page: usize) -> (Size, u64, Size) {
        let page_start = page * self.page_size;
        let start = page_start.max(self.lead());
        let end = (page_start + self.page_size).min(self.lead() + self.length);
        let store_offset = self.first_page() * self.page_size + start;
        (store_offset, (start - self.lead()) as u64, end - start)
    }

    /// Copy file content into mapping page `page`, leaving it read-write
    ///
    /// Bytes of the page outside the mapping keep their store content.
    fn page_in(&self, store: &mut BackingStore, page: usize) -> Result {
        store.set_prot(self.first_page() + page, 1, Prot::RW)?;
        let (store_offset, file_offset, len) = self.chunk(page);
        // SAFETY: the page was made writable above and nothing else
        // borrows store memory while the state lock is held.
        let dst = unsafe { store.bytes_mut(store_offset, len) };
        self.file
            .read_exact_at(dst, file_offset)
            .map_err(|source| Error::PageIn { id: self.id, source })
    }

    /// Write dirty pages back to the file
    ///
    /// Every dirty page is attempted; the first failure is returned.
    fn flush(&self, store: &BackingStore) -> std::io::Result<()> {
        let mut first_error = None;
        for page in self.dirty.iter_ones() {
            let (store_offset, file_offset, len) = self.chunk(page);
            // SAFETY: dirty pages are readable.
            let src = unsafe { store.bytes(store_offset, len) };
            if let Err(err) = self.file.write_all_at(src, file_offset) {
                log_warn!("{}: flushing page {} failed: {}", self.id, page, err);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// ============================================================================
/// Mapping Table
/// ============================================================================

/// Active mappings across all stores
#[derive(Debug, Default)]
pub struct MappingTable {
    active: BTreeMap<MappingId, FileMapping>,
    next_id: u64,
}

impl MappingTable {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Whether no mapping is active
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Look up an active mapping
    pub fn get(&self, id: MappingId) -> Result<&FileMapping> {
        self.active.get(&id).ok_or(Error::UnknownMapping(id))
    }

    /// Active mappings layered on `store`
    pub fn on_store(&self, store: StoreId) -> impl Iterator<Item = &FileMapping> {
        self.active.values().filter(move |m| m.store == store)
    }

    fn issue_id(&mut self) -> MappingId {
        let id = MappingId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Page in every never-read page of the mappings on `store`
    ///
    /// Pages end up read-only; dirty tracking and traps are unaffected.
    pub(crate) fn materialize(&self, stores: &mut StoreRegistry, stats: &FaultStats, id: StoreId) -> Result {
        let store = stores.get_mut(id)?;
        for mapping in self.on_store(id) {
            for page in 0..mapping.pages() {
                let store_page = mapping.first_page() + page;
                if store.page_prot(store_page) == Some(Prot::empty()) {
                    mapping.page_in(store, page)?;
                    store.set_prot(store_page, 1, Prot::READ)?;
                    stats.record_page_in();
                }
            }
        }
        Ok(())
    }
}

/// ============================================================================
/// Fault Resolution
/// ============================================================================

/// Locate the mapping page holding `addr`
fn locate<'a>(mapping: &FileMapping, stores: &'a mut StoreRegistry, addr: VAddr) -> Option<(&'a mut BackingStore, usize)> {
    let store = stores.get_mut(mapping.store).ok()?;
    let offset = store.offset_of(addr)?;
    let page = offset.checked_sub(mapping.page_span().start)? / mapping.page_size;
    (page < mapping.pages()).then_some((store, page))
}

/// Resolve a read fault inside a lazy read-only mapping
pub(crate) fn resolve_read(mappings: &mut MappingTable, stores: &mut StoreRegistry, stats: &FaultStats, id: MappingId, addr: VAddr) -> Resolution {
    let Ok(mapping) = mappings.get(id) else {
        return Resolution::Unclassified;
    };
    let Some((store, page)) = locate(mapping, stores, addr) else {
        return Resolution::Unclassified;
    };
    let store_page = mapping.first_page() + page;
    if store.page_prot(store_page).is_some_and(|p| p.permits(Access::Read)) {
        return Resolution::Resumed;
    }

    let result = mapping
        .page_in(store, page)
        .and_then(|()| store.set_prot(store_page, 1, Prot::READ));
    match result {
        Ok(()) => {
            stats.record_page_in();
            Resolution::Resumed
        }
        Err(err) => Resolution::Failed(err),
    }
}

/// Resolve a fault inside a writable mapping
///
/// Reads page in file content read-only; writes record the page as dirty
/// and make it writable.
pub(crate) fn resolve_dirty(
    mappings: &mut MappingTable,
    stores: &mut StoreRegistry,
    stats: &FaultStats,
    id: MappingId,
    addr: VAddr,
    access: Access,
) -> Resolution {
    let Some(mapping) = mappings.active.get_mut(&id) else {
        return Resolution::Unclassified;
    };
    let Some((store, page)) = locate(mapping, stores, addr) else {
        return Resolution::Unclassified;
    };
    let store_page = mapping.first_page() + page;
    let prot = store.page_prot(store_page).unwrap_or(Prot::empty());
    if prot.permits(access) {
        return Resolution::Resumed;
    }

    match mark(mapping, store, page, prot, access, stats) {
        Ok(()) => Resolution::Resumed,
        Err(err) => Resolution::Failed(err),
    }
}

/// Apply a resolved access to page `page` of a writable mapping
fn mark(mapping: &mut FileMapping, store: &mut BackingStore, page: usize, prot: Prot, access: Access, stats: &FaultStats) -> Result {
    let store_page = mapping.first_page() + page;
    if prot.is_empty() {
        mapping.page_in(store, page)?;
        stats.record_page_in();
    }
    match access {
        Access::Read => store.set_prot(store_page, 1, Prot::READ),
        Access::Write => {
            if mapping.dirty.set(page) {
                stats.record_dirty_mark();
            }
            store.invalidate_snapshot();
            store.set_prot(store_page, 1, Prot::RW)
        }
    }
}

/// ============================================================================
/// Map / Unmap
/// ============================================================================

/// Project `length` bytes of `path` into `store` at `offset`
///
/// # Arguments
///
/// * `state` - Locked context state
/// * `store_id` - Store to overlay
/// * `path` - File to open
/// * `offset` - Offset within the store
/// * `length` - Bytes to map, starting at file offset 0
/// * `options` - Access and load policy
pub(crate) fn map_file(
    state: &mut State,
    store_id: StoreId,
    path: &Path,
    offset: Size,
    length: Size,
    options: MapOptions,
) -> Result<MappingId> {
    let store = state.stores.get(store_id)?;
    let page_size = store.page_size();

    if length == 0 {
        return Err(Error::InvalidSize {
            reason: "mapping length is zero",
        });
    }
    let end = offset
        .checked_add(length)
        .filter(|&end| end <= store.committed_size())
        .ok_or(Error::RangeOverlap { offset, length })?;
    let span = Span::new(
        page_align_down(offset, page_size),
        page_align_up(end, page_size).ok_or(Error::RangeOverlap { offset, length })?,
    );
    if state.mappings.on_store(store_id).any(|m| m.page_span().overlaps(&span)) {
        return Err(Error::RangeOverlap { offset, length });
    }

    let file = OpenOptions::new()
        .read(true)
        .write(options.writable)
        .open(path)
        .map_err(|err| Error::from_open(path.to_path_buf(), err))?;
    let io_error = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let file_len = file.metadata().map_err(io_error)?.len();
    if file_len < length as u64 {
        return Err(Error::InvalidSize {
            reason: "file is shorter than the mapping",
        });
    }
    let content = match options.populate {
        Populate::Eager => {
            let mut content = vec![0u8; length];
            file.read_exact_at(&mut content, 0).map_err(io_error)?;
            Some(content)
        }
        Populate::Lazy => None,
    };

    let id = state.mappings.issue_id();
    let mapping = FileMapping {
        id,
        store: store_id,
        offset,
        length,
        writable: options.writable,
        page_size,
        dirty: Bitmap::new(pages_for(offset % page_size + length, page_size)),
        file,
        path: path.to_path_buf(),
    };

    let store = state.stores.get_mut(store_id)?;
    let first = mapping.first_page();
    let pages = mapping.pages();

    // Shared copy-on-write pages become private before the store-level
    // record over them is cut away.
    for page in first..first + pages {
        if store.page_prot(page) == Some(Prot::empty()) {
            cow::duplicate_page(store, page, Access::Read)?;
        }
    }

    let (prot, policy) = match (&content, options.writable) {
        (Some(content), writable) => {
            store.set_prot(first, pages, Prot::RW)?;
            // SAFETY: the span was made writable above.
            unsafe { store.copy_in(offset, content) };
            let policy = if writable {
                GuardPolicy::TrackDirty
            } else {
                GuardPolicy::TrapAlways
            };
            (Prot::READ, policy)
        }
        (None, true) => (Prot::empty(), GuardPolicy::TrackDirty),
        (None, false) => (Prot::empty(), GuardPolicy::TrapOnWrite),
    };
    store.set_prot(first, pages, prot)?;
    store.mappings += 1;
    store.invalidate_snapshot();

    let base = store.base();
    let addrs = Span::new(base + span.start, base + span.end);
    state.guards.carve(addrs);
    if !state
        .guards
        .insert(GuardRecord::new(addrs, Owner::Mapping(id), policy))
    {
        log_warn!("{}: guard record {:#x}..{:#x} not installed", id, addrs.start, addrs.end);
    }

    log_info!(
        "{}: mapped {} ({:#x} bytes, {}) into {} at {:#x}",
        id,
        path.display(),
        length,
        if options.writable { "rw" } else { "ro" },
        store_id,
        offset
    );
    state.mappings.active.insert(id, mapping);
    Ok(id)
}

/// Remove a mapping, flushing dirty pages of writable mappings
///
/// Teardown always completes: the mapping is gone and its span is plain
/// read-write memory. The first failure among page-in, flush and
/// protection changes is returned.
pub(crate) fn unmap(state: &mut State, stats: &FaultStats, id: MappingId) -> Result {
    let mapping = state
        .mappings
        .active
        .remove(&id)
        .ok_or(Error::UnknownMapping(id))?;
    state.guards.remove_owner(Owner::Mapping(id));

    let store = state.stores.get_mut(mapping.store)?;
    store.mappings -= 1;
    store.invalidate_snapshot();

    let mut first_error = None;

    // Pages never read still show the pre-map content; load them so the
    // span keeps what the mapping exposed.
    for page in 0..mapping.pages() {
        if store.page_prot(mapping.first_page() + page) == Some(Prot::empty()) {
            match mapping.page_in(store, page) {
                Ok(()) => stats.record_page_in(),
                Err(err) => {
                    log_warn!("{}: {}", id, err);
                    first_error.get_or_insert(err);
                }
            }
        }
    }

    if mapping.writable {
        if let Err(source) = mapping.flush(store) {
            first_error.get_or_insert(Error::FlushFailed { id, source });
        }
    }
    if let Err(err) = store.set_prot(mapping.first_page(), mapping.pages(), Prot::RW) {
        log_warn!("{}: {}", id, err);
        first_error.get_or_insert(err);
    }

    log_debug!(
        "{}: unmapped, {} dirty page(s) written back",
        id,
        mapping.dirty_pages()
    );
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::cmdline::Config;
    use crate::vm::layout::page_size;
    use crate::vm::reserve;

    fn scratch(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn store(state: &mut State, pages: usize) -> StoreId {
        let ps = page_size();
        reserve::create_reserved(state, &Config::default(), ps, 2 * pages * ps, pages * ps).unwrap()
    }

    #[test]
    fn test_map_validation() {
        let ps = page_size();
        let mut state = State::new();
        let id = store(&mut state, 2);
        let file = scratch(&[1, 2, 3]);
        let ro = MapOptions::read_only(Populate::Eager);

        let err = map_file(&mut state, id, file.path(), 2 * ps - 2, 3, ro).unwrap_err();
        assert!(matches!(err, Error::RangeOverlap { .. }));
        let err = map_file(&mut state, id, file.path(), 0, 0, ro).unwrap_err();
        assert!(matches!(err, Error::InvalidSize { .. }));
        let err = map_file(&mut state, id, file.path(), 2 * ps, 3, ro).unwrap_err();
        assert!(matches!(err, Error::RangeOverlap { .. }));
        let err = map_file(&mut state, id, file.path(), 0, 4, ro).unwrap_err();
        assert!(matches!(err, Error::InvalidSize { .. }));
        let err = map_file(&mut state, id, Path::new("/nonexistent/wamem"), 0, 3, ro).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
        assert!(state.mappings.is_empty());
    }

    #[test]
    fn test_mappings_may_not_share_a_page() {
        let ps = page_size();
        let mut state = State::new();
        let id = store(&mut state, 4);
        let file = scratch(&[7; 16]);
        let ro = MapOptions::read_only(Populate::Eager);

        let first = map_file(&mut state, id, file.path(), ps, 16, ro).unwrap();
        let err = map_file(&mut state, id, file.path(), ps, 4, ro).unwrap_err();
        assert!(matches!(err, Error::RangeOverlap { .. }));
        let second = map_file(&mut state, id, file.path(), 2 * ps, 16, ro).unwrap();
        assert_ne!(first, second);
        assert_eq!(state.stores.get(id).unwrap().mappings, 2);

        // Unaligned offsets still claim the whole page.
        let err = map_file(&mut state, id, file.path(), 2 * ps + 100, 4, ro).unwrap_err();
        assert!(matches!(err, Error::RangeOverlap { .. }));
    }

    #[test]
    fn test_unaligned_mapping_spans_pages() {
        let ps = page_size();
        let stats = FaultStats::new();
        let mut state = State::new();
        let id = store(&mut state, 3);
        let content: Vec<u8> = (1..=8).collect();
        let file = scratch(&content);
        let offset = 2 * ps - 3;

        let mid = map_file(&mut state, id, file.path(), offset, 8, MapOptions::writable(Populate::Lazy)).unwrap();
        let mapping = state.mappings.get(mid).unwrap();
        assert_eq!(mapping.pages(), 2);
        assert_eq!(mapping.page_span(), Span::new(ps, 3 * ps));
        assert_eq!(mapping.chunk(0), (offset, 0, 3));
        assert_eq!(mapping.chunk(1), (2 * ps, 3, 5));

        let base = state.stores.get(id).unwrap().base();
        for addr in [base + offset, base + 2 * ps] {
            let resolution = resolve_dirty(&mut state.mappings, &mut state.stores, &stats, mid, addr, Access::Read);
            assert!(matches!(resolution, Resolution::Resumed));
        }
        let store = state.stores.get(id).unwrap();
        assert_eq!(unsafe { store.bytes(offset, 8) }, &content[..]);
        assert_eq!(unsafe { store.bytes(ps, 1) }, &[0]);

        let resolution = resolve_dirty(&mut state.mappings, &mut state.stores, &stats, mid, base + 2 * ps + 1, Access::Write);
        assert!(matches!(resolution, Resolution::Resumed));
        unsafe { state.stores.get(id).unwrap().copy_in(2 * ps + 1, &[0xee]) };

        unmap(&mut state, &stats, mid).unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), vec![1, 2, 3, 4, 0xee, 6, 7, 8]);
    }

    #[test]
    fn test_flush_failure_still_unmaps() {
        let ps = page_size();
        let stats = FaultStats::new();
        let mut state = State::new();
        let id = store(&mut state, 2);
        let file = scratch(&[0; 6]);

        let mid = map_file(&mut state, id, file.path(), ps, 6, MapOptions::writable(Populate::Eager)).unwrap();
        let base = state.stores.get(id).unwrap().base();
        let resolution = resolve_dirty(&mut state.mappings, &mut state.stores, &stats, mid, base + ps, Access::Write);
        assert!(matches!(resolution, Resolution::Resumed));
        unsafe { state.stores.get(id).unwrap().copy_in(ps, &[9]) };

        // Writes through a read-only descriptor fail with EBADF.
        state.mappings.active.get_mut(&mid).unwrap().file = File::open(file.path()).unwrap();

        let err = unmap(&mut state, &stats, mid).unwrap_err();
        assert!(matches!(err, Error::FlushFailed { id, .. } if id == mid));
        assert!(matches!(unmap(&mut state, &stats, mid), Err(Error::UnknownMapping(_))));

        let store = state.stores.get(id).unwrap();
        assert_eq!(store.mappings, 0);
        assert_eq!(store.page_prot(1), Some(Prot::RW));
        assert_eq!(unsafe { store.bytes(ps, 1) }, &[9]);
        assert_eq!(std::fs::read(file.path()).unwrap(), vec![0; 6]);
    }

    #[test]
    fn test_unmap_reports_page_in_failure() {
        let stats = FaultStats::new();
        let mut state = State::new();
        let id = store(&mut state, 1);
        let file = scratch(&[5; 4]);

        let mid = map_file(&mut state, id, file.path(), 0, 4, MapOptions::read_only(Populate::Lazy)).unwrap();
        file.as_file().set_len(0).unwrap();

        let err = unmap(&mut state, &stats, mid).unwrap_err();
        assert!(matches!(err, Error::PageIn { id, .. } if id == mid));
        assert!(state.mappings.get(mid).is_err());
        let store = state.stores.get(id).unwrap();
        assert_eq!(store.mappings, 0);
        assert_eq!(store.page_prot(0), Some(Prot::RW));
    }

    #[test]
    fn test_eager_read_only_mapping() {
        let ps = page_size();
        let stats = FaultStats::new();
        let mut state = State::new();
        let id = store(&mut state, 2);
        let file = scratch(&[0x10, 0x20, 0x30]);

        let mid = map_file(&mut state, id, file.path(), ps, 3, MapOptions::read_only(Populate::Eager)).unwrap();
        let store = state.stores.get(id).unwrap();
        assert_eq!(store.page_prot(1), Some(Prot::READ));
        assert_eq!(unsafe { store.bytes(ps, 3) }, &[0x10, 0x20, 0x30]);
        let record = state.guards.lookup(store.base() + ps).unwrap();
        assert_eq!(record.owner, Owner::Mapping(mid));
        assert_eq!(record.policy, GuardPolicy::TrapAlways);

        unmap(&mut state, &stats, mid).unwrap();
        let store = state.stores.get(id).unwrap();
        assert_eq!(store.page_prot(1), Some(Prot::RW));
        assert_eq!(store.mappings, 0);
        assert!(state.guards.lookup(store.base() + ps).is_none());
        assert!(matches!(unmap(&mut state, &stats, mid), Err(Error::UnknownMapping(_))));
    }

    #[test]
    fn test_lazy_read_pages_in() {
        let stats = FaultStats::new();
        let mut state = State::new();
        let id = store(&mut state, 1);
        let file = scratch(&[5, 6, 7, 8]);

        let mid = map_file(&mut state, id, file.path(), 0, 4, MapOptions::read_only(Populate::Lazy)).unwrap();
        let base = state.stores.get(id).unwrap().base();
        assert_eq!(state.stores.get(id).unwrap().page_prot(0), Some(Prot::empty()));

        let resolution = resolve_read(&mut state.mappings, &mut state.stores, &stats, mid, base + 2);
        assert!(matches!(resolution, Resolution::Resumed));
        let store = state.stores.get(id).unwrap();
        assert_eq!(store.page_prot(0), Some(Prot::READ));
        assert_eq!(unsafe { store.bytes(0, 4) }, &[5, 6, 7, 8]);
        assert_eq!(stats.snapshot().page_ins, 1);
    }

    #[test]
    fn test_dirty_pages_flush_on_unmap() {
        let ps = page_size();
        let stats = FaultStats::new();
        let mut state = State::new();
        let id = store(&mut state, 2);
        let file = scratch(&[0; 6]);

        let mid = map_file(&mut state, id, file.path(), ps, 6, MapOptions::writable(Populate::Eager)).unwrap();
        let base = state.stores.get(id).unwrap().base();

        let resolution = resolve_dirty(&mut state.mappings, &mut state.stores, &stats, mid, base + ps + 2, Access::Write);
        assert!(matches!(resolution, Resolution::Resumed));
        assert_eq!(state.mappings.get(mid).unwrap().dirty_pages(), 1);
        unsafe { state.stores.get(id).unwrap().copy_in(ps + 2, &[42]) };

        unmap(&mut state, &stats, mid).unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), vec![0, 0, 42, 0, 0, 0]);
    }

    #[test]
    fn test_materialize_loads_lazy_pages() {
        let stats = FaultStats::new();
        let mut state = State::new();
        let id = store(&mut state, 1);
        let file = scratch(&[3; 8]);
        map_file(&mut state, id, file.path(), 0, 8, MapOptions::writable(Populate::Lazy)).unwrap();

        state.mappings.materialize(&mut state.stores, &stats, id).unwrap();
        let store = state.stores.get(id).unwrap();
        assert_eq!(store.page_prot(0), Some(Prot::READ));
        assert_eq!(unsafe { store.bytes(0, 8) }, &[3; 8]);
    }
}
