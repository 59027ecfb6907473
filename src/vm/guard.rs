// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Guard Records
//!
//! The guard table lists every address range whose accesses are
//! intentionally trapped and how a fault inside it is resolved. A fault at
//! an address no record covers is not ours and is never resolved.
//!
//! # Design
//!
//! - **Non-overlapping**: ranges are disjoint; `insert` refuses overlaps
//! - **Weak owners**: a record names its store or mapping by id, the fault
//!   path resolves the id through the registry and never holds a pointer
//! - **Edited outside faults**: records are inserted, split and removed
//!   only by API calls; the fault handler performs lookups only

use std::collections::BTreeMap;

use crate::types::{MappingId, StoreId, VAddr};
use crate::vm::layout::Span;

/// ============================================================================
/// Policies
/// ============================================================================

/// How a fault inside a guarded range is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPolicy {
    /// Every fault is a trap delivered to the caller
    TrapAlways,

    /// Writes trap; reads page in content and resume
    TrapOnWrite,

    /// Duplicate the page privately and resume
    CopyOnWriteThenAllow,

    /// Record the page as dirty, make it writable and resume
    TrackDirty,
}

/// Object a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Backing store tail, leading guard or copy-on-write pages
    Store(StoreId),

    /// File mapping
    Mapping(MappingId),
}

/// Protected range requiring interception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardRecord {
    /// Covered addresses
    pub span: Span,

    /// Lookup-only reference to the owner
    pub owner: Owner,

    /// Resolution policy
    pub policy: GuardPolicy,
}

impl GuardRecord {
    /// Create a record
    pub const fn new(span: Span, owner: Owner, policy: GuardPolicy) -> Self {
        Self { span, owner, policy }
    }
}

/// ============================================================================
/// Guard Table
/// ============================================================================

/// Process-wide table of guard records keyed by start address
#[derive(Debug, Default)]
pub struct GuardTable {
    records: BTreeMap<VAddr, GuardRecord>,
}

impl GuardTable {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Find the record covering `addr`
    pub fn lookup(&self, addr: VAddr) -> Option<&GuardRecord> {
        self.records
            .range(..=addr)
            .next_back()
            .map(|(_, record)| record)
            .filter(|record| record.span.contains(addr))
    }

    /// Whether any record overlaps `span`
    pub fn overlaps(&self, span: Span) -> bool {
        if span.is_empty() {
            return false;
        }
        if self.lookup(span.start).is_some() {
            return true;
        }
        self.records.range(span.start..span.end).next().is_some()
    }

    /// Insert a record; empty spans are ignored
    ///
    /// Returns false, leaving the table unchanged, if the span overlaps an
    /// existing record.
    #[must_use]
    pub fn insert(&mut self, record: GuardRecord) -> bool {
        if record.span.is_empty() {
            return true;
        }
        if self.overlaps(record.span) {
            return false;
        }
        self.records.insert(record.span.start, record);
        true
    }

    /// Remove every record belonging to `owner`
    pub fn remove_owner(&mut self, owner: Owner) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.owner != owner);
        before - self.records.len()
    }

    /// Cut `span` out of every record it touches
    ///
    /// Records partially covered are shrunk or split in two.
    pub fn carve(&mut self, span: Span) {
        let touched: Vec<GuardRecord> = self
            .records
            .values()
            .filter(|record| record.span.overlaps(&span))
            .copied()
            .collect();

        for record in touched {
            self.records.remove(&record.span.start);
            let left = Span::new(record.span.start, span.start.min(record.span.end));
            let right = Span::new(span.end.max(record.span.start), record.span.end);
            for piece in [left, right] {
                if !piece.is_empty() {
                    self.records
                        .insert(piece.start, GuardRecord::new(piece, record.owner, record.policy));
                }
            }
        }
    }

    /// Cover the parts of `span` no record covers yet
    pub fn fill(&mut self, span: Span, owner: Owner, policy: GuardPolicy) {
        let mut holes = Vec::new();
        let mut cursor = span.start;

        if let Some(record) = self.lookup(cursor) {
            cursor = record.span.end;
        }
        if cursor >= span.end {
            return;
        }
        for record in self.records.range(cursor..span.end).map(|(_, r)| r) {
            if record.span.start > cursor {
                holes.push(Span::new(cursor, record.span.start));
            }
            cursor = cursor.max(record.span.end);
        }
        if cursor < span.end {
            holes.push(Span::new(cursor, span.end));
        }

        for hole in holes {
            self.records.insert(hole.start, GuardRecord::new(hole, owner, policy));
        }
    }

    /// Iterate records in address order
    pub fn iter(&self) -> impl Iterator<Item = &GuardRecord> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Owner {
        Owner::Store(StoreId::new(0, 0))
    }

    fn record(start: VAddr, end: VAddr, policy: GuardPolicy) -> GuardRecord {
        GuardRecord::new(Span::new(start, end), store(), policy)
    }

    #[test]
    fn test_lookup() {
        let mut table = GuardTable::new();
        assert!(table.insert(record(0x1000, 0x3000, GuardPolicy::TrapAlways)));
        assert!(table.lookup(0xfff).is_none());
        assert_eq!(table.lookup(0x1000).unwrap().policy, GuardPolicy::TrapAlways);
        assert!(table.lookup(0x2fff).is_some());
        assert!(table.lookup(0x3000).is_none());
    }

    #[test]
    fn test_insert_rejects_overlap() {
        let mut table = GuardTable::new();
        assert!(table.insert(record(0x1000, 0x3000, GuardPolicy::TrapAlways)));
        assert!(!table.insert(record(0x2000, 0x4000, GuardPolicy::TrapAlways)));
        assert!(!table.insert(record(0x0, 0x1001, GuardPolicy::TrapAlways)));
        assert!(table.insert(record(0x3000, 0x4000, GuardPolicy::TrapOnWrite)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_carve_splits_record() {
        let mut table = GuardTable::new();
        assert!(table.insert(record(0x0, 0x4000, GuardPolicy::CopyOnWriteThenAllow)));
        table.carve(Span::new(0x1000, 0x2000));
        assert_eq!(table.len(), 2);
        assert!(table.lookup(0xfff).is_some());
        assert!(table.lookup(0x1000).is_none());
        assert!(table.lookup(0x1fff).is_none());
        assert!(table.lookup(0x2000).is_some());
    }

    #[test]
    fn test_fill_covers_only_holes() {
        let mut table = GuardTable::new();
        assert!(table.insert(record(0x1000, 0x2000, GuardPolicy::TrackDirty)));
        table.fill(Span::new(0x0, 0x4000), store(), GuardPolicy::CopyOnWriteThenAllow);
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(0x1800).unwrap().policy, GuardPolicy::TrackDirty);
        assert_eq!(
            table.lookup(0x800).unwrap().policy,
            GuardPolicy::CopyOnWriteThenAllow
        );
        assert_eq!(
            table.lookup(0x3fff).unwrap().policy,
            GuardPolicy::CopyOnWriteThenAllow
        );
        // Filling again is a no-op
        table.fill(Span::new(0x0, 0x4000), store(), GuardPolicy::CopyOnWriteThenAllow);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_remove_by_owner() {
        let mut table = GuardTable::new();
        let mapping = Owner::Mapping(MappingId(1));
        assert!(table.insert(record(0x0, 0x1000, GuardPolicy::TrapAlways)));
        assert!(table.insert(record(0x1000, 0x2000, GuardPolicy::CopyOnWriteThenAllow)));
        assert!(table.insert(GuardRecord::new(
            Span::new(0x2000, 0x3000),
            mapping,
            GuardPolicy::TrackDirty
        )));
        assert_eq!(table.remove_owner(mapping), 1);
        assert_eq!(table.remove_owner(store()), 2);
        assert!(table.is_empty());
        assert!(!table.overlaps(Span::new(0x0, 0x3000)));
    }
}
