// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Fault Statistics
//!
//! Counters bumped by the fault resolver. They are plain atomics so the
//! signal handler can update them without taking any lock.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = ctx.stats();
//! log_info!("{} faults, {} cow copies", stats.faults, stats.cow_copies);
//! ```

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// ============================================================================
/// Counters
/// ============================================================================

/// Live counters owned by the process context
#[derive(Debug, Default)]
pub struct FaultStats {
    faults: AtomicU64,
    cow_copies: AtomicU64,
    page_ins: AtomicU64,
    dirty_marks: AtomicU64,
    traps: AtomicU64,
    unclassified: AtomicU64,
}

impl FaultStats {
    /// Create zeroed counters
    pub const fn new() -> Self {
        Self {
            faults: AtomicU64::new(0),
            cow_copies: AtomicU64::new(0),
            page_ins: AtomicU64::new(0),
            dirty_marks: AtomicU64::new(0),
            traps: AtomicU64::new(0),
            unclassified: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cow_copy(&self) {
        self.cow_copies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_page_in(&self) {
        self.page_ins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dirty_mark(&self) {
        self.dirty_marks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_trap(&self) {
        self.traps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unclassified(&self) {
        self.unclassified.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values
    pub fn snapshot(&self) -> FaultStatsSnapshot {
        FaultStatsSnapshot {
            faults: self.faults.load(Ordering::Relaxed),
            cow_copies: self.cow_copies.load(Ordering::Relaxed),
            page_ins: self.page_ins.load(Ordering::Relaxed),
            dirty_marks: self.dirty_marks.load(Ordering::Relaxed),
            traps: self.traps.load(Ordering::Relaxed),
            unclassified: self.unclassified.load(Ordering::Relaxed),
        }
    }
}

/// ============================================================================
/// Snapshot
/// ============================================================================

/// Fault statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStatsSnapshot {
    /// Faults handed to the resolver (hardware and checked path)
    pub faults: u64,

    /// Pages duplicated from a copy-on-write template
    pub cow_copies: u64,

    /// Pages loaded from a mapped file
    pub page_ins: u64,

    /// Pages newly recorded as dirty
    pub dirty_marks: u64,

    /// Faults converted into trap errors
    pub traps: u64,

    /// Faults outside every guard record
    pub unclassified: u64,
}

impl fmt::Display for FaultStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "faults={} cow_copies={} page_ins={} dirty_marks={} traps={} unclassified={}",
            self.faults,
            self.cow_copies,
            self.page_ins,
            self.dirty_marks,
            self.traps,
            self.unclassified
        )
    }
}
