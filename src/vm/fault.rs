// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Page Fault Handling
//!
//! Every protection fault the crate cares about goes through [`resolve`],
//! whichever way it arrives:
//!
//! - **Hardware**: the SIGSEGV/SIGBUS handler installed by
//!   [`install_handler`] catches native accesses through raw pointers. The
//!   access kind is inferred from the page protection.
//! - **Checked**: the context's `read`/`write` path checks each page's
//!   protection the way the MMU would and resolves would-be faults with the
//!   real access kind.
//!
//! # Design
//!
//! - **Lookup first**: an address outside every guard record is never ours;
//!   it stays fatal
//! - **Owner decides the trap**: store-owned records raise
//!   `OutOfBoundsAccess`, mapping-owned records raise `ReadOnlyViolation`
//! - **No allocation**: everything reachable from the handler works on
//!   preallocated state; errors carried out of it are plain values
//! - **No re-entry**: the handler refuses the state lock if the faulting
//!   thread already holds it
//!
//! On the hardware path only `Resumed` lets the instruction restart. Traps
//! and unclassified faults are reported on stderr, the previous disposition
//! is restored and the fault is re-raised.

use core::ffi::c_void;
use core::{mem, ptr};
use std::io;

use libc::c_int;
use spin::Once;

use crate::debug::fault_print;
use crate::err::{Error, Result};
use crate::types::{StoreId, VAddr};
use crate::vm::guard::{GuardPolicy, Owner};
use crate::vm::layout::{Access, Prot};
use crate::vm::stats::FaultStats;
use crate::vm::{cow, mapping, Context, State};
use crate::log_debug;

/// ============================================================================
/// Resolution
/// ============================================================================

/// Outcome of resolving one fault
#[derive(Debug)]
pub enum Resolution {
    /// Fault handled; the access can be retried and will succeed
    Resumed,

    /// Intentional trap, surfaced to the caller
    Trap(Error),

    /// The fault was ours but resolving it failed
    Failed(Error),

    /// No guard record covers the address
    Unclassified,
}

/// Error raised by a trapping record
fn trap_error(owner: Owner, addr: VAddr) -> Error {
    match owner {
        Owner::Store(_) => Error::OutOfBoundsAccess { addr },
        Owner::Mapping(_) => Error::ReadOnlyViolation { addr },
    }
}

/// Resolve a fault at `addr`
///
/// # Arguments
///
/// * `state` - Locked context state
/// * `stats` - Counters to update
/// * `addr` - Faulting address
/// * `access` - Kind of the faulting access
pub(crate) fn resolve(state: &mut State, stats: &FaultStats, addr: VAddr, access: Access) -> Resolution {
    stats.record_fault();

    let record = match state.guards.lookup(addr) {
        Some(record) => *record,
        None => {
            stats.record_unclassified();
            return Resolution::Unclassified;
        }
    };

    let resolution = match (record.policy, record.owner) {
        (GuardPolicy::TrapAlways, owner) => Resolution::Trap(trap_error(owner, addr)),
        (GuardPolicy::TrapOnWrite, owner) if access == Access::Write => {
            Resolution::Trap(trap_error(owner, addr))
        }
        (GuardPolicy::TrapOnWrite, Owner::Mapping(id)) => {
            mapping::resolve_read(&mut state.mappings, &mut state.stores, stats, id, addr)
        }
        (GuardPolicy::TrackDirty, Owner::Mapping(id)) => {
            mapping::resolve_dirty(&mut state.mappings, &mut state.stores, stats, id, addr, access)
        }
        (GuardPolicy::CopyOnWriteThenAllow, Owner::Store(id)) => {
            cow::resolve(&mut state.stores, stats, id, addr, access)
        }
        _ => Resolution::Unclassified,
    };

    match resolution {
        Resolution::Trap(_) => stats.record_trap(),
        Resolution::Unclassified => stats.record_unclassified(),
        _ => {}
    }
    resolution
}

/// Store whose pages hold `addr`, if a guard record covers it
fn store_at(state: &State, addr: VAddr) -> Option<StoreId> {
    match state.guards.lookup(addr)?.owner {
        Owner::Store(id) => Some(id),
        Owner::Mapping(id) => state.mappings.get(id).ok().map(|m| m.store()),
    }
}

/// Current protection of the page holding `addr`
///
/// Uncommitted and unknown pages read as inaccessible.
fn prot_at(state: &State, addr: VAddr) -> Prot {
    store_at(state, addr)
        .and_then(|id| state.stores.get(id).ok())
        .and_then(|store| {
            let offset = store.offset_of(addr)?;
            store.page_prot(store.page_of(offset))
        })
        .unwrap_or(Prot::empty())
}

/// OS error number behind a resolution failure, 0 if there is none
///
/// `io::Error`'s own `Display` may allocate, so the handler prints this
/// instead.
fn failure_errno(err: &Error) -> c_int {
    match err {
        Error::PageIn { source, .. } | Error::Protect { source, .. } => source.raw_os_error().unwrap_or(0),
        _ => 0,
    }
}

/// Resolve a hardware fault raised on the current thread
fn resolve_hardware(ctx: &Context, addr: VAddr) -> Resolution {
    let mut state = match ctx.state.lock_from_fault() {
        Some(state) => state,
        None => return Resolution::Unclassified,
    };
    let access = Access::infer(prot_at(&state, addr));
    resolve(&mut state, &ctx.stats, addr, access)
}

/// ============================================================================
/// Signal Handler
/// ============================================================================

/// Signals raised by protection faults
const FAULT_SIGNALS: [c_int; 2] = [libc::SIGSEGV, libc::SIGBUS];

/// Dispositions in place before ours, indexed like `FAULT_SIGNALS`
static PREVIOUS: Once<[libc::sigaction; 2]> = Once::new();

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn fault_address(info: *const libc::siginfo_t) -> VAddr {
    (*info).si_addr() as VAddr
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn fault_address(info: *const libc::siginfo_t) -> VAddr {
    (*info).si_addr as VAddr
}

/// Put back the disposition that was active before `install_handler`
fn restore_previous(signo: c_int) {
    let previous = PREVIOUS
        .get()
        .zip(FAULT_SIGNALS.iter().position(|&s| s == signo))
        .map(|(actions, index)| actions[index])
        .filter(|action| action.sa_sigaction != libc::SIG_IGN);

    // SAFETY: sigaction/signal are async-signal-safe and the action is a
    // copy of one the kernel gave us.
    unsafe {
        match previous {
            Some(action) => {
                libc::sigaction(signo, &action, ptr::null_mut());
            }
            None => {
                libc::signal(signo, libc::SIG_DFL);
            }
        }
    }
}

/// SIGSEGV/SIGBUS handler
///
/// A trap in native code cannot become an error at the faulting call site
/// without unwinding through the signal frame, so every outcome except
/// `Resumed` ends the process. Hosts wanting recoverable traps go through
/// the context's checked accessors.
extern "C" fn handle_fault(signo: c_int, info: *mut libc::siginfo_t, _ucontext: *mut c_void) {
    // SAFETY: SA_SIGINFO handlers always receive a valid siginfo.
    let addr = unsafe { fault_address(info) };

    let resolution = match crate::vm::context() {
        Some(ctx) => resolve_hardware(ctx, addr),
        None => Resolution::Unclassified,
    };

    match resolution {
        Resolution::Resumed => return,
        Resolution::Trap(err) => {
            fault_print(format_args!("wamem: {} in native code (signal {})\n", err, signo));
        }
        Resolution::Failed(err) => {
            fault_print(format_args!(
                "wamem: cannot resolve fault at {:#x} (status {}, errno {})\n",
                addr,
                err.as_raw(),
                failure_errno(&err)
            ));
        }
        Resolution::Unclassified => {
            fault_print(format_args!("wamem: unclassified fault at {:#x} (signal {})\n", addr, signo));
        }
    }

    // Returning re-executes the instruction under the restored disposition.
    restore_previous(signo);
}

/// Install the process-wide fault handler
///
/// Only the first call touches the signal dispositions.
pub(crate) fn install_handler() -> Result {
    PREVIOUS.try_call_once(|| {
        // SAFETY: zeroed sigaction structs are valid "no handler" values.
        let mut previous: [libc::sigaction; 2] = unsafe { mem::zeroed() };

        for (slot, &signo) in previous.iter_mut().zip(FAULT_SIGNALS.iter()) {
            // SAFETY: the action points to a handler with the SA_SIGINFO
            // signature and outlives the call.
            let rc = unsafe {
                let mut action: libc::sigaction = mem::zeroed();
                action.sa_sigaction = handle_fault
                    as extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void)
                    as libc::sighandler_t;
                action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(signo, &action, slot)
            };
            if rc != 0 {
                return Err(Error::HandlerInstall(io::Error::last_os_error()));
            }
        }

        log_debug!("fault handler installed for SIGSEGV and SIGBUS");
        Ok(previous)
    })?;
    Ok(())
}
