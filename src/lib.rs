// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! wamem - Guard-Page Backed Linear Memory
//!
//! Backing stores for the linear memory of a sandboxed VM. A host installs
//! the fault handler once, then creates stores that reserve a large range
//! and commit only a prefix, clones them copy-on-write, and projects files
//! into them.
//!
//! # Usage
//!
//! ```rust,no_run
//! use wamem::install_once;
//!
//! let ctx = install_once()?;
//! let store = ctx.create_reserved(512 << 20, 64 << 10)?;
//! ctx.store_u8(store, 10, 42)?;
//! assert_eq!(ctx.load_u8(store, 10)?, 42);
//!
//! let (base, committed) = ctx.raw_parts(store)?;
//! # let _ = (base, committed);
//! # Ok::<(), wamem::Error>(())
//! ```

#![cfg(unix)]

pub mod bitmap;
pub mod cmdline;
pub mod debug;
pub mod err;
pub mod sync;
pub mod types;
pub mod vm;

pub use cmdline::Config;
pub use err::{Error, Result};
pub use types::{MappingId, Size, Status, StoreId, VAddr};
pub use vm::{
    install_once, install_once_with, Context, FaultStatsSnapshot, MapOptions, Populate, StoreInfo,
    StoreKind,
};
