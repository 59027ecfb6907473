// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Logging and Fault Diagnostics
//!
//! Regular logging goes through the `log` facade so the embedding host picks
//! the backend. The fault handler cannot use it (a logger may lock or
//! allocate), so fault-time output is formatted into a fixed stack buffer
//! and written straight to stderr with `write(2)`.
//!
//! # Usage
//!
//! ```rust,ignore
//! log_info!("reserved {:#x} bytes at {:#x}", size, base);
//! log_debug!("cow copy of page {}", page);
//!
//! // inside the signal handler only
//! fault_print(format_args!("wamem: unclassified fault at {:#x}\n", addr));
//! ```

use core::fmt::{self, Write};

/// Log levels
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Trace-level logging (very verbose)
    Trace = 0,

    /// Debug-level logging (verbose)
    Debug = 1,

    /// Informational logging
    Info = 2,

    /// Warning-level logging
    Warning = 3,

    /// Error-level logging
    Error = 4,
}

impl LogLevel {
    /// Matching `log` crate level
    pub fn to_log(self) -> log::Level {
        match self {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Print a formatted message at a specific log level
///
/// # Arguments
///
/// * `level` - Log level for this message
/// * `args` - Format arguments
#[inline]
pub fn log_print(level: LogLevel, args: fmt::Arguments) {
    log::log!(target: "wamem", level.to_log(), "{}", args);
}

/// Log a trace message
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::debug::log_print($crate::debug::LogLevel::Trace, format_args!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::debug::log_print($crate::debug::LogLevel::Debug, format_args!($($arg)*))
    };
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::debug::log_print($crate::debug::LogLevel::Info, format_args!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::debug::log_print($crate::debug::LogLevel::Warning, format_args!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::debug::log_print($crate::debug::LogLevel::Error, format_args!($($arg)*))
    };
}

/// ============================================================================
/// Fault-Time Output
/// ============================================================================

/// Size of the fault message buffer
const FAULT_BUF_SIZE: usize = 256;

/// Fixed-capacity formatter; output past the capacity is dropped
pub struct FaultWriter {
    buf: [u8; FAULT_BUF_SIZE],
    len: usize,
}

impl FaultWriter {
    /// Create an empty writer
    pub const fn new() -> Self {
        Self {
            buf: [0; FAULT_BUF_SIZE],
            len: 0,
        }
    }

    /// Bytes formatted so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Default for FaultWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for FaultWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = FAULT_BUF_SIZE - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

/// Write a message to stderr without allocating or locking
///
/// Safe to call from a signal handler.
pub fn fault_print(args: fmt::Arguments) {
    let mut w = FaultWriter::new();
    let _ = w.write_fmt(args);
    let bytes = w.as_bytes();
    // SAFETY: the buffer is valid for `bytes.len()` bytes; write(2) is
    // async-signal-safe.
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}
