// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Option String Parsing
//!
//! Runtime options arrive as a kernel-style command line of `key=value`
//! words, normally through the `WAMEM_OPTS` environment variable.
//!
//! # Design
//!
//! - Words are separated by whitespace
//! - A key without `=` gets an empty value
//! - Later words override earlier ones with the same key
//! - Unparseable values fall back to the default and are logged
//!
//! # Usage
//!
//! ```rust,ignore
//! let cmdline = Cmdline::parse("wamem.guard_before=2g wamem.populate=lazy");
//! let guard = cmdline.get_size("wamem.guard_before", 0);
//! let config = Config::from_cmdline(&cmdline);
//! ```

use crate::types::Size;
use crate::vm::mapping::Populate;
use crate::log_warn;

/// Environment variable holding the option string
pub const OPTS_ENV: &str = "WAMEM_OPTS";

/// ============================================================================
/// Command Line
/// ============================================================================

/// Parsed option words
#[derive(Debug, Clone, Default)]
pub struct Cmdline {
    entries: Vec<(String, String)>,
}

impl Cmdline {
    /// Split an option string into entries
    pub fn parse(data: &str) -> Self {
        let entries = data
            .split_whitespace()
            .map(|word| match word.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (word.to_string(), String::new()),
            })
            .collect();
        Self { entries }
    }

    /// Read the option string from `WAMEM_OPTS`; empty if unset
    pub fn from_env() -> Self {
        std::env::var(OPTS_ENV)
            .map(|opts| Self::parse(&opts))
            .unwrap_or_default()
    }

    /// Get a value; the last occurrence wins
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Get a byte size
    ///
    /// Accepts decimal or `0x` hex, optionally followed by a `k`, `m` or `g`
    /// binary suffix.
    pub fn get_size(&self, key: &str, default: Size) -> Size {
        match self.get(key) {
            None | Some("") => default,
            Some(v) => parse_size(v).unwrap_or_else(|| {
                log_warn!("ignoring {}={}: not a size", key, v);
                default
            }),
        }
    }
}

/// Parse a size with optional hex prefix and binary suffix
fn parse_size(value: &str) -> Option<Size> {
    let (digits, shift) = match value.as_bytes().last()? {
        b'k' | b'K' => (&value[..value.len() - 1], 10),
        b'm' | b'M' => (&value[..value.len() - 1], 20),
        b'g' | b'G' => (&value[..value.len() - 1], 30),
        _ => (value, 0),
    };

    let base = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => Size::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<Size>().ok()?,
    };

    base.checked_mul(1 << shift)
}

/// ============================================================================
/// Configuration
/// ============================================================================

/// Process-wide options, fixed when the fault context is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Bytes reserved and trapped below every store's base
    pub guard_before: Size,

    /// Bytes reserved after every store; at least one page is always kept
    pub guard_after: Size,

    /// How `map_file` loads file content when the caller does not say
    pub populate: Populate,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            guard_before: 0,
            guard_after: 0,
            populate: Populate::Eager,
        }
    }
}

impl Config {
    /// Build a configuration from parsed options
    pub fn from_cmdline(cmdline: &Cmdline) -> Self {
        let defaults = Self::default();
        let populate = match cmdline.get("wamem.populate") {
            None => defaults.populate,
            Some("eager") => Populate::Eager,
            Some("lazy") => Populate::Lazy,
            Some(other) => {
                log_warn!("ignoring wamem.populate={}: expected eager or lazy", other);
                defaults.populate
            }
        };

        Self {
            guard_before: cmdline.get_size("wamem.guard_before", defaults.guard_before),
            guard_after: cmdline.get_size("wamem.guard_after", defaults.guard_after),
            populate,
        }
    }

    /// Build a configuration from `WAMEM_OPTS`
    pub fn from_env() -> Self {
        Self::from_cmdline(&Cmdline::from_env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmdline_get() {
        let cmdline = Cmdline::parse("a=1 flag  b=two a=3");
        assert_eq!(cmdline.get("a"), Some("3"));
        assert_eq!(cmdline.get("b"), Some("two"));
        assert_eq!(cmdline.get("flag"), Some(""));
        assert_eq!(cmdline.get("missing"), None);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("0x1000"), Some(0x1000));
        assert_eq!(parse_size("64k"), Some(64 * 1024));
        assert_eq!(parse_size("2g"), Some(2 << 30));
        assert_eq!(parse_size("12q"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn test_config_from_cmdline() {
        let config = Config::from_cmdline(&Cmdline::parse(
            "wamem.guard_before=1m wamem.guard_after=0x2000 wamem.populate=lazy",
        ));
        assert_eq!(config.guard_before, 1 << 20);
        assert_eq!(config.guard_after, 0x2000);
        assert_eq!(config.populate, Populate::Lazy);
    }

    #[test]
    fn test_config_bad_values_fall_back() {
        let config = Config::from_cmdline(&Cmdline::parse(
            "wamem.guard_before=lots wamem.populate=sometimes",
        ));
        assert_eq!(config, Config::default());
    }
}
