// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

#![allow(dead_code)]

use std::io::Write;

use tempfile::NamedTempFile;
use wamem::{install_once, Context};

/// Installed context with test logging enabled
pub fn ctx() -> &'static Context {
    let _ = env_logger::builder().is_test(true).try_init();
    install_once().expect("fault handler installs")
}

/// Temporary file holding `bytes`
pub fn scratch(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}
