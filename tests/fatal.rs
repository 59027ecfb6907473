// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Accesses that must terminate the process.
//!
//! Each test re-runs itself in a child process; the child performs the
//! fatal access and exits cleanly only if it survives.

mod common;

use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Output};

const CHILD_ENV: &str = "WAMEM_FATAL_CHILD";
const MIB: usize = 1024 * 1024;

fn in_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

fn run_child(test: &str) -> Output {
    Command::new(std::env::current_exe().unwrap())
        .args(["--exact", test, "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .output()
        .unwrap()
}

fn assert_died(output: &Output) {
    assert!(
        !output.status.success(),
        "child survived: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_checked_access_beyond_reservation_aborts() {
    if in_child() {
        let ctx = common::ctx();
        let store = ctx.create_reserved(512 * MIB, 65536).unwrap();
        ctx.store_u8(store, 10, 42).unwrap();
        let _ = ctx.store_u8(store, 512 * MIB + 10, 1);
        std::process::exit(0);
    }

    let output = run_child("test_checked_access_beyond_reservation_aborts");
    assert_died(&output);
    assert_eq!(output.status.signal(), Some(libc::SIGABRT));
}

#[test]
fn test_native_access_outside_records_is_fatal() {
    if in_child() {
        let ctx = common::ctx();
        let ps = ctx.page_size();
        let store = ctx.create_reserved(4 * ps, ps).unwrap();
        let (base, _) = ctx.raw_parts(store).unwrap();
        ctx.release(store).unwrap();
        unsafe { base.write_volatile(1) };
        std::process::exit(0);
    }

    let output = run_child("test_native_access_outside_records_is_fatal");
    assert_died(&output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unclassified fault"), "{}", stderr);
}

#[test]
fn test_native_access_past_reservation_is_fatal() {
    if in_child() {
        let ctx = common::ctx();
        let ps = ctx.page_size();
        // The newer reservation usually lands right below the older one.
        let older = ctx.create_reserved(4 * ps, 4 * ps).unwrap();
        let newer = ctx.create_reserved(4 * ps, ps).unwrap();
        let (base, _) = ctx.raw_parts(newer).unwrap();
        unsafe { base.add(4 * ps + 10).write_volatile(0x77) };
        eprintln!("survived, older[10] = {:#x}", ctx.load_u8(older, 10).unwrap());
        std::process::exit(0);
    }

    let output = run_child("test_native_access_past_reservation_is_fatal");
    assert_died(&output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unclassified fault"), "{}", stderr);
}

#[test]
fn test_native_tail_access_is_fatal() {
    if in_child() {
        let ctx = common::ctx();
        let ps = ctx.page_size();
        let store = ctx.create_reserved(4 * ps, ps).unwrap();
        let (base, _) = ctx.raw_parts(store).unwrap();
        unsafe { base.add(2 * ps).write_volatile(1) };
        std::process::exit(0);
    }

    let output = run_child("test_native_tail_access_is_fatal");
    assert_died(&output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("out-of-bounds access"), "{}", stderr);
}

#[test]
fn test_native_write_to_read_only_mapping_is_fatal() {
    if in_child() {
        let ctx = common::ctx();
        let ps = ctx.page_size();
        let file = common::scratch(&[1, 2, 3, 4]);
        let store = ctx.create_reserved(2 * ps, 2 * ps).unwrap();
        ctx.map_file(store, file.path(), ps, 4, false).unwrap();
        let (base, _) = ctx.raw_parts(store).unwrap();
        unsafe { base.add(ps).write_volatile(9) };
        std::process::exit(0);
    }

    let output = run_child("test_native_write_to_read_only_mapping_is_fatal");
    assert_died(&output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("read-only mapping"), "{}", stderr);
}
