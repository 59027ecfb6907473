// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

mod common;

use wamem::{Error, StoreKind};

const MIB: usize = 1024 * 1024;

#[test]
fn test_large_reservation_small_commit() {
    let ctx = common::ctx();
    let store = ctx.create_reserved(512 * MIB, 65536).unwrap();

    ctx.store_u8(store, 10, 42).unwrap();
    assert_eq!(ctx.load_u8(store, 10).unwrap(), 42);

    let info = ctx.describe_backing_store(store).unwrap();
    assert_eq!(info.reserved_size, 512 * MIB);
    assert_eq!(info.committed_size, 65536);
    assert_eq!(info.kind, StoreKind::Plain);
    assert_eq!(info.active_mapping_count, 0);
    ctx.release(store).unwrap();
}

#[test]
fn test_writes_below_commit_succeed_and_tail_traps() {
    let ctx = common::ctx();
    let ps = ctx.page_size();

    for (reserved, initial) in [(ps, ps), (4 * ps, ps), (8 * ps, 3 * ps), (2 * ps, 0)] {
        let store = ctx.create_reserved(reserved, initial).unwrap();
        for offset in [0, initial / 2, initial.saturating_sub(1)] {
            if offset < initial {
                ctx.store_u8(store, offset, 0xaa).unwrap();
            }
        }
        for offset in [initial, initial + 1, reserved - 1] {
            if offset >= initial && offset < reserved {
                let err = ctx.store_u8(store, offset, 0xaa).unwrap_err();
                assert!(matches!(err, Error::OutOfBoundsAccess { .. }), "{:#x}", offset);
            }
        }
        ctx.release(store).unwrap();
    }
}

#[test]
fn test_native_access_within_commit() {
    let ctx = common::ctx();
    let ps = ctx.page_size();
    let store = ctx.create_reserved(4 * ps, 2 * ps).unwrap();

    let (base, committed) = ctx.raw_parts(store).unwrap();
    assert_eq!(committed, 2 * ps);
    unsafe {
        base.add(ps + 7).write_volatile(0x5a);
        assert_eq!(base.add(ps + 7).read_volatile(), 0x5a);
    }
    assert_eq!(ctx.load_u8(store, ps + 7).unwrap(), 0x5a);
    assert_eq!(ctx.stats().unclassified, 0);
    ctx.release(store).unwrap();
}

#[test]
fn test_grow_is_idempotent() {
    let ctx = common::ctx();
    let ps = ctx.page_size();
    let store = ctx.create_reserved(8 * ps, ps).unwrap();
    ctx.store_u8(store, 3, 1).unwrap();

    ctx.grow(store, 4 * ps).unwrap();
    let first = ctx.describe_backing_store(store).unwrap();
    ctx.grow(store, 4 * ps).unwrap();
    let second = ctx.describe_backing_store(store).unwrap();
    assert_eq!(first, second);
    assert_eq!(second.committed_size, 4 * ps);

    ctx.store_u8(store, 3 * ps, 9).unwrap();
    assert_eq!(ctx.load_u8(store, 3).unwrap(), 1);
    assert!(ctx.store_u8(store, 4 * ps, 9).unwrap_err().is_trap());
    ctx.release(store).unwrap();
}

#[test]
fn test_grow_beyond_reservation_never_mutates() {
    let ctx = common::ctx();
    let ps = ctx.page_size();
    let store = ctx.create_reserved(4 * ps, 2 * ps).unwrap();

    for size in [5 * ps, 64 * ps] {
        let err = ctx.grow(store, size).unwrap_err();
        assert!(matches!(err, Error::GrowBeyondReservation { .. }));
        assert_eq!(ctx.describe_backing_store(store).unwrap().committed_size, 2 * ps);
    }
    assert!(matches!(ctx.grow(store, ps), Err(Error::InvalidSize { .. })));
    ctx.release(store).unwrap();
}

#[test]
fn test_invalid_sizes() {
    let ctx = common::ctx();
    let ps = ctx.page_size();

    assert!(matches!(ctx.create_reserved(0, 0), Err(Error::InvalidSize { .. })));
    assert!(matches!(ctx.create_reserved(ps, 2 * ps), Err(Error::InvalidSize { .. })));
    assert!(matches!(ctx.create_reserved(ps + 3, 0), Err(Error::InvalidSize { .. })));
}

#[test]
fn test_reservation_exhausted() {
    let ctx = common::ctx();
    let ps = ctx.page_size();
    let huge = (usize::MAX / 2) & !(ps - 1);
    assert!(matches!(
        ctx.create_reserved(huge, ps),
        Err(Error::ReservationExhausted { .. })
    ));
}

#[test]
fn test_released_store_is_invalid() {
    let ctx = common::ctx();
    let ps = ctx.page_size();
    let store = ctx.create_reserved(ps, ps).unwrap();
    ctx.release(store).unwrap();

    assert!(matches!(ctx.describe_backing_store(store), Err(Error::InvalidStore(_))));
    assert!(matches!(ctx.grow(store, ps), Err(Error::InvalidStore(_))));
    assert!(matches!(ctx.create_copy_on_write(store), Err(Error::InvalidStore(_))));
}
