// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Endian portability of tree files.
//!
//! Big- and little-endian trait files hold the same logical contents; the
//! header names its byte order and decode honours it, so the same file
//! reads identically on either kind of host. Opening a file with the
//! wrong traits is refused rather than misread.

use pagetree::{Big, BigOrder, BtreeSet, Flags, Little, LittleOrder, TreeError};
use tempfile::TempDir;

const PAGE: usize = 128;
const SIG: u64 = 0xe17;

const KEYS: [i32; 2] = [0x0102_0304, 0x0506_0708];

#[test]
fn big_endian_file_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.db");

    {
        let mut set: BtreeSet<Big<i32>, _, BigOrder> =
            BtreeSet::open(&path, Flags::TRUNCATE, SIG, PAGE).unwrap();
        for k in KEYS {
            set.insert(Big(k)).unwrap();
        }
        set.close().unwrap();
    }

    let set: BtreeSet<Big<i32>, _, BigOrder> =
        BtreeSet::open(&path, Flags::READ_ONLY, SIG, PAGE).unwrap();
    let keys: Vec<i32> = set.iter().unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(keys, KEYS.to_vec());
    set.verify().unwrap();
}

#[test]
fn little_endian_file_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("little.db");

    {
        let mut set: BtreeSet<Little<i32>, _, LittleOrder> =
            BtreeSet::open(&path, Flags::TRUNCATE, SIG, PAGE).unwrap();
        for k in KEYS {
            set.insert(Little(k)).unwrap();
        }
        set.close().unwrap();
    }

    let set: BtreeSet<Little<i32>, _, LittleOrder> =
        BtreeSet::open(&path, Flags::READ_ONLY, SIG, PAGE).unwrap();
    let keys: Vec<i32> = set.iter().unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(keys, KEYS.to_vec());
}

#[test]
fn both_orders_hold_identical_logical_contents() {
    let dir = TempDir::new().unwrap();
    let big_path = dir.path().join("big.db");
    let little_path = dir.path().join("little.db");

    {
        let mut big: BtreeSet<Big<i32>, _, BigOrder> =
            BtreeSet::open(&big_path, Flags::TRUNCATE, SIG, PAGE).unwrap();
        let mut little: BtreeSet<Big<i32>, _, LittleOrder> =
            BtreeSet::open(&little_path, Flags::TRUNCATE, SIG, PAGE).unwrap();
        for k in (0..300).rev() {
            big.insert(Big(k)).unwrap();
            little.insert(Big(k)).unwrap();
        }
        big.close().unwrap();
        little.close().unwrap();
    }

    // Different bytes on disk, same logical sequence.
    assert_ne!(
        std::fs::read(&big_path).unwrap(),
        std::fs::read(&little_path).unwrap()
    );

    let big: BtreeSet<Big<i32>, _, BigOrder> =
        BtreeSet::open(&big_path, Flags::READ_ONLY, SIG, PAGE).unwrap();
    let little: BtreeSet<Big<i32>, _, LittleOrder> =
        BtreeSet::open(&little_path, Flags::READ_ONLY, SIG, PAGE).unwrap();
    let from_big: Vec<i32> = big.iter().unwrap().map(|r| r.unwrap().0).collect();
    let from_little: Vec<i32> = little.iter().unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(from_big, from_little);
    assert_eq!(from_big, (0..300).collect::<Vec<_>>());
}

#[test]
fn wrong_order_traits_are_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.db");
    {
        let set: BtreeSet<Big<i32>, _, BigOrder> =
            BtreeSet::open(&path, Flags::TRUNCATE, SIG, PAGE).unwrap();
        set.close().unwrap();
    }

    assert!(matches!(
        BtreeSet::<Big<i32>, _, LittleOrder>::open(&path, Flags::READ_ONLY, SIG, PAGE),
        Err(TreeError::TypeMismatch { .. })
    ));
}
