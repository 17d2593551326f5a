// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the key-only containers.

#[cfg(test)]
mod tests {
    use crate::codec::packed::Big;
    use crate::tree::set::{BtreeMultiset, BtreeSet};
    use crate::tree::Flags;
    use tempfile::TempDir;

    const PAGE: usize = 128;
    const SIG: u64 = 1;

    #[test]
    fn test_small_set_traversal_and_bounds() {
        let dir = TempDir::new().unwrap();
        let mut set: BtreeSet<Big<i32>> = BtreeSet::open(
            dir.path().join("small.db"),
            Flags::TRUNCATE,
            SIG,
            PAGE,
        )
        .unwrap();

        set.insert(Big(5)).unwrap();
        set.insert(Big(3)).unwrap();
        set.insert(Big(1)).unwrap();

        let keys: Vec<i32> = set.iter().unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec![1, 3, 5]);

        let lb = set.lower_bound(&Big(3)).unwrap().unwrap();
        assert_eq!(set.key_at(&lb).unwrap(), Big(3));
        let ub = set.upper_bound(&Big(3)).unwrap().unwrap();
        assert_eq!(set.key_at(&ub).unwrap(), Big(5));

        // Past the last key both bounds are the end.
        assert!(set.lower_bound(&Big(6)).unwrap().is_none());
        assert!(set.upper_bound(&Big(5)).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_reports_existing() {
        let dir = TempDir::new().unwrap();
        let mut set: BtreeSet<Big<i32>> = BtreeSet::open(
            dir.path().join("dup.db"),
            Flags::TRUNCATE,
            SIG,
            PAGE,
        )
        .unwrap();

        let (_, first) = set.insert(Big(9)).unwrap();
        assert!(first);
        let (pos, second) = set.insert(Big(9)).unwrap();
        assert!(!second);
        assert_eq!(set.key_at(&pos).unwrap(), Big(9));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_reverse_traversal_is_exact_reverse() {
        let dir = TempDir::new().unwrap();
        let mut set: BtreeSet<Big<i32>> = BtreeSet::open(
            dir.path().join("rev.db"),
            Flags::TRUNCATE,
            SIG,
            PAGE,
        )
        .unwrap();

        for i in [44, 2, 17, 99, 8, 61, 23] {
            set.insert(Big(i)).unwrap();
        }
        let forward: Vec<i32> = set.iter().unwrap().map(|r| r.unwrap().0).collect();
        let mut backward: Vec<i32> = set.iter().unwrap().rev().map(|r| r.unwrap().0).collect();
        backward.reverse();
        assert_eq!(forward, backward);
        assert_eq!(forward, vec![2, 8, 17, 23, 44, 61, 99]);
    }

    #[test]
    fn test_first_last_successor_predecessor() {
        let dir = TempDir::new().unwrap();
        let mut set: BtreeSet<Big<i32>> = BtreeSet::open(
            dir.path().join("walk.db"),
            Flags::TRUNCATE,
            SIG,
            PAGE,
        )
        .unwrap();

        for i in 0..50 {
            set.insert(Big(i * 3)).unwrap();
        }
        assert_eq!(set.first().unwrap(), Some(Big(0)));
        assert_eq!(set.last().unwrap(), Some(Big(147)));

        let pos = set.find(&Big(21)).unwrap().unwrap();
        let next = set.successor(&pos).unwrap().unwrap();
        assert_eq!(set.key_at(&next).unwrap(), Big(24));
        let prev = set.predecessor(&pos).unwrap().unwrap();
        assert_eq!(set.key_at(&prev).unwrap(), Big(18));
    }

    #[test]
    fn test_round_trip_reopen_read_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reopen.db");
        let keys = [14, 3, 99, 27, 56, 41, 8, 72, 65, 30];
        {
            let mut set: BtreeSet<Big<i32>> =
                BtreeSet::open(&path, Flags::TRUNCATE, SIG, PAGE).unwrap();
            for &k in &keys {
                set.insert(Big(k)).unwrap();
            }
            set.close().unwrap();
        }

        let set: BtreeSet<Big<i32>> = BtreeSet::open(&path, Flags::NONE, SIG, PAGE).unwrap();
        assert_eq!(set.len(), keys.len() as u64);
        for &k in &keys {
            let pos = set.find(&Big(k)).unwrap().unwrap();
            assert_eq!(set.key_at(&pos).unwrap(), Big(k));
        }
        set.verify().unwrap();
    }

    #[test]
    fn test_multiset_keeps_duplicates() {
        let dir = TempDir::new().unwrap();
        let mut set: BtreeMultiset<Big<i32>> = BtreeMultiset::open(
            dir.path().join("multi.db"),
            Flags::TRUNCATE,
            SIG,
            PAGE,
        )
        .unwrap();

        for _ in 0..4 {
            set.insert(Big(7)).unwrap();
        }
        set.insert(Big(3)).unwrap();
        assert_eq!(set.len(), 5);
        assert_eq!(set.count(&Big(7)).unwrap(), 4);
        assert_eq!(set.count(&Big(3)).unwrap(), 1);

        // erase removes every equal element
        assert_eq!(set.erase(&Big(7)).unwrap(), 4);
        assert_eq!(set.len(), 1);
        set.verify().unwrap();
    }

    #[test]
    fn test_multiset_duplicates_across_splits() {
        let dir = TempDir::new().unwrap();
        let mut set: BtreeMultiset<Big<i32>> = BtreeMultiset::open(
            dir.path().join("span.db"),
            Flags::TRUNCATE,
            SIG,
            PAGE,
        )
        .unwrap();

        // Enough equal keys to span several 128-byte leaves.
        for _ in 0..100 {
            set.insert(Big(5)).unwrap();
        }
        set.insert(Big(4)).unwrap();
        set.insert(Big(6)).unwrap();
        set.verify().unwrap();

        assert_eq!(set.count(&Big(5)).unwrap(), 100);
        let keys: Vec<i32> = set.iter().unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(keys.first(), Some(&4));
        assert_eq!(keys.last(), Some(&6));
        assert_eq!(keys.len(), 102);

        let matches: Vec<i32> = set
            .equal_range(&Big(5))
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(matches, vec![5; 100]);
    }

    #[test]
    fn test_create_from_range() {
        let dir = TempDir::new().unwrap();
        let set = BtreeSet::<Big<i32>>::create_from(
            (0..40).rev().map(Big),
            dir.path().join("range.db"),
            Flags::TRUNCATE,
            SIG,
            PAGE,
        )
        .unwrap();
        let keys: Vec<i32> = set.iter().unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, (0..40).collect::<Vec<_>>());
    }
}
