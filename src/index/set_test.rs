// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the key-only index containers.

#[cfg(test)]
mod tests {
    use crate::index::set::{IndexMultiset, IndexSet};
    use crate::tree::Flags;
    use tempfile::TempDir;

    const PAGE: usize = 128;
    const SIG: u64 = 3;

    fn open_set(dir: &TempDir, name: &str) -> IndexSet<String> {
        IndexSet::open(
            dir.path().join(format!("{}.dat", name)),
            256,
            dir.path().join(format!("{}.ndx", name)),
            Flags::TRUNCATE,
            SIG,
            PAGE,
        )
        .unwrap()
    }

    #[test]
    fn test_insert_orders_variable_length_keys() {
        let dir = TempDir::new().unwrap();
        let mut set = open_set(&dir, "order");

        for word in ["pear", "apple", "quince", "banana", "fig"] {
            let (_, inserted) = set.insert(&word.to_string()).unwrap();
            assert!(inserted);
        }
        let keys: Vec<String> = set.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(keys, vec!["apple", "banana", "fig", "pear", "quince"]);
    }

    #[test]
    fn test_duplicate_insert_appends_no_bytes() {
        let dir = TempDir::new().unwrap();
        let mut set = open_set(&dir, "dup");

        set.insert(&"kiwi".to_string()).unwrap();
        let size_after_first = set.file_size();

        let (_, inserted) = set.insert(&"kiwi".to_string()).unwrap();
        assert!(!inserted);
        assert_eq!(set.file_size(), size_after_first);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_push_back_then_insert_file_position() {
        let dir = TempDir::new().unwrap();
        let mut set = open_set(&dir, "manual");

        let pos = set.push_back(&"orphan".to_string()).unwrap();
        // Not indexed yet.
        assert!(set.is_empty());

        let (_, inserted) = set.insert_file_position(pos).unwrap();
        assert!(inserted);
        assert!(set.contains(&"orphan".to_string()).unwrap());
    }

    #[test]
    fn test_erase_keeps_bytes_in_data_file() {
        let dir = TempDir::new().unwrap();
        let mut set = open_set(&dir, "erase");

        set.insert(&"stays".to_string()).unwrap();
        let size = set.file_size();
        assert_eq!(set.erase(&"stays".to_string()).unwrap(), 1);
        assert!(set.is_empty());
        // Key bytes are never reclaimed.
        assert_eq!(set.file_size(), size);
    }

    #[test]
    fn test_many_keys_split_index_tree() {
        let dir = TempDir::new().unwrap();
        let mut set = open_set(&dir, "many");

        let mut expected: Vec<String> = (0..300).map(|i| format!("key-{:05}", i)).collect();
        // Insert shuffled-ish: odd then even.
        for k in expected.iter().skip(1).step_by(2) {
            set.insert(k).unwrap();
        }
        for k in expected.iter().step_by(2) {
            set.insert(k).unwrap();
        }
        expected.sort();

        let keys: Vec<String> = set.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(keys, expected);
        assert_eq!(set.len(), 300);

        let pos = set.lower_bound(&"key-00100".to_string()).unwrap().unwrap();
        assert_eq!(set.key_at(&pos).unwrap(), "key-00100");
    }

    #[test]
    fn test_reopen_read_only() {
        let dir = TempDir::new().unwrap();
        let dat = dir.path().join("ro.dat");
        let ndx = dir.path().join("ro.ndx");
        {
            let mut set: IndexSet<String> =
                IndexSet::open(&dat, 128, &ndx, Flags::TRUNCATE, SIG, PAGE).unwrap();
            for word in ["alpha", "beta", "gamma"] {
                set.insert(&word.to_string()).unwrap();
            }
            set.close().unwrap();
        }

        let set: IndexSet<String> =
            IndexSet::open(&dat, 0, &ndx, Flags::READ_ONLY, SIG, PAGE).unwrap();
        let keys: Vec<String> = set.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(keys, vec!["alpha", "beta", "gamma"]);
        assert!(set.contains(&"beta".to_string()).unwrap());
        assert!(!set.contains(&"delta".to_string()).unwrap());
    }

    #[test]
    fn test_multiset_keeps_equal_keys() {
        let dir = TempDir::new().unwrap();
        let mut set: IndexMultiset<String> = IndexMultiset::open(
            dir.path().join("multi.dat"),
            128,
            dir.path().join("multi.ndx"),
            Flags::TRUNCATE,
            SIG,
            PAGE,
        )
        .unwrap();

        // The multiset appends unconditionally, equal bytes included.
        set.insert(&"twin".to_string()).unwrap();
        let size_one = set.file().borrow().len();
        set.insert(&"twin".to_string()).unwrap();
        assert_eq!(set.file().borrow().len(), size_one * 2);
        assert_eq!(set.count(&"twin".to_string()).unwrap(), 2);

        let matches: Vec<String> = set
            .equal_range(&"twin".to_string())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(matches, vec!["twin", "twin"]);
    }

    #[test]
    fn test_joined_index_shares_data_file() {
        use crate::tree::Compare;
        use std::cmp::Ordering;

        // A second index over the same data file, ordered by length then
        // lexicographically.
        #[derive(Clone, Copy, Default)]
        struct ByLength;
        impl Compare<String> for ByLength {
            fn compare(&self, a: &String, b: &String) -> Ordering {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
        }

        let dir = TempDir::new().unwrap();
        let mut primary: IndexSet<String> = IndexSet::open(
            dir.path().join("shared.dat"),
            256,
            dir.path().join("shared.ndx"),
            Flags::TRUNCATE,
            SIG,
            PAGE,
        )
        .unwrap();

        let mut by_length: IndexSet<String, ByLength> = IndexSet::open_shared(
            primary.file(),
            dir.path().join("shared-len.ndx"),
            Flags::TRUNCATE,
            SIG,
            ByLength,
            PAGE,
        )
        .unwrap();

        for word in ["cherry", "fig", "apple"] {
            let pos = primary.push_back(&word.to_string()).unwrap();
            primary.insert_file_position(pos).unwrap();
            by_length.insert_file_position(pos).unwrap();
        }

        let alpha: Vec<String> = primary.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(alpha, vec!["apple", "cherry", "fig"]);
        let by_len: Vec<String> = by_length.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(by_len, vec!["fig", "apple", "cherry"]);
    }

    #[test]
    fn test_oversized_key_rejected() {
        use crate::error::TreeError;

        let dir = TempDir::new().unwrap();
        let mut set = open_set(&dir, "big");

        // The flat element limit is a third of the index page size.
        let huge = "x".repeat(PAGE);
        assert!(matches!(
            set.insert(&huge),
            Err(TreeError::TypeMismatch { .. })
        ));
    }
}
