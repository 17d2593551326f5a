// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Key-only containers: `BtreeSet` (unique) and `BtreeMultiset`.
//!
//! Thin wrappers around the shared engine. A set stores zero-width mapped
//! values, so a leaf element is just the key image. The variant (splash
//! string, unique/key-only bits) is stamped into the header on create and
//! verified on reopen.

use crate::buffer::manager::CacheStats;
use crate::codec::order::{BigOrder, ByteOrder};
use crate::codec::packed::Packed;
use crate::error::TreeResult;
use crate::tree::cursor::{Position, RawIter};
use crate::tree::engine::Tree;
use crate::tree::header::DEFAULT_MAX_CACHE_PAGES;
use crate::tree::{Compare, Flags, OrdCompare};
use std::path::Path;

const SET_SPLASH: &str = "pagetree_set";
const MULTISET_SPLASH: &str = "pagetree_multiset";

/// Iterator over set keys, double-ended.
pub struct SetIter<'t, K: Packed, O: ByteOrder> {
    inner: RawIter<'t, K, (), O>,
}

impl<'t, K: Packed, O: ByteOrder> Iterator for SetIter<'t, K, O> {
    type Item = TreeResult<K>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|r| r.map(|(k, ())| k))
    }
}

impl<'t, K: Packed, O: ByteOrder> DoubleEndedIterator for SetIter<'t, K, O> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|r| r.map(|(k, ())| k))
    }
}

/// Persistent ordered set with unique keys.
pub struct BtreeSet<K: Packed, C: Compare<K> = OrdCompare, O: ByteOrder = BigOrder> {
    tree: Tree<K, (), O>,
    comp: C,
}

impl<K: Packed + Ord, O: ByteOrder> BtreeSet<K, OrdCompare, O> {
    /// Opens or creates a set file with the default (`Ord`) comparator.
    pub fn open<P: AsRef<Path>>(
        path: P,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<Self> {
        Self::open_with(path, flags, signature, OrdCompare, page_size)
    }

    /// Opens a set and inserts every key of `range` in order.
    pub fn create_from<P: AsRef<Path>, I: IntoIterator<Item = K>>(
        range: I,
        path: P,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<Self> {
        let mut set = Self::open(path, flags, signature, page_size)?;
        for key in range {
            set.insert(key)?;
        }
        Ok(set)
    }
}

impl<K: Packed, C: Compare<K>, O: ByteOrder> BtreeSet<K, C, O> {
    /// Opens or creates a set file with a caller-supplied comparator.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        flags: Flags,
        signature: u64,
        comp: C,
        page_size: usize,
    ) -> TreeResult<Self> {
        let tree = Tree::open(
            path,
            flags,
            signature,
            page_size,
            DEFAULT_MAX_CACHE_PAGES,
            SET_SPLASH,
            true,
            true,
        )?;
        Ok(BtreeSet { tree, comp })
    }

    /// Inserts `key`. Returns the element's position and whether it was
    /// inserted (`false` when an equal key already exists).
    pub fn insert(&mut self, key: K) -> TreeResult<(Position, bool)> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(&key, stored));
        let (loc, inserted) = self.tree.insert_unique(&probe, &key, &())?;
        Ok((self.tree.mint(loc), inserted))
    }

    /// Erases `key`; returns how many elements were removed (0 or 1).
    pub fn erase(&mut self, key: &K) -> TreeResult<u64> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        self.tree.erase_matching(&probe)
    }

    /// Erases the element at `pos`; returns the successor position.
    pub fn erase_at(&mut self, pos: Position) -> TreeResult<Option<Position>> {
        let loc = self.tree.check(&pos)?;
        let succ = self.tree.erase_loc(loc)?;
        Ok(succ.map(|l| self.tree.mint(l)))
    }

    pub fn find(&self, key: &K) -> TreeResult<Option<Position>> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        Ok(self.tree.find_loc(&probe)?.map(|l| self.tree.mint(l)))
    }

    pub fn contains(&self, key: &K) -> TreeResult<bool> {
        Ok(self.find(key)?.is_some())
    }

    pub fn count(&self, key: &K) -> TreeResult<u64> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        self.tree.count_matching(&probe)
    }

    /// Position of the first key `>=` `key`; `None` when past the end.
    pub fn lower_bound(&self, key: &K) -> TreeResult<Option<Position>> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        Ok(self.tree.lower_loc(&probe)?.map(|l| self.tree.mint(l)))
    }

    /// Position of the first key `>` `key`; `None` when past the end.
    pub fn upper_bound(&self, key: &K) -> TreeResult<Option<Position>> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        Ok(self.tree.upper_loc(&probe)?.map(|l| self.tree.mint(l)))
    }

    /// Iterator over every element equal to `key`, in insertion order.
    pub fn equal_range(&self, key: &K) -> TreeResult<SetIter<'_, K, O>> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        let lower = self.tree.lower_loc(&probe)?;
        let upper = self.tree.upper_loc(&probe)?;
        Ok(SetIter {
            inner: RawIter::between(&self.tree, lower, upper)?,
        })
    }

    /// The key stored at `pos`.
    pub fn key_at(&self, pos: &Position) -> TreeResult<K> {
        let loc = self.tree.check(pos)?;
        self.tree.key_at_loc(loc)
    }

    pub fn successor(&self, pos: &Position) -> TreeResult<Option<Position>> {
        let loc = self.tree.check(pos)?;
        Ok(self.tree.succ_loc(loc)?.map(|l| self.tree.mint(l)))
    }

    pub fn predecessor(&self, pos: &Position) -> TreeResult<Option<Position>> {
        let loc = self.tree.check(pos)?;
        Ok(self.tree.pred_loc(loc)?.map(|l| self.tree.mint(l)))
    }

    pub fn first(&self) -> TreeResult<Option<K>> {
        match self.tree.first_loc()? {
            Some(loc) => Ok(Some(self.tree.key_at_loc(loc)?)),
            None => Ok(None),
        }
    }

    pub fn last(&self) -> TreeResult<Option<K>> {
        match self.tree.last_loc()? {
            Some(loc) => Ok(Some(self.tree.key_at_loc(loc)?)),
            None => Ok(None),
        }
    }

    pub fn iter(&self) -> TreeResult<SetIter<'_, K, O>> {
        Ok(SetIter {
            inner: RawIter::all(&self.tree)?,
        })
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&mut self) -> TreeResult<()> {
        self.tree.clear()
    }

    /// Walks the whole file checking structural invariants: node fill,
    /// key ordering, separator bounds, the leaf chain and the element
    /// count. O(n); meant for tests and offline tooling.
    pub fn verify(&self) -> TreeResult<()> {
        let comp = &self.comp;
        self.tree.validate(&|a: &K, b: &K| comp.compare(a, b))
    }

    pub fn flush(&self) -> TreeResult<bool> {
        self.tree.flush()
    }

    pub fn close(self) -> TreeResult<()> {
        self.tree.close()
    }

    pub fn path(&self) -> &Path {
        self.tree.path()
    }

    pub fn page_size(&self) -> usize {
        self.tree.page_size()
    }

    pub fn page_count(&self) -> u32 {
        self.tree.page_count()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.tree.cache_stats()
    }
}

/// Persistent ordered multiset: equal keys permitted, insertion order kept
/// among equals.
pub struct BtreeMultiset<K: Packed, C: Compare<K> = OrdCompare, O: ByteOrder = BigOrder> {
    tree: Tree<K, (), O>,
    comp: C,
}

impl<K: Packed + Ord, O: ByteOrder> BtreeMultiset<K, OrdCompare, O> {
    pub fn open<P: AsRef<Path>>(
        path: P,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<Self> {
        Self::open_with(path, flags, signature, OrdCompare, page_size)
    }

    pub fn create_from<P: AsRef<Path>, I: IntoIterator<Item = K>>(
        range: I,
        path: P,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<Self> {
        let mut set = Self::open(path, flags, signature, page_size)?;
        for key in range {
            set.insert(key)?;
        }
        Ok(set)
    }
}

impl<K: Packed, C: Compare<K>, O: ByteOrder> BtreeMultiset<K, C, O> {
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        flags: Flags,
        signature: u64,
        comp: C,
        page_size: usize,
    ) -> TreeResult<Self> {
        let tree = Tree::open(
            path,
            flags,
            signature,
            page_size,
            DEFAULT_MAX_CACHE_PAGES,
            MULTISET_SPLASH,
            false,
            true,
        )?;
        Ok(BtreeMultiset { tree, comp })
    }

    /// Inserts `key` unconditionally, after any existing equals.
    pub fn insert(&mut self, key: K) -> TreeResult<Position> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(&key, stored));
        let loc = self.tree.insert_multi(&probe, &key, &())?;
        Ok(self.tree.mint(loc))
    }

    /// Erases every element equal to `key`; returns how many.
    pub fn erase(&mut self, key: &K) -> TreeResult<u64> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        self.tree.erase_matching(&probe)
    }

    pub fn erase_at(&mut self, pos: Position) -> TreeResult<Option<Position>> {
        let loc = self.tree.check(&pos)?;
        let succ = self.tree.erase_loc(loc)?;
        Ok(succ.map(|l| self.tree.mint(l)))
    }

    pub fn find(&self, key: &K) -> TreeResult<Option<Position>> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        Ok(self.tree.find_loc(&probe)?.map(|l| self.tree.mint(l)))
    }

    pub fn count(&self, key: &K) -> TreeResult<u64> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        self.tree.count_matching(&probe)
    }

    pub fn lower_bound(&self, key: &K) -> TreeResult<Option<Position>> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        Ok(self.tree.lower_loc(&probe)?.map(|l| self.tree.mint(l)))
    }

    pub fn upper_bound(&self, key: &K) -> TreeResult<Option<Position>> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        Ok(self.tree.upper_loc(&probe)?.map(|l| self.tree.mint(l)))
    }

    pub fn equal_range(&self, key: &K) -> TreeResult<SetIter<'_, K, O>> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        let lower = self.tree.lower_loc(&probe)?;
        let upper = self.tree.upper_loc(&probe)?;
        Ok(SetIter {
            inner: RawIter::between(&self.tree, lower, upper)?,
        })
    }

    pub fn key_at(&self, pos: &Position) -> TreeResult<K> {
        let loc = self.tree.check(pos)?;
        self.tree.key_at_loc(loc)
    }

    pub fn successor(&self, pos: &Position) -> TreeResult<Option<Position>> {
        let loc = self.tree.check(pos)?;
        Ok(self.tree.succ_loc(loc)?.map(|l| self.tree.mint(l)))
    }

    pub fn predecessor(&self, pos: &Position) -> TreeResult<Option<Position>> {
        let loc = self.tree.check(pos)?;
        Ok(self.tree.pred_loc(loc)?.map(|l| self.tree.mint(l)))
    }

    pub fn first(&self) -> TreeResult<Option<K>> {
        match self.tree.first_loc()? {
            Some(loc) => Ok(Some(self.tree.key_at_loc(loc)?)),
            None => Ok(None),
        }
    }

    pub fn last(&self) -> TreeResult<Option<K>> {
        match self.tree.last_loc()? {
            Some(loc) => Ok(Some(self.tree.key_at_loc(loc)?)),
            None => Ok(None),
        }
    }

    pub fn iter(&self) -> TreeResult<SetIter<'_, K, O>> {
        Ok(SetIter {
            inner: RawIter::all(&self.tree)?,
        })
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&mut self) -> TreeResult<()> {
        self.tree.clear()
    }

    /// Walks the whole file checking structural invariants: node fill,
    /// key ordering, separator bounds, the leaf chain and the element
    /// count. O(n); meant for tests and offline tooling.
    pub fn verify(&self) -> TreeResult<()> {
        let comp = &self.comp;
        self.tree.validate(&|a: &K, b: &K| comp.compare(a, b))
    }

    pub fn flush(&self) -> TreeResult<bool> {
        self.tree.flush()
    }

    pub fn close(self) -> TreeResult<()> {
        self.tree.close()
    }

    pub fn path(&self) -> &Path {
        self.tree.path()
    }

    pub fn page_count(&self) -> u32 {
        self.tree.page_count()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.tree.cache_stats()
    }
}
