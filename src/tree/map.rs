// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Key/value containers: `BtreeMap` (unique keys) and `BtreeMultimap`.
//!
//! A leaf element is the key image followed by the mapped image. Inserting
//! an existing key into a `BtreeMap` leaves the stored mapped value
//! unchanged and reports `false`, the way the key-only variants report a
//! duplicate.

use crate::buffer::manager::CacheStats;
use crate::codec::order::{BigOrder, ByteOrder};
use crate::codec::packed::Packed;
use crate::error::TreeResult;
use crate::tree::cursor::{Position, RawIter};
use crate::tree::engine::Tree;
use crate::tree::header::DEFAULT_MAX_CACHE_PAGES;
use crate::tree::{Compare, Flags, OrdCompare};
use std::path::Path;

const MAP_SPLASH: &str = "pagetree_map";
const MULTIMAP_SPLASH: &str = "pagetree_multimap";

/// Iterator over `(key, mapped)` pairs, double-ended.
pub struct MapIter<'t, K: Packed, V: Packed, O: ByteOrder> {
    inner: RawIter<'t, K, V, O>,
}

impl<'t, K: Packed, V: Packed, O: ByteOrder> Iterator for MapIter<'t, K, V, O> {
    type Item = TreeResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<'t, K: Packed, V: Packed, O: ByteOrder> DoubleEndedIterator for MapIter<'t, K, V, O> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

/// Persistent ordered map with unique keys.
pub struct BtreeMap<K: Packed, V: Packed, C: Compare<K> = OrdCompare, O: ByteOrder = BigOrder> {
    tree: Tree<K, V, O>,
    comp: C,
}

impl<K: Packed + Ord, V: Packed, O: ByteOrder> BtreeMap<K, V, OrdCompare, O> {
    /// Opens or creates a map file with the default (`Ord`) comparator.
    pub fn open<P: AsRef<Path>>(
        path: P,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<Self> {
        Self::open_with(path, flags, signature, OrdCompare, page_size)
    }

    /// Opens a map and inserts every pair of `range` in order.
    pub fn create_from<P: AsRef<Path>, I: IntoIterator<Item = (K, V)>>(
        range: I,
        path: P,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<Self> {
        let mut map = Self::open(path, flags, signature, page_size)?;
        for (key, value) in range {
            map.insert(key, value)?;
        }
        Ok(map)
    }
}

impl<K: Packed, V: Packed, C: Compare<K>, O: ByteOrder> BtreeMap<K, V, C, O> {
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
            MAP_SPLASH,
            true,
            false,
        )?;
        Ok(BtreeMap { tree, comp })
    }

    /// Inserts `(key, value)`. When an equal key exists, the stored pair is
    /// untouched and `false` is returned with its position.
    ///
    /// ## Input
    /// - `key`, `value`: fixed-width images copied into the leaf
    ///
    /// ## Output
    /// - `Ok((position, true))`: inserted
    /// - `Ok((position, false))`: an equal key already exists there
    /// - `Err(TreeError)`: `ReadOnly`, or an I/O failure mid-split
    ///
    /// ## Performance
    /// - O(log n) descent; splits touch at most one node per level
    pub fn insert(&mut self, key: K, value: V) -> TreeResult<(Position, bool)> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(&key, stored));
        let (loc, inserted) = self.tree.insert_unique(&probe, &key, &value)?;
        Ok((self.tree.mint(loc), inserted))
    }

    /// Erases `key`; returns how many elements were removed (0 or 1).
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

    /// The mapped value for `key`, when present.
    pub fn get(&self, key: &K) -> TreeResult<Option<V>> {
        match self.find(key)? {
            Some(pos) => Ok(Some(self.value_at(&pos)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &K) -> TreeResult<bool> {
        Ok(self.find(key)?.is_some())
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

    pub fn equal_range(&self, key: &K) -> TreeResult<MapIter<'_, K, V, O>> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        let lower = self.tree.lower_loc(&probe)?;
        let upper = self.tree.upper_loc(&probe)?;
        Ok(MapIter {
            inner: RawIter::between(&self.tree, lower, upper)?,
        })
    }

    pub fn key_at(&self, pos: &Position) -> TreeResult<K> {
        let loc = self.tree.check(pos)?;
        self.tree.key_at_loc(loc)
    }

    pub fn value_at(&self, pos: &Position) -> TreeResult<V> {
        let loc = self.tree.check(pos)?;
        Ok(self.tree.pair_at_loc(loc)?.1)
    }

    pub fn entry_at(&self, pos: &Position) -> TreeResult<(K, V)> {
        let loc = self.tree.check(pos)?;
        self.tree.pair_at_loc(loc)
    }

    pub fn successor(&self, pos: &Position) -> TreeResult<Option<Position>> {
        let loc = self.tree.check(pos)?;
        Ok(self.tree.succ_loc(loc)?.map(|l| self.tree.mint(l)))
    }

    pub fn predecessor(&self, pos: &Position) -> TreeResult<Option<Position>> {
        let loc = self.tree.check(pos)?;
        Ok(self.tree.pred_loc(loc)?.map(|l| self.tree.mint(l)))
    }

    pub fn first(&self) -> TreeResult<Option<(K, V)>> {
        match self.tree.first_loc()? {
            Some(loc) => Ok(Some(self.tree.pair_at_loc(loc)?)),
            None => Ok(None),
        }
    }

    pub fn last(&self) -> TreeResult<Option<(K, V)>> {
        match self.tree.last_loc()? {
            Some(loc) => Ok(Some(self.tree.pair_at_loc(loc)?)),
            None => Ok(None),
        }
    }

    pub fn iter(&self) -> TreeResult<MapIter<'_, K, V, O>> {
        Ok(MapIter {
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

/// Persistent ordered multimap: equal keys permitted, insertion order kept
/// among equals.
pub struct BtreeMultimap<K: Packed, V: Packed, C: Compare<K> = OrdCompare, O: ByteOrder = BigOrder>
{
    tree: Tree<K, V, O>,
    comp: C,
}

impl<K: Packed + Ord, V: Packed, O: ByteOrder> BtreeMultimap<K, V, OrdCompare, O> {
    pub fn open<P: AsRef<Path>>(
        path: P,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<Self> {
        Self::open_with(path, flags, signature, OrdCompare, page_size)
    }

    pub fn create_from<P: AsRef<Path>, I: IntoIterator<Item = (K, V)>>(
        range: I,
        path: P,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<Self> {
        let mut map = Self::open(path, flags, signature, page_size)?;
        for (key, value) in range {
            map.insert(key, value)?;
        }
        Ok(map)
    }
}

impl<K: Packed, V: Packed, C: Compare<K>, O: ByteOrder> BtreeMultimap<K, V, C, O> {
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
            MULTIMAP_SPLASH,
            false,
            false,
        )?;
        Ok(BtreeMultimap { tree, comp })
    }

    /// Inserts `(key, value)` unconditionally, after any existing equals.
    pub fn insert(&mut self, key: K, value: V) -> TreeResult<Position> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(&key, stored));
        let loc = self.tree.insert_multi(&probe, &key, &value)?;
        Ok(self.tree.mint(loc))
    }

    /// Erases every element with `key`; returns how many.
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

    pub fn equal_range(&self, key: &K) -> TreeResult<MapIter<'_, K, V, O>> {
        let comp = &self.comp;
        let probe = |stored: &K| Ok(comp.compare(key, stored));
        let lower = self.tree.lower_loc(&probe)?;
        let upper = self.tree.upper_loc(&probe)?;
        Ok(MapIter {
            inner: RawIter::between(&self.tree, lower, upper)?,
        })
    }

    pub fn key_at(&self, pos: &Position) -> TreeResult<K> {
        let loc = self.tree.check(pos)?;
        self.tree.key_at_loc(loc)
    }

    pub fn value_at(&self, pos: &Position) -> TreeResult<V> {
        let loc = self.tree.check(pos)?;
        Ok(self.tree.pair_at_loc(loc)?.1)
    }

    pub fn entry_at(&self, pos: &Position) -> TreeResult<(K, V)> {
        let loc = self.tree.check(pos)?;
        self.tree.pair_at_loc(loc)
    }

    pub fn successor(&self, pos: &Position) -> TreeResult<Option<Position>> {
        let loc = self.tree.check(pos)?;
        Ok(self.tree.succ_loc(loc)?.map(|l| self.tree.mint(l)))
    }

    pub fn predecessor(&self, pos: &Position) -> TreeResult<Option<Position>> {
        let loc = self.tree.check(pos)?;
        Ok(self.tree.pred_loc(loc)?.map(|l| self.tree.mint(l)))
    }

    pub fn first(&self) -> TreeResult<Option<(K, V)>> {
        match self.tree.first_loc()? {
            Some(loc) => Ok(Some(self.tree.pair_at_loc(loc)?)),
            None => Ok(None),
        }
    }

    pub fn last(&self) -> TreeResult<Option<(K, V)>> {
        match self.tree.last_loc()? {
            Some(loc) => Ok(Some(self.tree.pair_at_loc(loc)?)),
            None => Ok(None),
        }
    }

    pub fn iter(&self) -> TreeResult<MapIter<'_, K, V, O>> {
        Ok(MapIter {
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
