// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Key/value index containers: `IndexMap` (unique keys) and
//! `IndexMultimap`.
//!
//! A flat entry is the key's encoding followed by the value's; ordering
//! and uniqueness consider only the key part.

use crate::buffer::manager::CacheStats;
use crate::codec::order::{BigOrder, ByteOrder};
use crate::error::{TreeError, TreeResult};
use crate::file::mapped::MappedFlatFile;
use crate::index::keys::FlatKey;
use crate::index::set::open_flat_file;
use crate::index::{read_entry_at, read_key_at, FilePos};
use crate::tree::cursor::{Position, RawIter};
use crate::tree::engine::Tree;
use crate::tree::header::DEFAULT_MAX_CACHE_PAGES;
use crate::tree::{Compare, Flags, OrdCompare};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::Path;
use std::rc::Rc;

const INDEX_MAP_SPLASH: &str = "pagetree_index_map";
const INDEX_MULTIMAP_SPLASH: &str = "pagetree_index_multimap";

/// Iterator over decoded `(key, value)` entries, double-ended.
pub struct IndexMapIter<'t, K: FlatKey, V: FlatKey, O: ByteOrder> {
    inner: RawIter<'t, FilePos, (), O>,
    file: &'t RefCell<MappedFlatFile>,
    _types: PhantomData<(K, V)>,
}

impl<'t, K: FlatKey, V: FlatKey, O: ByteOrder> Iterator for IndexMapIter<'t, K, V, O> {
    type Item = TreeResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|r| r.and_then(|(pos, ())| read_entry_at::<K, V>(self.file, pos)))
    }
}

impl<'t, K: FlatKey, V: FlatKey, O: ByteOrder> DoubleEndedIterator for IndexMapIter<'t, K, V, O> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner
            .next_back()
            .map(|r| r.and_then(|(pos, ())| read_entry_at::<K, V>(self.file, pos)))
    }
}

/// Persistent ordered map with variable-length keys and values, unique
/// keys.
pub struct IndexMap<K: FlatKey, V: FlatKey, C: Compare<K> = OrdCompare, O: ByteOrder = BigOrder> {
    tree: Tree<FilePos, (), O>,
    file: Rc<RefCell<MappedFlatFile>>,
    comp: C,
    max_flat: usize,
    _types: PhantomData<(K, V)>,
}

impl<K: FlatKey + Ord, V: FlatKey, O: ByteOrder> IndexMap<K, V, OrdCompare, O> {
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        file_path: P,
        reserve: u64,
        index_path: Q,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<Self> {
        Self::open_with(
            file_path, reserve, index_path, flags, signature, OrdCompare, page_size,
        )
    }
}

impl<K: FlatKey, V: FlatKey, C: Compare<K>, O: ByteOrder> IndexMap<K, V, C, O> {
    pub fn open_with<P: AsRef<Path>, Q: AsRef<Path>>(
        file_path: P,
        reserve: u64,
        index_path: Q,
        flags: Flags,
        signature: u64,
        comp: C,
        page_size: usize,
    ) -> TreeResult<Self> {
        let file = open_flat_file(file_path.as_ref(), flags, reserve)?;
        Self::open_shared(file, index_path, flags, signature, comp, page_size)
    }

    pub fn open_shared<Q: AsRef<Path>>(
        file: Rc<RefCell<MappedFlatFile>>,
        index_path: Q,
        flags: Flags,
        signature: u64,
        comp: C,
        page_size: usize,
    ) -> TreeResult<Self> {
        let tree = Tree::open(
            index_path,
            flags,
            signature,
            page_size,
            DEFAULT_MAX_CACHE_PAGES,
            INDEX_MAP_SPLASH,
            true,
            true,
        )?;
        let max_flat = tree.page_size() / 3;
        Ok(IndexMap {
            tree,
            file,
            comp,
            max_flat,
            _types: PhantomData,
        })
    }

    pub fn file(&self) -> Rc<RefCell<MappedFlatFile>> {
        Rc::clone(&self.file)
    }

    /// Appends the flat entry (key then value) and returns its offset; the
    /// index itself is unaffected.
    pub fn push_back(&mut self, key: &K, value: &V) -> TreeResult<FilePos> {
        let ksize = key.flat_size();
        let vsize = value.flat_size();
        if ksize + vsize >= self.max_flat {
            return Err(TreeError::TypeMismatch {
                reason: format!(
                    "flat entry of {} bytes too large for the index (limit {})",
                    ksize + vsize,
                    self.max_flat
                ),
            });
        }
        let mut buf = vec![0u8; ksize + vsize];
        key.write_flat(&mut buf[..ksize]);
        value.write_flat(&mut buf[ksize..]);
        let offset = self.file.borrow_mut().push(&buf)?;
        Ok(FilePos(offset))
    }

    /// Indexes an entry already present in the data file, comparing by its
    /// key part.
    pub fn insert_file_position(&mut self, pos: FilePos) -> TreeResult<(Position, bool)> {
        let key = read_key_at::<K>(&self.file, pos)?;
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(&key, &stored_key))
        };
        let (loc, inserted) = self.tree.insert_unique(&probe, &pos, &())?;
        Ok((self.tree.mint(loc), inserted))
    }

    /// Find-else-append on the key; an existing key keeps its stored
    /// value.
    pub fn insert(&mut self, key: &K, value: &V) -> TreeResult<(Position, bool)> {
        if let Some(pos) = self.find(key)? {
            return Ok((pos, false));
        }
        let fp = self.push_back(key, value)?;
        self.insert_file_position(fp)
    }

    pub fn erase(&mut self, key: &K) -> TreeResult<u64> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        self.tree.erase_matching(&probe)
    }

    pub fn find(&self, key: &K) -> TreeResult<Option<Position>> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        Ok(self.tree.find_loc(&probe)?.map(|l| self.tree.mint(l)))
    }

    pub fn get(&self, key: &K) -> TreeResult<Option<V>> {
        match self.find(key)? {
            Some(pos) => Ok(Some(self.value_at(&pos)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self, key: &K) -> TreeResult<u64> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        self.tree.count_matching(&probe)
    }

    pub fn equal_range(&self, key: &K) -> TreeResult<IndexMapIter<'_, K, V, O>> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        let lower = self.tree.lower_loc(&probe)?;
        let upper = self.tree.upper_loc(&probe)?;
        Ok(IndexMapIter {
            inner: RawIter::between(&self.tree, lower, upper)?,
            file: &self.file,
            _types: PhantomData,
        })
    }

    pub fn key_at(&self, pos: &Position) -> TreeResult<K> {
        let loc = self.tree.check(pos)?;
        let fp = self.tree.key_at_loc(loc)?;
        read_key_at::<K>(&self.file, fp)
    }

    pub fn value_at(&self, pos: &Position) -> TreeResult<V> {
        let loc = self.tree.check(pos)?;
        let fp = self.tree.key_at_loc(loc)?;
        Ok(read_entry_at::<K, V>(&self.file, fp)?.1)
    }

    pub fn entry_at(&self, pos: &Position) -> TreeResult<(K, V)> {
        let loc = self.tree.check(pos)?;
        let fp = self.tree.key_at_loc(loc)?;
        read_entry_at::<K, V>(&self.file, fp)
    }

    pub fn iter(&self) -> TreeResult<IndexMapIter<'_, K, V, O>> {
        Ok(IndexMapIter {
            inner: RawIter::all(&self.tree)?,
            file: &self.file,
            _types: PhantomData,
        })
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn flush(&self) -> TreeResult<bool> {
        self.tree.flush()
    }

    pub fn close(self) -> TreeResult<()> {
        self.tree.close()?;
        if Rc::strong_count(&self.file) == 1 {
            self.file.borrow_mut().close()?;
        }
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.tree.cache_stats()
    }
}

/// Persistent ordered multimap with variable-length keys and values.
pub struct IndexMultimap<
    K: FlatKey,
    V: FlatKey,
    C: Compare<K> = OrdCompare,
    O: ByteOrder = BigOrder,
> {
    tree: Tree<FilePos, (), O>,
    file: Rc<RefCell<MappedFlatFile>>,
    comp: C,
    max_flat: usize,
    _types: PhantomData<(K, V)>,
}

impl<K: FlatKey + Ord, V: FlatKey, O: ByteOrder> IndexMultimap<K, V, OrdCompare, O> {
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        file_path: P,
        reserve: u64,
        index_path: Q,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<Self> {
        Self::open_with(
            file_path, reserve, index_path, flags, signature, OrdCompare, page_size,
        )
    }
}

impl<K: FlatKey, V: FlatKey, C: Compare<K>, O: ByteOrder> IndexMultimap<K, V, C, O> {
    pub fn open_with<P: AsRef<Path>, Q: AsRef<Path>>(
        file_path: P,
        reserve: u64,
        index_path: Q,
        flags: Flags,
        signature: u64,
        comp: C,
        page_size: usize,
    ) -> TreeResult<Self> {
        let file = open_flat_file(file_path.as_ref(), flags, reserve)?;
        Self::open_shared(file, index_path, flags, signature, comp, page_size)
    }

    pub fn open_shared<Q: AsRef<Path>>(
        file: Rc<RefCell<MappedFlatFile>>,
        index_path: Q,
        flags: Flags,
        signature: u64,
        comp: C,
        page_size: usize,
    ) -> TreeResult<Self> {
        let tree = Tree::open(
            index_path,
            flags,
            signature,
            page_size,
            DEFAULT_MAX_CACHE_PAGES,
            INDEX_MULTIMAP_SPLASH,
            false,
            true,
        )?;
        let max_flat = tree.page_size() / 3;
        Ok(IndexMultimap {
            tree,
            file,
            comp,
            max_flat,
            _types: PhantomData,
        })
    }

    pub fn file(&self) -> Rc<RefCell<MappedFlatFile>> {
        Rc::clone(&self.file)
    }

    pub fn push_back(&mut self, key: &K, value: &V) -> TreeResult<FilePos> {
        let ksize = key.flat_size();
        let vsize = value.flat_size();
        if ksize + vsize >= self.max_flat {
            return Err(TreeError::TypeMismatch {
                reason: format!(
                    "flat entry of {} bytes too large for the index (limit {})",
                    ksize + vsize,
                    self.max_flat
                ),
            });
        }
        let mut buf = vec![0u8; ksize + vsize];
        key.write_flat(&mut buf[..ksize]);
        value.write_flat(&mut buf[ksize..]);
        let offset = self.file.borrow_mut().push(&buf)?;
        Ok(FilePos(offset))
    }

    pub fn insert_file_position(&mut self, pos: FilePos) -> TreeResult<Position> {
        let key = read_key_at::<K>(&self.file, pos)?;
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(&key, &stored_key))
        };
        let loc = self.tree.insert_multi(&probe, &pos, &())?;
        Ok(self.tree.mint(loc))
    }

    /// Appends unconditionally; equal keys keep insertion order.
    pub fn insert(&mut self, key: &K, value: &V) -> TreeResult<Position> {
        let fp = self.push_back(key, value)?;
        self.insert_file_position(fp)
    }

    pub fn erase(&mut self, key: &K) -> TreeResult<u64> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        self.tree.erase_matching(&probe)
    }

    pub fn find(&self, key: &K) -> TreeResult<Option<Position>> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        Ok(self.tree.find_loc(&probe)?.map(|l| self.tree.mint(l)))
    }

    pub fn count(&self, key: &K) -> TreeResult<u64> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        self.tree.count_matching(&probe)
    }

    pub fn equal_range(&self, key: &K) -> TreeResult<IndexMapIter<'_, K, V, O>> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        let lower = self.tree.lower_loc(&probe)?;
        let upper = self.tree.upper_loc(&probe)?;
        Ok(IndexMapIter {
            inner: RawIter::between(&self.tree, lower, upper)?,
            file: &self.file,
            _types: PhantomData,
        })
    }

    pub fn entry_at(&self, pos: &Position) -> TreeResult<(K, V)> {
        let loc = self.tree.check(pos)?;
        let fp = self.tree.key_at_loc(loc)?;
        read_entry_at::<K, V>(&self.file, fp)
    }

    pub fn iter(&self) -> TreeResult<IndexMapIter<'_, K, V, O>> {
        Ok(IndexMapIter {
            inner: RawIter::all(&self.tree)?,
            file: &self.file,
            _types: PhantomData,
        })
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn flush(&self) -> TreeResult<bool> {
        self.tree.flush()
    }

    pub fn close(self) -> TreeResult<()> {
        self.tree.close()?;
        if Rc::strong_count(&self.file) == 1 {
            self.file.borrow_mut().close()?;
        }
        Ok(())
    }
}
