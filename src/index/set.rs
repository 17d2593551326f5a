// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Key-only index containers: `IndexSet` (unique) and `IndexMultiset`.
//!
//! The tree holds 48-bit offsets; key bytes live in the shared flat data
//! file. `insert` on the unique set is find-else-append: key bytes are
//! pushed to the data file only when no equal key is already indexed, and
//! equal bytes reached through different offsets are never deduplicated.

use crate::buffer::manager::CacheStats;
use crate::codec::order::{BigOrder, ByteOrder};
use crate::error::{TreeError, TreeResult};
use crate::file::mapped::MappedFlatFile;
use crate::index::keys::FlatKey;
use crate::index::{read_key_at, FilePos};
use crate::tree::cursor::{Position, RawIter};
use crate::tree::engine::Tree;
use crate::tree::header::DEFAULT_MAX_CACHE_PAGES;
use crate::tree::{Compare, Flags, OrdCompare};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::Path;
use std::rc::Rc;

const INDEX_SET_SPLASH: &str = "pagetree_index_set";
const INDEX_MULTISET_SPLASH: &str = "pagetree_index_multiset";

/// Iterator over decoded index keys, double-ended.
pub struct IndexSetIter<'t, K: FlatKey, O: ByteOrder> {
    inner: RawIter<'t, FilePos, (), O>,
    file: &'t RefCell<MappedFlatFile>,
    _key: PhantomData<K>,
}

impl<'t, K: FlatKey, O: ByteOrder> Iterator for IndexSetIter<'t, K, O> {
    type Item = TreeResult<K>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|r| r.and_then(|(pos, ())| read_key_at::<K>(self.file, pos)))
    }
}

impl<'t, K: FlatKey, O: ByteOrder> DoubleEndedIterator for IndexSetIter<'t, K, O> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner
            .next_back()
            .map(|r| r.and_then(|(pos, ())| read_key_at::<K>(self.file, pos)))
    }
}

/// Persistent ordered set of variable-length keys, unique.
pub struct IndexSet<K: FlatKey, C: Compare<K> = OrdCompare, O: ByteOrder = BigOrder> {
    tree: Tree<FilePos, (), O>,
    file: Rc<RefCell<MappedFlatFile>>,
    comp: C,
    max_flat: usize,
    _key: PhantomData<K>,
}

impl<K: FlatKey + Ord, O: ByteOrder> IndexSet<K, OrdCompare, O> {
    /// Opens or creates the data file at `file_path` (over-allocated by
    /// `reserve` bytes) and the index tree at `index_path`.
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

impl<K: FlatKey, C: Compare<K>, O: ByteOrder> IndexSet<K, C, O> {
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

    /// Joins an already-open data file: additional indexes over one flat
    /// file share it this way. The file closes with its last sharer.
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
            INDEX_SET_SPLASH,
            true,
            true,
        )?;
        let max_flat = tree.page_size() / 3;
        Ok(IndexSet {
            tree,
            file,
            comp,
            max_flat,
            _key: PhantomData,
        })
    }

    /// The shared data file, for joining further indexes.
    pub fn file(&self) -> Rc<RefCell<MappedFlatFile>> {
        Rc::clone(&self.file)
    }

    pub fn file_size(&self) -> u64 {
        self.file.borrow().len()
    }

    /// Appends the flat encoding of `key` to the data file and returns its
    /// offset. The index itself is unaffected.
    pub fn push_back(&mut self, key: &K) -> TreeResult<FilePos> {
        push_flat(&self.file, key, self.max_flat)
    }

    /// Indexes an element already present in the data file.
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

    /// Find-else-append: pushes key bytes only when no equal key is
    /// already indexed.
    ///
    /// ## Input
    /// - `key`: variable-length key, flat-encoded on append
    ///
    /// ## Output
    /// - `Ok((position, true))`: appended and indexed
    /// - `Ok((position, false))`: equal key already indexed, nothing
    ///   appended
    /// - `Err(TreeError)`: `ReadOnly`, oversized element, or I/O failure
    pub fn insert(&mut self, key: &K) -> TreeResult<(Position, bool)> {
        if let Some(pos) = self.find(key)? {
            return Ok((pos, false));
        }
        let fp = self.push_back(key)?;
        self.insert_file_position(fp)
    }

    /// Erases `key` from the index; the key bytes stay in the data file.
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

    pub fn contains(&self, key: &K) -> TreeResult<bool> {
        Ok(self.find(key)?.is_some())
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

    pub fn lower_bound(&self, key: &K) -> TreeResult<Option<Position>> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        Ok(self.tree.lower_loc(&probe)?.map(|l| self.tree.mint(l)))
    }

    pub fn upper_bound(&self, key: &K) -> TreeResult<Option<Position>> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        Ok(self.tree.upper_loc(&probe)?.map(|l| self.tree.mint(l)))
    }

    pub fn equal_range(&self, key: &K) -> TreeResult<IndexSetIter<'_, K, O>> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        let lower = self.tree.lower_loc(&probe)?;
        let upper = self.tree.upper_loc(&probe)?;
        Ok(IndexSetIter {
            inner: RawIter::between(&self.tree, lower, upper)?,
            file: &self.file,
            _key: PhantomData,
        })
    }

    /// The key at `pos`, decoded through the mapping.
    pub fn key_at(&self, pos: &Position) -> TreeResult<K> {
        let fp = self.file_pos_at(pos)?;
        read_key_at::<K>(&self.file, fp)
    }

    /// The raw data-file offset stored at `pos`.
    pub fn file_pos_at(&self, pos: &Position) -> TreeResult<FilePos> {
        let loc = self.tree.check(pos)?;
        self.tree.key_at_loc(loc)
    }

    pub fn first(&self) -> TreeResult<Option<K>> {
        match self.tree.first_loc()? {
            Some(loc) => {
                let fp = self.tree.key_at_loc(loc)?;
                Ok(Some(read_key_at::<K>(&self.file, fp)?))
            }
            None => Ok(None),
        }
    }

    pub fn last(&self) -> TreeResult<Option<K>> {
        match self.tree.last_loc()? {
            Some(loc) => {
                let fp = self.tree.key_at_loc(loc)?;
                Ok(Some(read_key_at::<K>(&self.file, fp)?))
            }
            None => Ok(None),
        }
    }

    pub fn iter(&self) -> TreeResult<IndexSetIter<'_, K, O>> {
        Ok(IndexSetIter {
            inner: RawIter::all(&self.tree)?,
            file: &self.file,
            _key: PhantomData,
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

    /// Closes the index tree and, when this is the last sharer, the data
    /// file.
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

/// Persistent ordered multiset of variable-length keys.
pub struct IndexMultiset<K: FlatKey, C: Compare<K> = OrdCompare, O: ByteOrder = BigOrder> {
    tree: Tree<FilePos, (), O>,
    file: Rc<RefCell<MappedFlatFile>>,
    comp: C,
    max_flat: usize,
    _key: PhantomData<K>,
}

impl<K: FlatKey + Ord, O: ByteOrder> IndexMultiset<K, OrdCompare, O> {
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

impl<K: FlatKey, C: Compare<K>, O: ByteOrder> IndexMultiset<K, C, O> {
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
            INDEX_MULTISET_SPLASH,
            false,
            true,
        )?;
        let max_flat = tree.page_size() / 3;
        Ok(IndexMultiset {
            tree,
            file,
            comp,
            max_flat,
            _key: PhantomData,
        })
    }

    pub fn file(&self) -> Rc<RefCell<MappedFlatFile>> {
        Rc::clone(&self.file)
    }

    pub fn push_back(&mut self, key: &K) -> TreeResult<FilePos> {
        push_flat(&self.file, key, self.max_flat)
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

    /// Appends unconditionally and indexes the new offset; equal keys keep
    /// insertion order.
    pub fn insert(&mut self, key: &K) -> TreeResult<Position> {
        let fp = self.push_back(key)?;
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

    pub fn equal_range(&self, key: &K) -> TreeResult<IndexSetIter<'_, K, O>> {
        let comp = &self.comp;
        let file = &self.file;
        let probe = |stored: &FilePos| {
            let stored_key = read_key_at::<K>(file, *stored)?;
            Ok(comp.compare(key, &stored_key))
        };
        let lower = self.tree.lower_loc(&probe)?;
        let upper = self.tree.upper_loc(&probe)?;
        Ok(IndexSetIter {
            inner: RawIter::between(&self.tree, lower, upper)?,
            file: &self.file,
            _key: PhantomData,
        })
    }

    pub fn key_at(&self, pos: &Position) -> TreeResult<K> {
        let loc = self.tree.check(pos)?;
        let fp = self.tree.key_at_loc(loc)?;
        read_key_at::<K>(&self.file, fp)
    }

    pub fn iter(&self) -> TreeResult<IndexSetIter<'_, K, O>> {
        Ok(IndexSetIter {
            inner: RawIter::all(&self.tree)?,
            file: &self.file,
            _key: PhantomData,
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

/// Opens the flat data file per the tree flags: writable unless the open
/// is read-only, recreated from scratch on truncate.
pub(crate) fn open_flat_file(
    path: &Path,
    flags: Flags,
    reserve: u64,
) -> TreeResult<Rc<RefCell<MappedFlatFile>>> {
    let read_only = !(flags.contains(Flags::READ_WRITE) || flags.contains(Flags::TRUNCATE));
    if flags.contains(Flags::TRUNCATE) && path.exists() {
        std::fs::remove_file(path).map_err(|e| TreeError::io(path, e))?;
    }
    Ok(Rc::new(RefCell::new(MappedFlatFile::open(
        path, !read_only, reserve,
    )?)))
}

/// Encodes `key` and appends it; rejects elements too large relative to
/// the index tree's page size.
pub(crate) fn push_flat<K: FlatKey>(
    file: &Rc<RefCell<MappedFlatFile>>,
    key: &K,
    max_flat: usize,
) -> TreeResult<FilePos> {
    let size = key.flat_size();
    if size >= max_flat {
        return Err(TreeError::TypeMismatch {
            reason: format!(
                "flat element of {} bytes too large for the index (limit {})",
                size, max_flat
            ),
        });
    }
    let mut buf = vec![0u8; size];
    key.write_flat(&mut buf);
    let offset = file.borrow_mut().push(&buf)?;
    Ok(FilePos(offset))
}
