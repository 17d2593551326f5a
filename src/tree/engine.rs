// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The B+-tree engine: search, insert, erase, rebalancing.
//!
//! One generic engine serves all container variants. Keys and mapped
//! values are fixed-width [`Packed`] images; uniqueness is a property of
//! the call (`insert_unique` vs `insert_multi`), recorded in the header so
//! reopen catches variant confusion.
//!
//! ## Search
//!
//! Every search takes a *probe*: a function reporting the ordering of the
//! wanted key relative to a stored key. Typed containers build probes from
//! their comparator; the index layer builds probes that dereference file
//! offsets first. Descents come in two flavours:
//! - *lower*: descend towards the first element `>=` the probe,
//! - *upper*: descend towards the first element `>` the probe.
//!
//! A leaf position equal to the leaf's count normalises to the next leaf's
//! first element.
//!
//! ## Mutation
//!
//! Inserts split full nodes bottom-up; the separator passed to the parent
//! is the first key of the new right leaf (leaves keep whole keys), while
//! branch splits promote their middle key. Erases rebalance underfull
//! nodes by borrowing from a sibling, else merging with one, pulling
//! separators down and recursing; a branch root left with a single child
//! shrinks the tree. Freed pages go on the free list and are reused before
//! the file grows.
//!
//! New pages are written before parents and the header are updated, so an
//! error mid-change leaves the reachable tree in its last consistent
//! shape. Every mutation bumps an in-memory stamp; positions minted before
//! it fail with `InvalidIterator` afterwards.

use crate::buffer::manager::{BufferManager, CacheStats, PageId};
use crate::codec::order::ByteOrder;
use crate::codec::packed::Packed;
use crate::error::{TreeError, TreeResult};
use crate::file::binary::OpenMode;
use crate::tree::cursor::Position;
use crate::tree::header::{FileHeader, HEADER_SIZE, MIN_PAGE_SIZE};
use crate::tree::node::{Layout, Node};
use crate::tree::Flags;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// An element location: leaf page and element index. Only meaningful until
/// the next mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Loc {
    pub page: PageId,
    pub index: usize,
}

/// Generic tree engine over key `K`, mapped value `M` (`()` for sets) and
/// management byte order `O`.
pub struct Tree<K: Packed, M: Packed, O: ByteOrder> {
    mgr: Rc<BufferManager>,
    path: PathBuf,
    header: RefCell<FileHeader>,
    layout: Layout,
    read_only: bool,
    cache_branches: bool,
    stamp: Cell<u64>,
    _types: PhantomData<(K, M, O)>,
}

impl<K: Packed, M: Packed, O: ByteOrder> Tree<K, M, O> {
    /// Opens or creates a tree file.
    ///
    /// `splash` names the container variant and is verified on reopen, as
    /// are the key and mapped sizes, the variant bits and the signature
    /// (unless the given signature is all ones). `page_size` applies to new
    /// files only; reopen reads it from the header.
    pub(crate) fn open<P: AsRef<Path>>(
        path: P,
        flags: Flags,
        signature: u64,
        page_size: usize,
        max_cache: usize,
        splash: &str,
        unique: bool,
        key_only: bool,
    ) -> TreeResult<Tree<K, M, O>> {
        let path = path.as_ref().to_path_buf();
        if K::SIZE == 0 {
            return Err(TreeError::TypeMismatch {
                reason: "zero-width key type".to_string(),
            });
        }
        let read_only = !(flags.contains(Flags::READ_WRITE) || flags.contains(Flags::TRUNCATE));

        let mut mode = if read_only {
            OpenMode::IN
        } else if flags.contains(Flags::TRUNCATE) {
            OpenMode::OUT | OpenMode::TRUNCATE
        } else {
            OpenMode::OUT
        };
        mode = mode | OpenMode::RANDOM;
        if flags.contains(Flags::PRELOAD) {
            mode = mode | OpenMode::PRELOAD;
        }

        let (mgr, pre_existed) = BufferManager::open(&path, mode, max_cache, page_size)?;
        mgr.lock(!read_only)?;

        let mut variant_bits = 0u32;
        if unique {
            variant_bits |= Flags::UNIQUE.bits();
        }
        if key_only {
            variant_bits |= Flags::KEY_ONLY.bits();
        }

        if pre_existed {
            let mut raw = [0u8; HEADER_SIZE];
            let n = mgr.read_at(0, &mut raw)?;
            if n < HEADER_SIZE {
                return Err(TreeError::CorruptHeader {
                    path,
                    reason: format!("file too short for a header: {} bytes", n),
                });
            }
            let header = FileHeader::decode(&raw, &path)?;

            if header.endianness != O::ENDIANNESS {
                return Err(TreeError::TypeMismatch {
                    reason: format!(
                        "file stores {:?}-endian management fields, open traits are {:?}",
                        header.endianness,
                        O::ENDIANNESS
                    ),
                });
            }
            if header.splash_str() != splash {
                return Err(TreeError::TypeMismatch {
                    reason: format!(
                        "container variant \"{}\" does not match stored \"{}\"",
                        splash,
                        header.splash_str()
                    ),
                });
            }
            if header.key_size as usize != K::SIZE || header.mapped_size as usize != M::SIZE {
                return Err(TreeError::TypeMismatch {
                    reason: format!(
                        "key/mapped sizes {}/{} do not match stored {}/{}",
                        K::SIZE,
                        M::SIZE,
                        header.key_size,
                        header.mapped_size
                    ),
                });
            }
            if header.flags != variant_bits {
                return Err(TreeError::TypeMismatch {
                    reason: format!(
                        "variant flags {:#x} do not match stored {:#x}",
                        variant_bits, header.flags
                    ),
                });
            }
            if signature != u64::MAX && header.signature != signature {
                return Err(TreeError::SignatureMismatch {
                    path,
                    stored: header.signature,
                    given: signature,
                });
            }

            mgr.set_page_size(header.page_size as usize)?;
            let layout = Layout::compute(header.page_size as usize, K::SIZE, M::SIZE);

            // Keep the header page resident for the life of the handle.
            mgr.read(0)?.set_never_free(true);

            Ok(Tree {
                mgr,
                path,
                header: RefCell::new(header),
                layout,
                read_only,
                cache_branches: flags.contains(Flags::CACHE_BRANCHES),
                stamp: Cell::new(0),
                _types: PhantomData,
            })
        } else {
            if page_size < MIN_PAGE_SIZE || page_size < HEADER_SIZE {
                return Err(TreeError::TypeMismatch {
                    reason: format!("page size {} below minimum {}", page_size, MIN_PAGE_SIZE),
                });
            }
            let layout = Layout::compute(page_size, K::SIZE, M::SIZE);
            if layout.leaf_cap < 2 || layout.branch_cap < 2 {
                return Err(TreeError::TypeMismatch {
                    reason: format!(
                        "page size {} too small for {}-byte elements",
                        page_size,
                        layout.elem_size()
                    ),
                });
            }

            let mut header = FileHeader::new(
                O::ENDIANNESS,
                page_size as u32,
                variant_bits,
                K::SIZE as u16,
                M::SIZE as u16,
                signature,
                splash,
            );

            let header_page = mgr.new_page()?;
            header_page.set_never_free(true);
            let root = mgr.new_page()?;
            debug_assert_eq!(header_page.id(), 0);
            debug_assert_eq!(root.id(), 1);

            header.root_page_id = 1;
            header.first_page_id = 1;
            header.last_page_id = 1;
            header.page_count = 2;
            header.root_level = 0;

            let tree = Tree {
                mgr,
                path,
                header: RefCell::new(header),
                layout,
                read_only,
                cache_branches: flags.contains(Flags::CACHE_BRANCHES),
                stamp: Cell::new(0),
                _types: PhantomData,
            };
            tree.store_header()?;
            Ok(tree)
        }
    }

    // -- observers --------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.header.borrow().element_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn page_size(&self) -> usize {
        self.layout.page_size
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.mgr.stats()
    }

    /// Header page count, including page 0 and free pages.
    pub fn page_count(&self) -> u32 {
        self.header.borrow().page_count
    }

    // -- lifecycle --------------------------------------------------------

    /// Writes all dirty pages back. Returns whether anything was written.
    pub fn flush(&self) -> TreeResult<bool> {
        self.mgr.flush()
    }

    /// Flushes and closes the underlying file. Errors here are real; drop
    /// swallows them, so callers wanting to observe flush failures close
    /// explicitly.
    pub fn close(&self) -> TreeResult<()> {
        self.mgr.close()
    }

    /// Empties the tree, truncating the file back to the header plus one
    /// fresh root leaf.
    pub fn clear(&self) -> TreeResult<()> {
        if self.read_only {
            return Err(TreeError::ReadOnly);
        }
        self.bump();
        self.mgr.truncate_pages(1)?;
        let root = self.mgr.new_page()?;
        debug_assert_eq!(root.id(), 1);
        {
            let mut h = self.header.borrow_mut();
            h.element_count = 0;
            h.root_page_id = 1;
            h.first_page_id = 1;
            h.last_page_id = 1;
            h.page_count = 2;
            h.root_level = 0;
            h.free_page_list_head_id = 0;
        }
        let header_page = self.mgr.read(0)?;
        header_page.set_never_free(true);
        drop(header_page);
        self.store_header()
    }

    // -- positions --------------------------------------------------------

    pub(crate) fn mint(&self, loc: Loc) -> Position {
        Position {
            page: loc.page,
            index: loc.index as u32,
            stamp: self.stamp.get(),
        }
    }

    /// Validates a position against the current tree state.
    pub(crate) fn check(&self, pos: &Position) -> TreeResult<Loc> {
        if pos.stamp != self.stamp.get() {
            return Err(TreeError::InvalidIterator);
        }
        let node = match self.node(pos.page) {
            Ok(node) => node,
            Err(TreeError::CorruptTree { .. }) => return Err(TreeError::InvalidIterator),
            Err(e) => return Err(e),
        };
        if !node.is_leaf() || pos.index as usize >= node.count() {
            return Err(TreeError::InvalidIterator);
        }
        Ok(Loc {
            page: pos.page,
            index: pos.index as usize,
        })
    }

    // -- reads ------------------------------------------------------------

    pub(crate) fn key_at_loc(&self, loc: Loc) -> TreeResult<K> {
        let node = self.node(loc.page)?;
        Ok(node.key_at(&self.layout, loc.index))
    }

    pub(crate) fn pair_at_loc(&self, loc: Loc) -> TreeResult<(K, M)> {
        let node = self.node(loc.page)?;
        Ok((
            node.key_at(&self.layout, loc.index),
            node.mapped_at(&self.layout, loc.index),
        ))
    }

    pub(crate) fn first_loc(&self) -> TreeResult<Option<Loc>> {
        let first = self.header.borrow().first_page_id;
        let node = self.node(first)?;
        if node.count() == 0 {
            return Ok(None);
        }
        Ok(Some(Loc {
            page: first,
            index: 0,
        }))
    }

    pub(crate) fn last_loc(&self) -> TreeResult<Option<Loc>> {
        let last = self.header.borrow().last_page_id;
        let node = self.node(last)?;
        if node.count() == 0 {
            return Ok(None);
        }
        Ok(Some(Loc {
            page: last,
            index: node.count() - 1,
        }))
    }

    /// The location after `loc`, or `None` at the end.
    pub(crate) fn succ_loc(&self, loc: Loc) -> TreeResult<Option<Loc>> {
        let node = self.node(loc.page)?;
        self.loc_or_next(&node, loc.index + 1)
    }

    /// The location before `loc`, or `None` at the beginning.
    pub(crate) fn pred_loc(&self, loc: Loc) -> TreeResult<Option<Loc>> {
        if loc.index > 0 {
            return Ok(Some(Loc {
                page: loc.page,
                index: loc.index - 1,
            }));
        }
        let node = self.node(loc.page)?;
        let prev = node.prev_leaf();
        if prev == 0 {
            return Ok(None);
        }
        let prev_node = self.node(prev)?;
        if prev_node.count() == 0 {
            return Err(TreeError::CorruptTree {
                page: prev,
                reason: "empty leaf in chain".to_string(),
            });
        }
        Ok(Some(Loc {
            page: prev,
            index: prev_node.count() - 1,
        }))
    }

    /// First element `>=` the probe.
    pub(crate) fn lower_loc<F>(&self, probe: &F) -> TreeResult<Option<Loc>>
    where
        F: Fn(&K) -> TreeResult<Ordering>,
    {
        let (leaf, idx) = self.leaf_for(probe, false)?;
        self.loc_or_next(&leaf, idx)
    }

    /// First element `>` the probe.
    pub(crate) fn upper_loc<F>(&self, probe: &F) -> TreeResult<Option<Loc>>
    where
        F: Fn(&K) -> TreeResult<Ordering>,
    {
        let (leaf, idx) = self.leaf_for(probe, true)?;
        self.loc_or_next(&leaf, idx)
    }

    pub(crate) fn find_loc<F>(&self, probe: &F) -> TreeResult<Option<Loc>>
    where
        F: Fn(&K) -> TreeResult<Ordering>,
    {
        match self.lower_loc(probe)? {
            Some(loc) => {
                let key = self.key_at_loc(loc)?;
                if probe(&key)? == Ordering::Equal {
                    Ok(Some(loc))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    pub(crate) fn count_matching<F>(&self, probe: &F) -> TreeResult<u64>
    where
        F: Fn(&K) -> TreeResult<Ordering>,
    {
        let mut n = 0;
        let mut cur = self.lower_loc(probe)?;
        while let Some(loc) = cur {
            let key = self.key_at_loc(loc)?;
            if probe(&key)? != Ordering::Equal {
                break;
            }
            n += 1;
            cur = self.succ_loc(loc)?;
        }
        Ok(n)
    }

    // -- inserts ----------------------------------------------------------

    /// Inserts when no equal key exists; otherwise returns the location of
    /// the existing element and `false`.
    pub(crate) fn insert_unique<F>(
        &self,
        probe: &F,
        key: &K,
        mapped: &M,
    ) -> TreeResult<(Loc, bool)>
    where
        F: Fn(&K) -> TreeResult<Ordering>,
    {
        if self.read_only {
            return Err(TreeError::ReadOnly);
        }
        let (leaf, idx) = self.leaf_for(probe, true)?;
        if idx > 0 {
            let existing = leaf.key_at::<K>(&self.layout, idx - 1);
            if probe(&existing)? == Ordering::Equal {
                return Ok((
                    Loc {
                        page: leaf.id(),
                        index: idx - 1,
                    },
                    false,
                ));
            }
        }
        let loc = self.insert_at(leaf, idx, key, mapped)?;
        Ok((loc, true))
    }

    /// Inserts unconditionally; equal keys keep insertion order (the new
    /// element lands after the existing equals).
    pub(crate) fn insert_multi<F>(&self, probe: &F, key: &K, mapped: &M) -> TreeResult<Loc>
    where
        F: Fn(&K) -> TreeResult<Ordering>,
    {
        if self.read_only {
            return Err(TreeError::ReadOnly);
        }
        let (leaf, idx) = self.leaf_for(probe, true)?;
        self.insert_at(leaf, idx, key, mapped)
    }

    fn insert_at(&self, leaf: Node<O>, idx: usize, key: &K, mapped: &M) -> TreeResult<Loc> {
        self.bump();
        let loc = if leaf.count() < self.layout.leaf_cap {
            leaf.insert_elem(&self.layout, idx, key, mapped);
            Loc {
                page: leaf.id(),
                index: idx,
            }
        } else {
            self.split_leaf_insert(leaf, idx, key, mapped)?
        };
        self.header.borrow_mut().element_count += 1;
        self.store_header()?;
        Ok(loc)
    }

    fn split_leaf_insert(
        &self,
        leaf: Node<O>,
        idx: usize,
        key: &K,
        mapped: &M,
    ) -> TreeResult<Loc> {
        let lay = self.layout;
        let cap = lay.leaf_cap;
        let left_n = (cap + 2) / 2; // post-insert size of the left leaf

        let right = self.alloc_page()?;

        let loc;
        if idx < left_n {
            leaf.leaf_move_tail(&lay, left_n - 1, &right);
            leaf.insert_elem(&lay, idx, key, mapped);
            loc = Loc {
                page: leaf.id(),
                index: idx,
            };
        } else {
            leaf.leaf_move_tail(&lay, left_n, &right);
            right.insert_elem(&lay, idx - left_n, key, mapped);
            loc = Loc {
                page: right.id(),
                index: idx - left_n,
            };
        }

        right.set_prev_leaf(leaf.id());
        let old_next = leaf.next_leaf();
        right.set_next_leaf(old_next);
        leaf.set_next_leaf(right.id());
        if old_next != 0 {
            self.node(old_next)?.set_prev_leaf(right.id());
        } else {
            self.header.borrow_mut().last_page_id = right.id();
        }

        // Leaves keep whole keys; the separator is the right leaf's first.
        let sep = right.key_bytes(&lay, 0);
        self.insert_into_parent(&leaf, &sep, &right)?;
        Ok(loc)
    }

    fn insert_into_parent(&self, left: &Node<O>, sep: &[u8], right: &Node<O>) -> TreeResult<()> {
        let root_id = self.header.borrow().root_page_id;
        if left.id() == root_id {
            let new_root = self.alloc_page()?;
            new_root.set_level(left.level() + 1);
            if self.cache_branches {
                new_root.guard().set_never_free(true);
            }
            new_root.set_child(&self.layout, 0, left.id());
            new_root.branch_insert_at(&self.layout, 0, sep, right.id());
            left.refresh_parent(new_root.id(), 0);
            right.refresh_parent(new_root.id(), 1);
            let mut h = self.header.borrow_mut();
            h.root_page_id = new_root.id();
            h.root_level += 1;
            return Ok(());
        }

        let parent = self.node(left.parent())?;
        let pi = left.parent_index();
        if parent.is_leaf() || parent.child_at(&self.layout, pi) != left.id() {
            return Err(TreeError::CorruptTree {
                page: parent.id(),
                reason: "parent pointer mismatch".to_string(),
            });
        }

        if parent.count() < self.layout.branch_cap {
            parent.branch_insert_at(&self.layout, pi, sep, right.id());
            right.refresh_parent(parent.id(), pi + 1);
            Ok(())
        } else {
            self.split_branch_insert(parent, pi, sep, right.id())
        }
    }

    /// Splits a full branch while inserting `(sep, right_id)` at key slot
    /// `i`. The middle key of the combined order is promoted, not copied
    /// down.
    fn split_branch_insert(
        &self,
        p: Node<O>,
        i: usize,
        sep: &[u8],
        right_id: PageId,
    ) -> TreeResult<()> {
        let lay = self.layout;
        let cap = lay.branch_cap;
        let m = (cap + 1) / 2; // promoted slot in the combined order

        let r = self.alloc_page()?;
        r.set_level(p.level());
        if self.cache_branches {
            r.guard().set_never_free(true);
        }

        let promoted: Vec<u8>;
        if i < m {
            promoted = p.branch_key_bytes(&lay, m - 1);
            let child0 = p.child_at(&lay, m);
            p.branch_move_tail(&lay, m, &r, child0);
            p.set_count(m - 1);
            p.branch_insert_at(&lay, i, sep, right_id);
        } else if i == m {
            promoted = sep.to_vec();
            p.branch_move_tail(&lay, m, &r, right_id);
            p.set_count(m);
        } else {
            promoted = p.branch_key_bytes(&lay, m);
            let child0 = p.child_at(&lay, m + 1);
            p.branch_move_tail(&lay, m + 1, &r, child0);
            p.set_count(m);
            r.branch_insert_at(&lay, i - (m + 1), sep, right_id);
        }

        // Children moved to `r` keep stale back-pointers; the next descent
        // through them refreshes.
        self.insert_into_parent(&p, &promoted, &r)
    }

    // -- erases -----------------------------------------------------------

    /// Erases every element matching the probe; returns how many.
    pub(crate) fn erase_matching<F>(&self, probe: &F) -> TreeResult<u64>
    where
        F: Fn(&K) -> TreeResult<Ordering>,
    {
        if self.read_only {
            return Err(TreeError::ReadOnly);
        }
        let mut erased = 0;
        loop {
            let loc = match self.lower_loc(probe)? {
                Some(loc) => loc,
                None => break,
            };
            let key = self.key_at_loc(loc)?;
            if probe(&key)? != Ordering::Equal {
                break;
            }
            let node = self.node(loc.page)?;
            self.erase_at_node(node, loc.index)?;
            erased += 1;
        }
        Ok(erased)
    }

    /// Erases the element at `loc`; returns the successor location.
    pub(crate) fn erase_loc(&self, loc: Loc) -> TreeResult<Option<Loc>> {
        if self.read_only {
            return Err(TreeError::ReadOnly);
        }
        let node = self.node(loc.page)?;
        if !node.is_leaf() || loc.index >= node.count() {
            return Err(TreeError::InvalidIterator);
        }
        self.erase_at_node(node, loc.index)
    }

    fn erase_at_node(&self, leaf: Node<O>, idx: usize) -> TreeResult<Option<Loc>> {
        self.bump();
        leaf.remove_elem(&self.layout, idx);
        self.header.borrow_mut().element_count -= 1;

        let root_id = self.header.borrow().root_page_id;
        let succ = if leaf.id() == root_id {
            // A root leaf holds any count; empty means an empty tree.
            if idx < leaf.count() {
                Some(Loc {
                    page: leaf.id(),
                    index: idx,
                })
            } else {
                None
            }
        } else if leaf.count() >= self.layout.leaf_min {
            self.loc_or_next(&leaf, idx)?
        } else {
            self.rebalance_leaf(leaf, idx)?
        };

        self.store_header()?;
        Ok(succ)
    }

    /// Restores the min-fill invariant of an underfull leaf. Returns the
    /// location that now holds the erased element's successor.
    fn rebalance_leaf(&self, leaf: Node<O>, removed_idx: usize) -> TreeResult<Option<Loc>> {
        let lay = self.layout;
        let parent = self.node(leaf.parent())?;
        let pi = leaf.parent_index();
        if parent.is_leaf() || parent.child_at(&lay, pi) != leaf.id() {
            return Err(TreeError::CorruptTree {
                page: parent.id(),
                reason: "parent pointer mismatch".to_string(),
            });
        }

        if pi > 0 {
            let left = self.node(parent.child_at(&lay, pi - 1))?;
            if left.count() > lay.leaf_min {
                let elem = left.elem_bytes(&lay, left.count() - 1);
                left.set_count(left.count() - 1);
                leaf.insert_elem_bytes(&lay, 0, &elem);
                parent.set_branch_key_bytes(&lay, pi - 1, &leaf.key_bytes(&lay, 0));
                return self.loc_or_next(&leaf, removed_idx + 1);
            }
        }

        if pi < parent.count() {
            let right = self.node(parent.child_at(&lay, pi + 1))?;
            if right.count() > lay.leaf_min {
                let elem = right.elem_bytes(&lay, 0);
                right.remove_elem(&lay, 0);
                leaf.insert_elem_bytes(&lay, leaf.count(), &elem);
                parent.set_branch_key_bytes(&lay, pi, &right.key_bytes(&lay, 0));
                return Ok(Some(Loc {
                    page: leaf.id(),
                    index: removed_idx,
                }));
            }
        }

        if pi > 0 {
            let left = self.node(parent.child_at(&lay, pi - 1))?;
            let base = left.count();
            left.leaf_append_from(&lay, &leaf);
            let next = leaf.next_leaf();
            left.set_next_leaf(next);
            if next != 0 {
                self.node(next)?.set_prev_leaf(left.id());
            } else {
                self.header.borrow_mut().last_page_id = left.id();
            }
            let succ = self.loc_or_next(&left, base + removed_idx)?;
            self.free_page(leaf)?;
            self.branch_removed_entry(parent, pi - 1)?;
            Ok(succ)
        } else {
            let right = self.node(parent.child_at(&lay, 1))?;
            leaf.leaf_append_from(&lay, &right);
            let next = right.next_leaf();
            leaf.set_next_leaf(next);
            if next != 0 {
                self.node(next)?.set_prev_leaf(leaf.id());
            } else {
                self.header.borrow_mut().last_page_id = leaf.id();
            }
            let succ = self.loc_or_next(&leaf, removed_idx)?;
            self.free_page(right)?;
            self.branch_removed_entry(parent, 0)?;
            Ok(succ)
        }
    }

    /// Removes separator `key_idx` (and the child to its right) from a
    /// branch after a merge, then restores the branch invariants upwards.
    fn branch_removed_entry(&self, parent: Node<O>, key_idx: usize) -> TreeResult<()> {
        parent.branch_remove_at(&self.layout, key_idx);

        let root_id = self.header.borrow().root_page_id;
        if parent.id() == root_id {
            if parent.count() == 0 {
                // Branch root with a single child: the child becomes root.
                let child_id = parent.child_at(&self.layout, 0);
                let child = self.node(child_id)?;
                child.refresh_parent(0, 0);
                {
                    let mut h = self.header.borrow_mut();
                    h.root_page_id = child_id;
                    h.root_level -= 1;
                }
                self.free_page(parent)?;
            }
            return Ok(());
        }

        if parent.count() >= self.layout.branch_min {
            return Ok(());
        }
        self.rebalance_branch(parent)
    }

    fn rebalance_branch(&self, n: Node<O>) -> TreeResult<()> {
        let lay = self.layout;
        let g = self.node(n.parent())?;
        let pi = n.parent_index();
        if g.is_leaf() || g.child_at(&lay, pi) != n.id() {
            return Err(TreeError::CorruptTree {
                page: g.id(),
                reason: "parent pointer mismatch".to_string(),
            });
        }

        if pi > 0 {
            let left = self.node(g.child_at(&lay, pi - 1))?;
            if left.count() > lay.branch_min {
                // Rotate through the parent: separator comes down, the left
                // sibling's last key goes up, its last child moves over.
                let sep = g.branch_key_bytes(&lay, pi - 1);
                let moved = left.child_at(&lay, left.count());
                n.branch_insert_front(&lay, &sep, moved);
                g.set_branch_key_bytes(&lay, pi - 1, &left.branch_key_bytes(&lay, left.count() - 1));
                left.set_count(left.count() - 1);
                return Ok(());
            }
        }

        if pi < g.count() {
            let right = self.node(g.child_at(&lay, pi + 1))?;
            if right.count() > lay.branch_min {
                let sep = g.branch_key_bytes(&lay, pi);
                n.branch_insert_at(&lay, n.count(), &sep, right.child_at(&lay, 0));
                g.set_branch_key_bytes(&lay, pi, &right.branch_key_bytes(&lay, 0));
                right.branch_remove_front(&lay);
                return Ok(());
            }
        }

        if pi > 0 {
            let left = self.node(g.child_at(&lay, pi - 1))?;
            let sep = g.branch_key_bytes(&lay, pi - 1);
            left.branch_append_from(&lay, &sep, &n);
            self.free_page(n)?;
            self.branch_removed_entry(g, pi - 1)
        } else {
            let right = self.node(g.child_at(&lay, 1))?;
            let sep = g.branch_key_bytes(&lay, 0);
            n.branch_append_from(&lay, &sep, &right);
            self.free_page(right)?;
            self.branch_removed_entry(g, 0)
        }
    }

    // -- descent ----------------------------------------------------------

    /// Walks root to leaf, refreshing parent back-pointers along the way.
    /// Returns the leaf and the in-leaf partition index (which may equal
    /// the leaf's count).
    fn leaf_for<F>(&self, probe: &F, upper: bool) -> TreeResult<(Node<O>, usize)>
    where
        F: Fn(&K) -> TreeResult<Ordering>,
    {
        let (root_id, root_level) = {
            let h = self.header.borrow();
            (h.root_page_id, h.root_level)
        };
        let mut node = self.node(root_id)?;
        if node.level() as u16 != root_level {
            return Err(TreeError::CorruptTree {
                page: root_id,
                reason: format!(
                    "root level {} does not match header {}",
                    node.level(),
                    root_level
                ),
            });
        }

        let mut parent_id = 0;
        let mut parent_index = 0;
        loop {
            node.refresh_parent(parent_id, parent_index);
            if node.is_leaf() {
                break;
            }
            if self.cache_branches {
                node.guard().set_never_free(true);
            }
            let child_idx = self.branch_search(&node, probe, upper)?;
            let child_id = node.child_at(&self.layout, child_idx);
            let child = self.node(child_id)?;
            if child.level() + 1 != node.level() {
                return Err(TreeError::CorruptTree {
                    page: child_id,
                    reason: format!(
                        "child level {} under level {}",
                        child.level(),
                        node.level()
                    ),
                });
            }
            parent_id = node.id();
            parent_index = child_idx;
            node = child;
        }

        let idx = self.leaf_search(&node, probe, upper)?;
        Ok((node, idx))
    }

    /// Child index to descend: the count of separators `< probe` (lower)
    /// or `<= probe` (upper).
    fn branch_search<F>(&self, node: &Node<O>, probe: &F, upper: bool) -> TreeResult<usize>
    where
        F: Fn(&K) -> TreeResult<Ordering>,
    {
        let mut lo = 0;
        let mut hi = node.count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let key = node.branch_key_at::<K>(&self.layout, mid);
            let go_right = match probe(&key)? {
                Ordering::Greater => true,
                Ordering::Equal => upper,
                Ordering::Less => false,
            };
            if go_right {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Element index within a leaf: the first `>=` probe (lower) or the
    /// first `>` probe (upper); `count` when there is none.
    fn leaf_search<F>(&self, node: &Node<O>, probe: &F, upper: bool) -> TreeResult<usize>
    where
        F: Fn(&K) -> TreeResult<Ordering>,
    {
        let mut lo = 0;
        let mut hi = node.count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let key = node.key_at::<K>(&self.layout, mid);
            let go_right = match probe(&key)? {
                Ordering::Greater => true,
                Ordering::Equal => upper,
                Ordering::Less => false,
            };
            if go_right {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Normalises a leaf position: `count` means the next leaf's first
    /// element; `None` at the end of the chain.
    fn loc_or_next(&self, leaf: &Node<O>, idx: usize) -> TreeResult<Option<Loc>> {
        if idx < leaf.count() {
            return Ok(Some(Loc {
                page: leaf.id(),
                index: idx,
            }));
        }
        let next = leaf.next_leaf();
        if next == 0 {
            return Ok(None);
        }
        let next_node = self.node(next)?;
        if next_node.count() == 0 {
            return Err(TreeError::CorruptTree {
                page: next,
                reason: "empty leaf in chain".to_string(),
            });
        }
        Ok(Some(Loc {
            page: next,
            index: 0,
        }))
    }

    // -- pages ------------------------------------------------------------

    fn node(&self, id: PageId) -> TreeResult<Node<O>> {
        if id == 0 {
            return Err(TreeError::CorruptTree {
                page: id,
                reason: "node id 0 (header page) referenced".to_string(),
            });
        }
        let page_count = self.header.borrow().page_count;
        if id >= page_count {
            return Err(TreeError::CorruptTree {
                page: id,
                reason: format!("node id past page count {}", page_count),
            });
        }
        Ok(Node::new(self.mgr.read(id)?))
    }

    /// Reuses the free list head, else extends the file by one page. The
    /// returned node is zero-filled and dirty.
    fn alloc_page(&self) -> TreeResult<Node<O>> {
        let head = self.header.borrow().free_page_list_head_id;
        if head != 0 {
            let node: Node<O> = Node::new(self.mgr.read(head)?);
            let next = node.free_next();
            self.header.borrow_mut().free_page_list_head_id = next;
            node.guard().bytes_mut().fill(0);
            Ok(node)
        } else {
            let guard = self.mgr.new_page()?;
            self.header.borrow_mut().page_count += 1;
            Ok(Node::new(guard))
        }
    }

    /// Pushes a no-longer-reachable page onto the free list. Its contents
    /// become undefined; the file does not shrink.
    fn free_page(&self, node: Node<O>) -> TreeResult<()> {
        node.guard().set_never_free(false);
        let head = self.header.borrow().free_page_list_head_id;
        node.set_free_next(head);
        self.header.borrow_mut().free_page_list_head_id = node.id();
        Ok(())
    }

    // -- integrity -------------------------------------------------------

    /// Full structural check: node fill and ordering, separator bounds,
    /// the leaf chain in both directions, and the header element count.
    pub(crate) fn validate<F>(&self, cmp: &F) -> TreeResult<()>
    where
        F: Fn(&K, &K) -> Ordering,
    {
        let (root_id, element_count, first_id, last_id) = {
            let h = self.header.borrow();
            (
                h.root_page_id,
                h.element_count,
                h.first_page_id,
                h.last_page_id,
            )
        };

        let root = self.node(root_id)?;
        let mut counted = 0u64;
        self.validate_node(&root, true, None, None, cmp, &mut counted)?;
        if counted != element_count {
            return Err(TreeError::CorruptTree {
                page: root_id,
                reason: format!(
                    "header element count {} but traversal found {}",
                    element_count, counted
                ),
            });
        }

        // Leaf chain, both directions, same number of steps.
        let mut forward = 0u64;
        let mut id = first_id;
        let mut prev = 0;
        while id != 0 {
            let leaf = self.node(id)?;
            if !leaf.is_leaf() {
                return Err(TreeError::CorruptTree {
                    page: id,
                    reason: "non-leaf in leaf chain".to_string(),
                });
            }
            if leaf.prev_leaf() != prev {
                return Err(TreeError::CorruptTree {
                    page: id,
                    reason: "broken prev pointer in leaf chain".to_string(),
                });
            }
            forward += 1;
            prev = id;
            id = leaf.next_leaf();
        }
        if prev != last_id {
            return Err(TreeError::CorruptTree {
                page: last_id,
                reason: "last leaf not at the end of the chain".to_string(),
            });
        }
        let mut backward = 0u64;
        let mut id = last_id;
        while id != 0 {
            let leaf = self.node(id)?;
            backward += 1;
            id = leaf.prev_leaf();
        }
        if forward != backward {
            return Err(TreeError::CorruptTree {
                page: first_id,
                reason: format!("leaf chain lengths differ: {} vs {}", forward, backward),
            });
        }
        Ok(())
    }

    fn validate_node<F>(
        &self,
        node: &Node<O>,
        is_root: bool,
        lower: Option<&K>,
        upper: Option<&K>,
        cmp: &F,
        counted: &mut u64,
    ) -> TreeResult<()>
    where
        F: Fn(&K, &K) -> Ordering,
    {
        let lay = &self.layout;
        let count = node.count();
        let corrupt = |reason: String| TreeError::CorruptTree {
            page: node.id(),
            reason,
        };

        if node.is_leaf() {
            if !is_root && count < lay.leaf_min {
                return Err(corrupt(format!(
                    "leaf fill {} below minimum {}",
                    count, lay.leaf_min
                )));
            }
            let mut previous: Option<K> = None;
            for i in 0..count {
                let key = node.key_at::<K>(lay, i);
                if let Some(p) = &previous {
                    if cmp(p, &key) == Ordering::Greater {
                        return Err(corrupt(format!("unsorted leaf at element {}", i)));
                    }
                }
                if let Some(lo) = lower {
                    if cmp(&key, lo) == Ordering::Less {
                        return Err(corrupt("leaf key below separator bound".to_string()));
                    }
                }
                if let Some(hi) = upper {
                    if cmp(&key, hi) == Ordering::Greater {
                        return Err(corrupt("leaf key above separator bound".to_string()));
                    }
                }
                previous = Some(key);
            }
            *counted += count as u64;
            return Ok(());
        }

        if count == 0 {
            return Err(corrupt("branch with no separators".to_string()));
        }
        if !is_root && count < lay.branch_min {
            return Err(corrupt(format!(
                "branch fill {} below minimum {}",
                count, lay.branch_min
            )));
        }
        for i in 1..count {
            let a = node.branch_key_at::<K>(lay, i - 1);
            let b = node.branch_key_at::<K>(lay, i);
            if cmp(&a, &b) == Ordering::Greater {
                return Err(corrupt(format!("unsorted branch at separator {}", i)));
            }
        }
        for i in 0..=count {
            let child = self.node(node.child_at(lay, i))?;
            if child.level() + 1 != node.level() {
                return Err(corrupt(format!("child level skew under separator {}", i)));
            }
            let lo = if i == 0 {
                lower.cloned()
            } else {
                Some(node.branch_key_at::<K>(lay, i - 1))
            };
            let hi = if i == count {
                upper.cloned()
            } else {
                Some(node.branch_key_at::<K>(lay, i))
            };
            self.validate_node(&child, false, lo.as_ref(), hi.as_ref(), cmp, counted)?;
        }
        Ok(())
    }

    fn store_header(&self) -> TreeResult<()> {
        let guard = self.mgr.read(0)?;
        self.header.borrow().encode(&mut guard.bytes_mut()[..HEADER_SIZE]);
        Ok(())
    }

    fn bump(&self) {
        self.stamp.set(self.stamp.get() + 1);
    }
}
