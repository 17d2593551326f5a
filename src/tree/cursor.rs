// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Positions and leaf-walking iterators.
//!
//! A [`Position`] is a stamped element location: leaf page, element index
//! and the tree's mutation stamp at mint time. Any mutation bumps the
//! stamp, so a held position used afterwards fails with `InvalidIterator`
//! instead of silently pointing somewhere else.
//!
//! [`RawIter`] walks the doubly-linked leaf chain in either direction,
//! yielding decoded elements. It borrows the tree, so the borrow checker
//! rules out mutation during iteration. Errors (I/O, corruption) are
//! yielded as items and end the walk.

use crate::buffer::manager::PageId;
use crate::codec::order::ByteOrder;
use crate::codec::packed::Packed;
use crate::error::TreeResult;
use crate::tree::engine::{Loc, Tree};

/// A stamped element location, returned by the search operations.
///
/// Valid until the next mutation of its tree; stale use reports
/// `InvalidIterator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub(crate) page: PageId,
    pub(crate) index: u32,
    pub(crate) stamp: u64,
}

/// Double-ended iterator over a contiguous run of elements.
///
/// `front` and `back` bound the remaining run inclusively; the iterator is
/// exhausted once the element at `back` (forward) or `front` (backward)
/// has been yielded.
pub struct RawIter<'t, K: Packed, M: Packed, O: ByteOrder> {
    tree: &'t Tree<K, M, O>,
    front: Option<Loc>,
    back: Option<Loc>,
    done: bool,
}

impl<'t, K: Packed, M: Packed, O: ByteOrder> RawIter<'t, K, M, O> {
    /// Iterator over the whole tree.
    pub(crate) fn all(tree: &'t Tree<K, M, O>) -> TreeResult<RawIter<'t, K, M, O>> {
        let front = tree.first_loc()?;
        let back = tree.last_loc()?;
        Ok(RawIter {
            tree,
            done: front.is_none(),
            front,
            back,
        })
    }

    /// Iterator over `[lower, upper)`; `None` bounds mean the tree's ends.
    pub(crate) fn between(
        tree: &'t Tree<K, M, O>,
        lower: Option<Loc>,
        upper: Option<Loc>,
    ) -> TreeResult<RawIter<'t, K, M, O>> {
        if lower.is_none() || lower == upper {
            return Ok(RawIter {
                tree,
                front: None,
                back: None,
                done: true,
            });
        }
        let back = match upper {
            Some(u) => tree.pred_loc(u)?,
            None => tree.last_loc()?,
        };
        Ok(RawIter {
            tree,
            done: back.is_none(),
            front: lower,
            back,
        })
    }
}

impl<'t, K: Packed, M: Packed, O: ByteOrder> Iterator for RawIter<'t, K, M, O> {
    type Item = TreeResult<(K, M)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let loc = match self.front {
            Some(loc) => loc,
            None => {
                self.done = true;
                return None;
            }
        };
        let pair = match self.tree.pair_at_loc(loc) {
            Ok(pair) => pair,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if self.back == Some(loc) {
            self.done = true;
        } else {
            match self.tree.succ_loc(loc) {
                Ok(Some(next)) => self.front = Some(next),
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        Some(Ok(pair))
    }

    // Counting the remainder would walk the leaves, defeating laziness.
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

impl<'t, K: Packed, M: Packed, O: ByteOrder> DoubleEndedIterator for RawIter<'t, K, M, O> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let loc = match self.back {
            Some(loc) => loc,
            None => {
                self.done = true;
                return None;
            }
        };
        let pair = match self.tree.pair_at_loc(loc) {
            Ok(pair) => pair,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if self.front == Some(loc) {
            self.done = true;
        } else {
            match self.tree.pred_loc(loc) {
                Ok(Some(prev)) => self.back = Some(prev),
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        Some(Ok(pair))
    }
}
