// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Index containers: variable-length keys through an indirection layer.
//!
//! A base tree stores fixed-width keys in its nodes. An *index* container
//! instead appends each key's flat encoding to a shared, memory-mapped
//! data file and stores only the 48-bit file offset in tree nodes. The
//! tree's comparator is indirect: it dereferences two offsets through the
//! mapping and compares the decoded keys.
//!
//! ```text
//! ┌───────────────┐   48-bit offsets    ┌──────────────────────┐
//! │ index tree    │ ───────────────────▶│ flat data file (mmap)│
//! │ (FilePos keys)│                     │ "ape\0" "bear\0" ... │
//! └───────────────┘                     └──────────────────────┘
//! ```
//!
//! Several indexes may share one data file; exactly one of the joined
//! indexes appends, and the file closes with its last sharer. Key bytes
//! are never deduplicated and never reclaimed; erasing removes only the
//! offset from the tree.

pub mod keys;
pub mod map;
pub mod set;

#[cfg(test)]
mod keys_test;
#[cfg(test)]
mod set_test;

use crate::codec::order::{BigOrder, ByteOrder};
use crate::codec::packed::Packed;
use crate::error::{TreeError, TreeResult};
use crate::file::mapped::MappedFlatFile;
use keys::FlatKey;
use std::cell::RefCell;

// Re-export public API
pub use keys::VARINT_MAX;
pub use map::{IndexMap, IndexMultimap};
pub use set::{IndexMultiset, IndexSet};

/// Offset of a flat element in the data file. Stored big-endian in 48
/// bits, whatever the tree's management order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FilePos(pub u64);

impl Packed for FilePos {
    const SIZE: usize = 6;

    fn pack(&self, dest: &mut [u8]) {
        BigOrder::put_u48(dest, self.0);
    }

    fn unpack(src: &[u8]) -> Self {
        FilePos(BigOrder::get_u48(src))
    }
}

/// Decodes the key stored at `pos` through the mapping. Reads through the
/// `RefCell` on every call; no pointer survives a growth of the file.
pub(crate) fn read_key_at<K: FlatKey>(
    file: &RefCell<MappedFlatFile>,
    pos: FilePos,
) -> TreeResult<K> {
    let f = file.borrow();
    let tail = f.tail(pos.0)?;
    if tail.is_empty() {
        return Err(TreeError::CorruptTree {
            page: 0,
            reason: format!("flat element offset {} at or past the data file end", pos.0),
        });
    }
    let len = K::flat_len(tail);
    if len > tail.len() {
        return Err(TreeError::CorruptTree {
            page: 0,
            reason: format!("flat element at offset {} runs past the data file", pos.0),
        });
    }
    Ok(K::read_flat(&tail[..len]))
}

/// Decodes the `(key, value)` entry stored at `pos`: the key's flat bytes
/// followed by the value's.
pub(crate) fn read_entry_at<K: FlatKey, V: FlatKey>(
    file: &RefCell<MappedFlatFile>,
    pos: FilePos,
) -> TreeResult<(K, V)> {
    let f = file.borrow();
    let tail = f.tail(pos.0)?;
    if tail.is_empty() {
        return Err(TreeError::CorruptTree {
            page: 0,
            reason: format!("flat entry offset {} at or past the data file end", pos.0),
        });
    }
    let klen = K::flat_len(tail);
    if klen > tail.len() {
        return Err(TreeError::CorruptTree {
            page: 0,
            reason: format!("flat key at offset {} runs past the data file", pos.0),
        });
    }
    let key = K::read_flat(&tail[..klen]);
    let vtail = &tail[klen..];
    let vlen = V::flat_len(vtail);
    if vlen > vtail.len() {
        return Err(TreeError::CorruptTree {
            page: 0,
            reason: format!("flat value at offset {} runs past the data file", pos.0),
        });
    }
    Ok((key, V::read_flat(&vtail[..vlen])))
}
