// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! pagetree - persistent B+-tree containers backed by a single file.
//!
//! Ordered set, multiset, map and multimap semantics with logarithmic
//! lookup, insertion and deletion, bidirectional iteration, range
//! queries, external-memory bulk loading, and an indirection layer for
//! variable-length keys.
//!
//! ## Features
//!
//! - **Single-file trees**: a fixed-size header page plus fixed-size
//!   nodes; free pages are recycled, files never shrink.
//! - **Pinned page cache**: a bounded buffer manager with write-back on
//!   eviction and optional permanent caching of branch pages.
//! - **Portable byte orders**: big- or little-endian management fields
//!   and endian-adapted keys; files travel between hosts.
//! - **Index containers**: variable-length keys in a memory-mapped flat
//!   file, 48-bit offsets in the tree, several indexes per data file.
//! - **Bulk loading**: two-phase external merge-sort feeding the tree in
//!   key order.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pagetree::{Big, BtreeMap, Flags, DEFAULT_PAGE_SIZE};
//!
//! let mut map: BtreeMap<Big<i32>, Big<i64>> = BtreeMap::open(
//!     "weights.db",
//!     Flags::READ_WRITE,
//!     0x5eed,
//!     DEFAULT_PAGE_SIZE,
//! )?;
//! map.insert(Big(42), Big(1_000_000))?;
//! for entry in map.iter()? {
//!     let (key, value) = entry?;
//!     println!("{} -> {}", key.0, value.0);
//! }
//! # Ok::<(), pagetree::TreeError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! containers (set / multiset / map / multimap, index variants)
//!        │
//! tree engine (search, split, merge, cursors)
//!        │
//! buffer manager (pinned page cache)      mapped flat file (index data)
//!        │                                        │
//! binary file ─────────────────────────── memory map
//! ```
//!
//! ## Concurrency
//!
//! Handles are single-threaded; independent trees on distinct files may
//! run in parallel. An advisory file lock refuses a second handle on the
//! same file.

pub mod buffer;
pub mod bulk;
pub mod codec;
pub mod error;
pub mod file;
pub mod index;
pub mod tree;


// Re-export commonly used types
pub use buffer::{BufferManager, CacheStats, PageGuard, PageId};
pub use bulk::BulkLoader;
pub use codec::{Big, BigOrder, ByteOrder, Endianness, Little, LittleOrder, NativeOrder, Packed};
pub use error::{TreeError, TreeResult};
pub use file::{BinaryFile, MappedFlatFile, OpenMode};
pub use index::keys::FlatKey;
pub use index::{FilePos, IndexMap, IndexMultimap, IndexMultiset, IndexSet};
pub use tree::{
    BtreeMap, BtreeMultimap, BtreeMultiset, BtreeSet, Compare, Flags, MapIter, OrdCompare,
    Position, SetIter, DEFAULT_MAX_CACHE_PAGES, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE,
};
