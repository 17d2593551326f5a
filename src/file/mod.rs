// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! File layer: raw binary files and the extensible memory-mapped flat file.
//!
//! - **binary**: byte-addressable read/write/seek over a named file, with
//!   full-count transfer loops and typed errors. The buffer manager owns one
//!   of these exclusively.
//! - **mapped**: an append-only flat file kept memory-mapped, growing by
//!   remap. The index layer stores variable-length keys here and keeps only
//!   48-bit offsets in tree nodes.

pub mod binary;
pub mod mapped;

#[cfg(test)]
mod binary_test;

// Re-export public API
pub use binary::{BinaryFile, OpenMode};
pub use mapped::MappedFlatFile;
