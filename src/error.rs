// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for pagetree.
//!
//! One crate-wide error enum covers every subsystem: the binary file layer,
//! the buffer manager, the tree engine, the index layer and the bulk loader.
//! Variants carry enough context (path, page id, counts) to diagnose a
//! failure without a debugger.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Result alias used throughout the crate.
pub type TreeResult<T> = Result<T, TreeError>;

/// pagetree error type.
#[derive(Debug)]
pub enum TreeError {
    /// Raw file I/O failure.
    Io {
        path: PathBuf,
        code: i32,
        reason: String,
    },

    /// Marker, endianness, version or size check failed on open.
    CorruptHeader { path: PathBuf, reason: String },

    /// Structural inconsistency discovered while walking the tree.
    CorruptTree { page: u32, reason: String },

    /// Open signature disagrees with the signature stored at creation.
    SignatureMismatch {
        path: PathBuf,
        stored: u64,
        given: u64,
    },

    /// Key size, mapped size, splash string or variant flags disagree with
    /// the stored file.
    TypeMismatch { reason: String },

    /// Mutation attempted through a read-only handle.
    ReadOnly,

    /// Operation on a closed file or manager.
    NotOpen,

    /// Page id past the end of the file.
    OutOfRange { page: u32, page_count: u32 },

    /// A position minted before the last mutation was used afterwards.
    InvalidIterator,

    /// Bulk loader input file size is not a multiple of the record size.
    MalformedInput { path: PathBuf, reason: String },

    /// Bulk loader merged a different number of records than it scanned.
    CountMismatch { scanned: u64, inserted: u64 },

    /// Advisory lock on the tree file could not be acquired (the file is
    /// already open through another handle).
    LockFailed { path: PathBuf },
}

impl TreeError {
    /// Builds an [`TreeError::Io`] from a `std::io::Error` and the path the
    /// operation touched.
    pub fn io(path: &Path, err: io::Error) -> Self {
        TreeError::Io {
            path: path.to_path_buf(),
            code: err.raw_os_error().unwrap_or(0),
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::Io { path, code, reason } => {
                write!(f, "i/o error on {}: {} (os code {})", path.display(), reason, code)
            }
            TreeError::CorruptHeader { path, reason } => {
                write!(f, "corrupt header in {}: {}", path.display(), reason)
            }
            TreeError::CorruptTree { page, reason } => {
                write!(f, "corrupt tree at page {}: {}", page, reason)
            }
            TreeError::SignatureMismatch { path, stored, given } => write!(
                f,
                "signature mismatch on {}: stored {:#x}, given {:#x}",
                path.display(),
                stored,
                given
            ),
            TreeError::TypeMismatch { reason } => write!(f, "type mismatch: {}", reason),
            TreeError::ReadOnly => write!(f, "mutation attempted on a read-only tree"),
            TreeError::NotOpen => write!(f, "operation on a closed handle"),
            TreeError::OutOfRange { page, page_count } => {
                write!(f, "page {} out of range (page count {})", page, page_count)
            }
            TreeError::InvalidIterator => {
                write!(f, "position invalidated by a mutation of the tree")
            }
            TreeError::MalformedInput { path, reason } => {
                write!(f, "malformed bulk-load input {}: {}", path.display(), reason)
            }
            TreeError::CountMismatch { scanned, inserted } => write!(
                f,
                "bulk load count mismatch: scanned {} records, inserted {}",
                scanned, inserted
            ),
            TreeError::LockFailed { path } => {
                write!(f, "could not lock {} (already open elsewhere)", path.display())
            }
        }
    }
}

impl std::error::Error for TreeError {}
