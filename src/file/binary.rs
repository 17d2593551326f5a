// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Low-level binary file I/O.
//!
//! A thin wrapper around `std::fs::File` with the contract the page layers
//! above need: reads and writes loop until the full requested count has
//! transferred (a short read happens only at end-of-file), seeks past the
//! end are permitted and produce a sparse file, and every failure maps to a
//! typed error carrying the path and the OS error code.
//!
//! ## Open Modes
//!
//! `OpenMode` is a bitmask: `IN`, `OUT`, `TRUNCATE`, `SEEK_END`, plus the
//! access-pattern hints `RANDOM`, `SEQUENTIAL` and `PRELOAD`. `TRUNCATE`
//! implies `OUT`; `OUT` implies `IN`. `PRELOAD` reads the whole file once
//! after opening to warm the OS cache; `RANDOM` and `SEQUENTIAL` are
//! advisory and carry no behaviour of their own.
//!
//! Closing an already-closed file is a no-op; every other operation on a
//! closed file fails with `NotOpen`.

use crate::error::{TreeError, TreeResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::BitOr;
use std::path::{Path, PathBuf};

/// Open-mode bitmask for [`BinaryFile::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode(u32);

impl OpenMode {
    /// Open for input.
    pub const IN: OpenMode = OpenMode(1);
    /// Open for output; creates the file when missing.
    pub const OUT: OpenMode = OpenMode(1 << 1);
    /// Truncate an existing file when opening.
    pub const TRUNCATE: OpenMode = OpenMode(1 << 2);
    /// Seek to the end immediately after opening.
    pub const SEEK_END: OpenMode = OpenMode(1 << 3);
    /// Hint: optimise for random access.
    pub const RANDOM: OpenMode = OpenMode(1 << 6);
    /// Hint: optimise for sequential access.
    pub const SEQUENTIAL: OpenMode = OpenMode(1 << 7);
    /// Read the entire file on open to preload the OS disk cache.
    pub const PRELOAD: OpenMode = OpenMode(1 << 8);

    pub fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenMode {
    type Output = OpenMode;

    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

/// Byte-addressable binary file.
///
/// Exclusively owned by its user (the buffer manager owns one per tree
/// file); not copyable.
#[derive(Debug)]
pub struct BinaryFile {
    path: PathBuf,
    file: Option<File>,
}

impl BinaryFile {
    /// Opens `path` with the given mode bits.
    ///
    /// `TRUNCATE` implies `OUT` and `OUT` implies `IN`, so a writable file
    /// is always readable too.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> TreeResult<BinaryFile> {
        let path = path.as_ref().to_path_buf();

        let mut mode = mode;
        if mode.contains(OpenMode::TRUNCATE) {
            mode = mode | OpenMode::OUT;
        }
        if mode.contains(OpenMode::OUT) {
            mode = mode | OpenMode::IN;
        }

        let mut options = OpenOptions::new();
        options.read(mode.contains(OpenMode::IN));
        if mode.contains(OpenMode::OUT) {
            options.write(true).create(true);
        }
        if mode.contains(OpenMode::TRUNCATE) {
            options.truncate(true);
        }

        let file = options
            .open(&path)
            .map_err(|e| TreeError::io(&path, e))?;

        let mut opened = BinaryFile {
            path,
            file: Some(file),
        };

        if mode.contains(OpenMode::PRELOAD) {
            opened.preload()?;
        }
        if mode.contains(OpenMode::SEEK_END) {
            opened.seek(SeekFrom::End(0))?;
        } else if mode.contains(OpenMode::PRELOAD) {
            opened.seek(SeekFrom::Start(0))?;
        }

        Ok(opened)
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads into `target`, looping until it is full or end-of-file.
    ///
    /// Returns the number of bytes read; a count shorter than
    /// `target.len()` means end-of-file was reached, not an error.
    pub fn read(&mut self, target: &mut [u8]) -> TreeResult<usize> {
        let path = self.path.clone();
        let file = self.handle()?;
        let mut total = 0;
        while total < target.len() {
            let n = file
                .read(&mut target[total..])
                .map_err(|e| TreeError::io(&path, e))?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Writes all of `source`, looping over partial writes.
    pub fn write(&mut self, source: &[u8]) -> TreeResult<()> {
        let path = self.path.clone();
        let file = self.handle()?;
        let mut written = 0;
        while written < source.len() {
            let n = file
                .write(&source[written..])
                .map_err(|e| TreeError::io(&path, e))?;
            written += n;
        }
        Ok(())
    }

    /// Seeks relative to the start, the current position or the end.
    ///
    /// Seeking past end-of-file is permitted; a later write materialises the
    /// gap as zero bytes (sparse where the filesystem supports it).
    pub fn seek(&mut self, from: SeekFrom) -> TreeResult<u64> {
        let path = self.path.clone();
        let file = self.handle()?;
        file.seek(from).map_err(|e| TreeError::io(&path, e))
    }

    /// Current file length in bytes.
    pub fn len(&self) -> TreeResult<u64> {
        let file = self.file.as_ref().ok_or(TreeError::NotOpen)?;
        file.metadata()
            .map(|m| m.len())
            .map_err(|e| TreeError::io(&self.path, e))
    }

    /// Truncates (or extends with zeros) to `len` bytes.
    pub fn truncate(&mut self, len: u64) -> TreeResult<()> {
        let path = self.path.clone();
        let file = self.handle()?;
        file.set_len(len).map_err(|e| TreeError::io(&path, e))
    }

    /// Takes the advisory lock for this file: exclusive for writable
    /// handles, shared for read-only ones. Fails immediately when another
    /// handle holds a conflicting lock.
    pub fn lock(&mut self, exclusive: bool) -> TreeResult<()> {
        let path = self.path.clone();
        let file = self.handle()?;
        let taken = if exclusive {
            fs2::FileExt::try_lock_exclusive(file)
        } else {
            fs2::FileExt::try_lock_shared(file)
        };
        taken.map_err(|_| TreeError::LockFailed { path })
    }

    /// Closes the file. Closing an already-closed file is a no-op; the lock,
    /// if held, is released with the handle.
    pub fn close(&mut self) -> TreeResult<()> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| TreeError::io(&self.path, e))?;
        }
        Ok(())
    }

    fn handle(&mut self) -> TreeResult<&mut File> {
        self.file.as_mut().ok_or(TreeError::NotOpen)
    }

    /// Sequentially reads the whole file to warm the OS cache.
    fn preload(&mut self) -> TreeResult<()> {
        self.seek(SeekFrom::Start(0))?;
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let n = self.read(&mut chunk)?;
            if n < chunk.len() {
                break;
            }
        }
        Ok(())
    }
}

impl Drop for BinaryFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
