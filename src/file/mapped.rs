// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Extensible memory-mapped flat file.
//!
//! An append-only byte file kept memory-mapped for reads. The file is
//! over-allocated by a caller-chosen reserve so that most appends need no
//! remap; when an append would exceed the mapped range the file grows and is
//! remapped. On close the physical file is truncated back to its logical
//! size, so the reserve never reaches disk readers.
//!
//! Pointers into the mapping are invalidated by growth. Callers must go
//! through [`MappedFlatFile::slice`] on every access and never retain raw
//! pointers across a `push`.

use crate::error::{TreeError, TreeResult};
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

enum Mapping {
    None,
    Read(Mmap),
    Write(MmapMut),
}

/// Append-only flat file with a memory-mapped view.
pub struct MappedFlatFile {
    path: PathBuf,
    file: Option<File>,
    map: Mapping,
    /// Logical size: bytes actually appended.
    logical: u64,
    /// Extra bytes kept allocated past the logical size.
    reserve: u64,
    writable: bool,
}

impl MappedFlatFile {
    /// Opens (or, when writable, creates) the flat file at `path`.
    ///
    /// `reserve` is the over-allocation in bytes; larger values mean fewer
    /// remaps during heavy appending.
    pub fn open<P: AsRef<Path>>(
        path: P,
        writable: bool,
        reserve: u64,
    ) -> TreeResult<MappedFlatFile> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .open(&path)
            .map_err(|e| TreeError::io(&path, e))?;

        let logical = file
            .metadata()
            .map_err(|e| TreeError::io(&path, e))?
            .len();

        let mut flat = MappedFlatFile {
            path,
            file: Some(file),
            map: Mapping::None,
            logical,
            reserve,
            writable,
        };

        if writable && reserve > 0 {
            flat.grow_to(logical + reserve)?;
        } else {
            flat.remap()?;
        }

        Ok(flat)
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical size: the bytes that survive a close.
    pub fn len(&self) -> u64 {
        self.logical
    }

    pub fn is_empty(&self) -> bool {
        self.logical == 0
    }

    /// Currently mapped (physical) size, including the reserve.
    pub fn mapped_len(&self) -> u64 {
        match &self.map {
            Mapping::None => 0,
            Mapping::Read(m) => m.len() as u64,
            Mapping::Write(m) => m.len() as u64,
        }
    }

    /// Appends `bytes` and returns the offset they were written at.
    ///
    /// Grows and remaps the file when the append would exceed the mapped
    /// range; any raw pointer previously derived from the mapping is invalid
    /// afterwards.
    ///
    /// ## Input
    /// - `bytes`: the flat element image to append
    ///
    /// ## Output
    /// - `Ok(u64)`: offset of the first appended byte
    /// - `Err(TreeError)`: read-only file, closed file, or grow failure
    ///
    /// ## Performance
    /// - Within the reserve: a memcpy into the mapping
    /// - Past the reserve: `set_len` plus a remap, then the memcpy
    pub fn push(&mut self, bytes: &[u8]) -> TreeResult<u64> {
        if !self.writable {
            return Err(TreeError::ReadOnly);
        }
        if self.file.is_none() {
            return Err(TreeError::NotOpen);
        }

        let offset = self.logical;
        let needed = offset + bytes.len() as u64;
        if needed > self.mapped_len() {
            self.grow_to(needed + self.reserve)?;
        }

        match &mut self.map {
            Mapping::Write(m) => {
                m[offset as usize..needed as usize].copy_from_slice(bytes);
            }
            _ => return Err(TreeError::NotOpen),
        }

        self.logical = needed;
        Ok(offset)
    }

    /// Borrows `len` bytes starting at `offset`.
    pub fn slice(&self, offset: u64, len: usize) -> TreeResult<&[u8]> {
        let end = offset + len as u64;
        if end > self.logical {
            return Err(TreeError::CorruptTree {
                page: 0,
                reason: format!(
                    "flat file range {}..{} past logical size {}",
                    offset, end, self.logical
                ),
            });
        }
        Ok(&self.mapped()?[offset as usize..end as usize])
    }

    /// Borrows everything from `offset` to the logical end. Used to size a
    /// variable-length element in place.
    pub fn tail(&self, offset: u64) -> TreeResult<&[u8]> {
        if offset > self.logical {
            return Err(TreeError::CorruptTree {
                page: 0,
                reason: format!(
                    "flat file offset {} past logical size {}",
                    offset, self.logical
                ),
            });
        }
        Ok(&self.mapped()?[offset as usize..self.logical as usize])
    }

    /// Closes the file, truncating the physical size back to the logical
    /// size. Closing twice is a no-op.
    pub fn close(&mut self) -> TreeResult<()> {
        if let Some(file) = self.file.take() {
            if let Mapping::Write(m) = &self.map {
                m.flush().map_err(|e| TreeError::io(&self.path, e))?;
            }
            self.map = Mapping::None;
            if self.writable {
                file.set_len(self.logical)
                    .map_err(|e| TreeError::io(&self.path, e))?;
            }
        }
        Ok(())
    }

    fn mapped(&self) -> TreeResult<&[u8]> {
        match &self.map {
            Mapping::None => Err(TreeError::NotOpen),
            Mapping::Read(m) => Ok(&m[..]),
            Mapping::Write(m) => Ok(&m[..]),
        }
    }

    fn grow_to(&mut self, physical: u64) -> TreeResult<()> {
        let file = self.file.as_ref().ok_or(TreeError::NotOpen)?;
        self.map = Mapping::None;
        file.set_len(physical)
            .map_err(|e| TreeError::io(&self.path, e))?;
        self.remap()
    }

    fn remap(&mut self) -> TreeResult<()> {
        let file = self.file.as_ref().ok_or(TreeError::NotOpen)?;
        let physical = file
            .metadata()
            .map_err(|e| TreeError::io(&self.path, e))?
            .len();

        if physical == 0 {
            self.map = Mapping::None;
            return Ok(());
        }

        self.map = if self.writable {
            let m = unsafe { MmapMut::map_mut(file) }
                .map_err(|e| TreeError::io(&self.path, e))?;
            Mapping::Write(m)
        } else {
            let m = unsafe { Mmap::map(file) }.map_err(|e| TreeError::io(&self.path, e))?;
            Mapping::Read(m)
        };
        Ok(())
    }
}

impl Drop for MappedFlatFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
