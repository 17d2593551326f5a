// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Page cache with pinning and write-back.
//!
//! ## Cache Policy
//!
//! The cache keeps at most `max_cache` resident pages with a pin count of
//! zero (the *available list*, FIFO on most-recent release). Pinned pages do
//! not count against the limit. A cache miss allocates a fresh buffer while
//! the available list has room, otherwise it reclaims the oldest available
//! buffer, writing it back first when dirty. Pages marked *never-free*
//! (branch caching) stay resident for the life of the open file.
//!
//! ## Pinning
//!
//! [`PageGuard`] increments the buffer's pin count on creation and
//! decrements it on drop, so a page is released on every exit path,
//! including early returns on error. When the last pin drops, the buffer
//! joins the available list.
//!
//! ## Thread Safety
//!
//! Not thread-safe; one manager serves one thread of control. Sharing
//! between cooperating trees goes through `Rc<BufferManager>`.

use crate::error::{TreeError, TreeResult};
use crate::file::binary::{BinaryFile, OpenMode};
use bytes::BytesMut;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Page ids are page numbers within the file; page 0 is the header.
pub type PageId = u32;

/// Cache activity counters, kept since open.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub buffer_allocs: u64,
    pub new_page_requests: u64,
    pub file_pages_read: u64,
    pub file_pages_written: u64,
    pub active_reads: u64,
    pub available_reads: u64,
    pub never_free_reads: u64,
}

impl CacheStats {
    pub fn cached_reads(&self) -> u64 {
        self.active_reads + self.available_reads + self.never_free_reads
    }

    pub fn total_reads(&self) -> u64 {
        self.cached_reads() + self.file_pages_read
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  buffer allocs ------------: {}", self.buffer_allocs)?;
        writeln!(f, "  new page requests --------: {}", self.new_page_requests)?;
        writeln!(f, "  file pages read ----------: {}", self.file_pages_read)?;
        writeln!(f, "  file pages written -------: {}", self.file_pages_written)?;
        writeln!(f, "  cached reads -------------: {}", self.cached_reads())?;
        writeln!(f, "    active buffers ---------: {}", self.active_reads)?;
        writeln!(f, "    available buffers ------: {}", self.available_reads)?;
        writeln!(f, "    never-free buffers -----: {}", self.never_free_reads)?;
        write!(f, "  total reads --------------: {}", self.total_reads())
    }
}

/// One in-memory page image, shared between the cache and its pins.
struct Buffer {
    id: Cell<PageId>,
    pins: Cell<u32>,
    dirty: Cell<bool>,
    never_free: Cell<bool>,
    data: RefCell<BytesMut>,
}

impl Buffer {
    fn new(id: PageId, page_size: usize) -> Buffer {
        let mut data = BytesMut::with_capacity(page_size);
        data.resize(page_size, 0);
        Buffer {
            id: Cell::new(id),
            pins: Cell::new(0),
            dirty: Cell::new(false),
            never_free: Cell::new(false),
            data: RefCell::new(data),
        }
    }
}

/// Pinned handle on a resident page.
///
/// Holding a guard keeps the page in memory; dropping the last guard makes
/// it reclaimable. Mutating access marks the page dirty.
pub struct PageGuard {
    mgr: Rc<BufferManager>,
    buf: Rc<Buffer>,
}

impl PageGuard {
    pub fn id(&self) -> PageId {
        self.buf.id.get()
    }

    /// Borrows the page bytes for reading.
    pub fn bytes(&self) -> Ref<'_, BytesMut> {
        self.buf.data.borrow()
    }

    /// Borrows the page bytes for writing and marks the page dirty.
    pub fn bytes_mut(&self) -> RefMut<'_, BytesMut> {
        self.buf.dirty.set(true);
        self.buf.data.borrow_mut()
    }

    pub fn is_dirty(&self) -> bool {
        self.buf.dirty.get()
    }

    /// Pins the page for the lifetime of the open file (branch caching).
    pub fn set_never_free(&self, keep: bool) {
        self.buf.never_free.set(keep);
    }

    pub fn never_free(&self) -> bool {
        self.buf.never_free.get()
    }
}

impl Clone for PageGuard {
    fn clone(&self) -> PageGuard {
        self.buf.pins.set(self.buf.pins.get() + 1);
        PageGuard {
            mgr: Rc::clone(&self.mgr),
            buf: Rc::clone(&self.buf),
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.mgr.release(&self.buf);
    }
}

struct Inner {
    file: BinaryFile,
    page_size: usize, // 0 until deduced from the header on reopen
    max_cache: usize,
    page_count: u32,
    buffers: HashMap<PageId, Rc<Buffer>>,
    available: VecDeque<PageId>,
    stats: CacheStats,
    open: bool,
}

/// Fixed-size page cache over one binary file.
pub struct BufferManager {
    inner: RefCell<Inner>,
}

impl BufferManager {
    /// Opens `path` for paged access.
    ///
    /// Returns the manager and whether the file pre-existed (and was not
    /// truncated). When it did, the page size is as yet unknown and
    /// [`BufferManager::set_page_size`] must be called with the size read
    /// from the header before any page operation.
    pub fn open<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        max_cache: usize,
        page_size: usize,
    ) -> TreeResult<(Rc<BufferManager>, bool)> {
        let pre_existed =
            path.as_ref().exists() && !mode.contains(OpenMode::TRUNCATE);

        let file = BinaryFile::open(path, mode)?;

        let inner = Inner {
            file,
            page_size: if pre_existed { 0 } else { page_size },
            max_cache,
            page_count: 0,
            buffers: HashMap::new(),
            available: VecDeque::new(),
            stats: CacheStats::default(),
            open: true,
        };

        Ok((
            Rc::new(BufferManager {
                inner: RefCell::new(inner),
            }),
            pre_existed,
        ))
    }

    pub fn path(&self) -> PathBuf {
        self.inner.borrow().file.path().to_path_buf()
    }

    pub fn is_open(&self) -> bool {
        self.inner.borrow().open
    }

    pub fn page_size(&self) -> usize {
        self.inner.borrow().page_size
    }

    pub fn page_count(&self) -> u32 {
        self.inner.borrow().page_count
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.borrow().stats
    }

    pub fn buffers_in_memory(&self) -> usize {
        self.inner.borrow().buffers.len()
    }

    pub fn buffers_available(&self) -> usize {
        self.inner.borrow().available.len()
    }

    /// Takes the advisory lock on the underlying file.
    pub fn lock(&self, exclusive: bool) -> TreeResult<()> {
        self.inner.borrow_mut().file.lock(exclusive)
    }

    /// Raw positioned read, used to probe the header before the page size
    /// is known.
    pub fn read_at(&self, offset: u64, target: &mut [u8]) -> TreeResult<usize> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open {
            return Err(TreeError::NotOpen);
        }
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read(target)
    }

    /// Records the page size deduced from the header and derives the page
    /// count from the file size.
    pub fn set_page_size(&self, page_size: usize) -> TreeResult<()> {
        let mut inner = self.inner.borrow_mut();
        debug_assert_eq!(inner.page_size, 0, "page size already set");
        debug_assert!(page_size > 0);

        let file_size = inner.file.len()?;
        if file_size % page_size as u64 != 0 {
            return Err(TreeError::CorruptHeader {
                path: inner.file.path().to_path_buf(),
                reason: format!(
                    "file size {} is not a multiple of page size {}",
                    file_size, page_size
                ),
            });
        }
        inner.page_size = page_size;
        inner.page_count = (file_size / page_size as u64) as u32;
        Ok(())
    }

    /// Allocates a fresh page at the end of the file and returns it pinned,
    /// dirty and zero-filled.
    pub fn new_page(self: &Rc<Self>) -> TreeResult<PageGuard> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open {
            return Err(TreeError::NotOpen);
        }
        debug_assert!(inner.page_size > 0, "page size not yet known");
        inner.stats.new_page_requests += 1;

        let id = inner.page_count;
        inner.page_count += 1;

        let buf = Self::prepare_buffer(&mut inner, id)?;
        buf.data.borrow_mut().fill(0);
        buf.dirty.set(true);
        buf.pins.set(1);
        drop(inner);

        Ok(PageGuard {
            mgr: Rc::clone(self),
            buf,
        })
    }

    /// Returns a pinned handle on page `id`, reading it from the file on a
    /// cache miss.
    ///
    /// ## Input
    /// - `id`: page number; 0 is the header page
    ///
    /// ## Output
    /// - `Ok(PageGuard)`: pinned handle, released on drop
    /// - `Err(TreeError)`: page out of range, I/O failure, manager closed
    ///
    /// ## Performance
    /// - Cache hit: no file access, a map lookup
    /// - Cache miss: one positioned read of `page_size` bytes
    ///
    /// ## Error Conditions
    /// - `OutOfRange`: `id` at or past the page count
    /// - `NotOpen`: manager already closed
    /// - `Io`: the underlying read failed
    pub fn read(self: &Rc<Self>, id: PageId) -> TreeResult<PageGuard> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open {
            return Err(TreeError::NotOpen);
        }
        if id >= inner.page_count {
            return Err(TreeError::OutOfRange {
                page: id,
                page_count: inner.page_count,
            });
        }

        if let Some(buf) = inner.buffers.get(&id).cloned() {
            if buf.pins.get() == 0 {
                if buf.never_free.get() {
                    inner.stats.never_free_reads += 1;
                } else {
                    if let Some(at) = inner.available.iter().position(|&p| p == id) {
                        inner.available.remove(at);
                    }
                    inner.stats.available_reads += 1;
                }
            } else {
                inner.stats.active_reads += 1;
            }
            buf.pins.set(buf.pins.get() + 1);
            drop(inner);
            return Ok(PageGuard {
                mgr: Rc::clone(self),
                buf,
            });
        }

        inner.stats.file_pages_read += 1;
        let buf = Self::prepare_buffer(&mut inner, id)?;

        let page_size = inner.page_size;
        let offset = id as u64 * page_size as u64;
        let read = (|| -> TreeResult<()> {
            inner.file.seek(SeekFrom::Start(offset))?;
            let mut data = buf.data.borrow_mut();
            let n = inner.file.read(&mut data[..])?;
            // A page inside page_count that was never written back reads
            // short out of a sparse file; the remainder is zero.
            data[n..].fill(0);
            Ok(())
        })();
        if let Err(e) = read {
            inner.buffers.remove(&id);
            return Err(e);
        }

        buf.pins.set(1);
        drop(inner);
        Ok(PageGuard {
            mgr: Rc::clone(self),
            buf,
        })
    }

    /// Writes all dirty pages back to the file. Returns whether any page
    /// was written.
    pub fn flush(&self) -> TreeResult<bool> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open {
            return Err(TreeError::NotOpen);
        }
        let dirty: Vec<Rc<Buffer>> = inner
            .buffers
            .values()
            .filter(|b| b.dirty.get())
            .cloned()
            .collect();
        let written = !dirty.is_empty();
        for buf in dirty {
            Self::write_buffer(&mut inner, &buf)?;
        }
        Ok(written)
    }

    /// Discards the whole cache and truncates the file to `keep` pages.
    ///
    /// Requires every pin to have been released; used by container `clear`.
    pub fn truncate_pages(&self, keep: u32) -> TreeResult<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open {
            return Err(TreeError::NotOpen);
        }
        debug_assert!(
            inner.buffers.values().all(|b| b.pins.get() == 0),
            "truncate with outstanding pins"
        );
        inner.buffers.clear();
        inner.available.clear();
        let len = keep as u64 * inner.page_size as u64;
        inner.file.truncate(len)?;
        inner.page_count = keep;
        Ok(())
    }

    /// Flushes, releases all buffers and closes the file. Closing twice is
    /// a no-op.
    pub fn close(&self) -> TreeResult<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open {
            return Ok(());
        }
        let dirty: Vec<Rc<Buffer>> = inner
            .buffers
            .values()
            .filter(|b| b.dirty.get())
            .cloned()
            .collect();
        for buf in dirty {
            Self::write_buffer(&mut inner, &buf)?;
        }
        debug_assert!(
            inner.buffers.values().all(|b| b.pins.get() == 0),
            "close with outstanding pins"
        );
        inner.buffers.clear();
        inner.available.clear();
        inner.open = false;
        inner.file.close()
    }

    fn release(&self, buf: &Rc<Buffer>) {
        let pins = buf.pins.get();
        debug_assert!(pins > 0, "unbalanced release");
        buf.pins.set(pins - 1);
        if pins - 1 > 0 {
            return;
        }

        let mut inner = self.inner.borrow_mut();
        // A guard may outlive a closed manager; its buffer is orphaned.
        if !inner.open || buf.never_free.get() {
            return;
        }
        let id = buf.id.get();
        if inner.buffers.contains_key(&id) {
            inner.available.push_back(id);
        }
    }

    /// Finds a buffer for `id`: a fresh allocation while the available list
    /// has room, otherwise the oldest available buffer, written back first
    /// when dirty.
    fn prepare_buffer(inner: &mut Inner, id: PageId) -> TreeResult<Rc<Buffer>> {
        let victim = if inner.available.len() >= inner.max_cache {
            inner.available.pop_front()
        } else {
            None
        };

        let buf = match victim {
            None => {
                inner.stats.buffer_allocs += 1;
                Rc::new(Buffer::new(id, inner.page_size))
            }
            Some(victim) => match inner.buffers.remove(&victim) {
                Some(old) => {
                    if old.dirty.get() {
                        Self::write_buffer(inner, &old)?;
                    }
                    old.id.set(id);
                    old.dirty.set(false);
                    old.never_free.set(false);
                    old
                }
                None => {
                    inner.stats.buffer_allocs += 1;
                    Rc::new(Buffer::new(id, inner.page_size))
                }
            }
        };

        inner.buffers.insert(id, Rc::clone(&buf));
        Ok(buf)
    }

    fn write_buffer(inner: &mut Inner, buf: &Buffer) -> TreeResult<()> {
        let offset = buf.id.get() as u64 * inner.page_size as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        let data = buf.data.borrow();
        inner.file.write(&data[..])?;
        buf.dirty.set(false);
        inner.stats.file_pages_written += 1;
        Ok(())
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
