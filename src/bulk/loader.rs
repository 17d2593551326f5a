// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The bulk loader.
//!
//! Configured with an available-memory budget and a directory for the
//! temporary run files (the system temp directory unless the caller picks
//! one). Run files are deleted on success and on failure alike.
//!
//! ## Record Format
//!
//! The source file is a dense sequence of `key ‖ mapped` images in the
//! container's [`Packed`] encodings; a file size that is not a multiple of
//! the record size fails with `MalformedInput`. The loader asserts that
//! the number of merged inserts equals the number of records scanned and
//! fails with `CountMismatch` otherwise.

use crate::codec::packed::Packed;
use crate::error::{TreeError, TreeResult};
use crate::file::binary::{BinaryFile, OpenMode};
use crate::tree::map::{BtreeMap, BtreeMultimap};
use crate::tree::set::{BtreeMultiset, BtreeSet};
use crate::tree::Flags;
use std::path::{Path, PathBuf};

/// External merge-sort loader for the four container variants.
#[derive(Debug, Clone)]
pub struct BulkLoader {
    available_memory: usize,
    temp_dir: PathBuf,
}

impl BulkLoader {
    /// A loader that may hold `available_memory` bytes of records in
    /// memory at a time.
    pub fn new(available_memory: usize) -> BulkLoader {
        BulkLoader {
            available_memory,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Puts the temporary run files under `dir` instead of the system
    /// temp directory.
    pub fn with_temp_dir<P: AsRef<Path>>(mut self, dir: P) -> BulkLoader {
        self.temp_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Bulk-loads `(key, value)` records into a `BtreeMap` at `target`.
    ///
    /// ## Input
    /// - `source`: file of fixed-size `key ‖ value` records
    /// - `target`: tree file to open with `flags`/`signature`/`page_size`
    ///
    /// ## Output
    /// - `Ok(BtreeMap)`: the loaded container, left open
    /// - `Err(TreeError)`: open, I/O, `MalformedInput` or `CountMismatch`
    ///
    /// ## Side Effects
    /// - Writes and removes numbered run files in the temp directory
    pub fn load_map<K, V, P, Q>(
        &self,
        source: P,
        target: Q,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<BtreeMap<K, V>>
    where
        K: Packed + Ord,
        V: Packed,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let mut map = BtreeMap::open(target, flags, signature, page_size)?;
        self.run::<K, V, _>(source.as_ref(), &mut |k, v| map.insert(k, v).map(|_| ()))?;
        Ok(map)
    }

    /// Bulk-loads `(key, value)` records into a `BtreeMultimap`.
    pub fn load_multimap<K, V, P, Q>(
        &self,
        source: P,
        target: Q,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<BtreeMultimap<K, V>>
    where
        K: Packed + Ord,
        V: Packed,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let mut map = BtreeMultimap::open(target, flags, signature, page_size)?;
        self.run::<K, V, _>(source.as_ref(), &mut |k, v| map.insert(k, v).map(|_| ()))?;
        Ok(map)
    }

    /// Bulk-loads key records into a `BtreeSet`.
    pub fn load_set<K, P, Q>(
        &self,
        source: P,
        target: Q,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<BtreeSet<K>>
    where
        K: Packed + Ord,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let mut set = BtreeSet::open(target, flags, signature, page_size)?;
        self.run::<K, (), _>(source.as_ref(), &mut |k, ()| set.insert(k).map(|_| ()))?;
        Ok(set)
    }

    /// Bulk-loads key records into a `BtreeMultiset`.
    pub fn load_multiset<K, P, Q>(
        &self,
        source: P,
        target: Q,
        flags: Flags,
        signature: u64,
        page_size: usize,
    ) -> TreeResult<BtreeMultiset<K>>
    where
        K: Packed + Ord,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let mut set = BtreeMultiset::open(target, flags, signature, page_size)?;
        self.run::<K, (), _>(source.as_ref(), &mut |k, ()| set.insert(k).map(|_| ()))?;
        Ok(set)
    }

    /// Distribution plus merge; `insert` receives every record in key
    /// order. Returns the number of records inserted.
    fn run<K, M, F>(&self, source: &Path, insert: &mut F) -> TreeResult<u64>
    where
        K: Packed + Ord,
        M: Packed,
        F: FnMut(K, M) -> TreeResult<()>,
    {
        let record_size = K::SIZE + M::SIZE;
        let mut infile = BinaryFile::open(source, OpenMode::IN | OpenMode::SEQUENTIAL)?;
        let file_size = infile.len()?;

        if file_size % record_size as u64 != 0 {
            return Err(TreeError::MalformedInput {
                path: source.to_path_buf(),
                reason: format!(
                    "file size {} is not a multiple of the record size {}",
                    file_size, record_size
                ),
            });
        }
        let n_records = file_size / record_size as u64;
        if n_records == 0 {
            return Ok(0);
        }

        let per_run = (self.available_memory / record_size).max(1);
        let n_runs = ((n_records + per_run as u64 - 1) / per_run as u64) as usize;

        //  distribution phase

        let mut batch = Vec::new();
        if n_runs == 1 {
            // One run: sort in memory and feed the tree directly.
            read_batch::<K, M>(&mut infile, n_records as usize, record_size, &mut batch)?;
            batch.sort_by(|a, b| a.0.cmp(&b.0));
            let mut inserted = 0u64;
            for (k, m) in batch {
                insert(k, m)?;
                inserted += 1;
            }
            return finish(n_records, inserted);
        }

        let runs = RunFiles::new(&self.temp_dir, n_runs);
        let mut remaining = n_records;
        for run_path in runs.paths() {
            let take = remaining.min(per_run as u64) as usize;
            read_batch::<K, M>(&mut infile, take, record_size, &mut batch)?;
            batch.sort_by(|a, b| a.0.cmp(&b.0));

            let mut out = BinaryFile::open(
                run_path,
                OpenMode::OUT | OpenMode::TRUNCATE | OpenMode::SEQUENTIAL,
            )?;
            let mut raw = vec![0u8; take * record_size];
            for (i, (k, m)) in batch.iter().enumerate() {
                let off = i * record_size;
                k.pack(&mut raw[off..]);
                m.pack(&mut raw[off + K::SIZE..]);
            }
            out.write(&raw)?;
            out.close()?;
            remaining -= take as u64;
        }
        debug_assert_eq!(remaining, 0);

        //  merge phase

        struct RunState<K, M> {
            file: BinaryFile,
            key: K,
            mapped: M,
            remaining: u64,
        }

        let mut states: Vec<RunState<K, M>> = Vec::with_capacity(n_runs);
        let mut record = vec![0u8; record_size];
        for (i, run_path) in runs.paths().iter().enumerate() {
            let mut file = BinaryFile::open(run_path, OpenMode::IN | OpenMode::SEQUENTIAL)?;
            let run_records = run_len(n_records, per_run as u64, i, n_runs);
            read_record::<K, M>(&mut file, &mut record, run_path)?;
            states.push(RunState {
                file,
                key: K::unpack(&record),
                mapped: M::unpack(&record[K::SIZE..]),
                remaining: run_records,
            });
        }

        let mut inserted = 0u64;
        while !states.is_empty() {
            // Strictly-smaller comparison keeps ties with the earliest run.
            let mut min = 0;
            for i in 1..states.len() {
                if states[i].key < states[min].key {
                    min = i;
                }
            }

            insert(states[min].key, states[min].mapped)?;
            inserted += 1;

            states[min].remaining -= 1;
            if states[min].remaining == 0 {
                states.remove(min);
            } else {
                let state = &mut states[min];
                read_record::<K, M>(&mut state.file, &mut record, source)?;
                state.key = K::unpack(&record);
                state.mapped = M::unpack(&record[K::SIZE..]);
            }
        }

        finish(n_records, inserted)
    }
}

fn finish(scanned: u64, inserted: u64) -> TreeResult<u64> {
    if inserted != scanned {
        return Err(TreeError::CountMismatch { scanned, inserted });
    }
    Ok(inserted)
}

fn run_len(n_records: u64, per_run: u64, run: usize, n_runs: usize) -> u64 {
    if run + 1 < n_runs {
        per_run
    } else {
        n_records - per_run * (n_runs as u64 - 1)
    }
}

fn read_batch<K: Packed, M: Packed>(
    file: &mut BinaryFile,
    count: usize,
    record_size: usize,
    batch: &mut Vec<(K, M)>,
) -> TreeResult<()> {
    let mut raw = vec![0u8; count * record_size];
    let n = file.read(&mut raw)?;
    if n != raw.len() {
        return Err(TreeError::MalformedInput {
            path: file.path().to_path_buf(),
            reason: format!("short read: wanted {} bytes, got {}", raw.len(), n),
        });
    }
    batch.clear();
    batch.reserve(count);
    for i in 0..count {
        let off = i * record_size;
        batch.push((K::unpack(&raw[off..]), M::unpack(&raw[off + K::SIZE..])));
    }
    Ok(())
}

fn read_record<K: Packed, M: Packed>(
    file: &mut BinaryFile,
    record: &mut [u8],
    path: &Path,
) -> TreeResult<()> {
    let n = file.read(record)?;
    if n != record.len() {
        return Err(TreeError::MalformedInput {
            path: path.to_path_buf(),
            reason: format!("short record: wanted {} bytes, got {}", record.len(), n),
        });
    }
    Ok(())
}

/// Numbered run files, deleted when dropped (success and failure alike).
struct RunFiles {
    paths: Vec<PathBuf>,
}

impl RunFiles {
    fn new(dir: &Path, n_runs: usize) -> RunFiles {
        let pid = std::process::id();
        let paths = (0..n_runs)
            .map(|i| dir.join(format!("pagetree-bulk-{}-{}.run", pid, i)))
            .collect();
        RunFiles { paths }
    }

    fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for RunFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = std::fs::remove_file(path);
        }
    }
}
