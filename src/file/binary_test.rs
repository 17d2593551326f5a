// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the binary file layer.

#[cfg(test)]
mod tests {
    use crate::error::TreeError;
    use crate::file::binary::{BinaryFile, OpenMode};
    use std::io::SeekFrom;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roundtrip.bin");

        let mut f = BinaryFile::open(&path, OpenMode::OUT | OpenMode::TRUNCATE).unwrap();
        f.write(b"hello binary file").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 17];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(n, 17);
        assert_eq!(&buf, b"hello binary file");
    }

    #[test]
    fn test_short_read_at_eof_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.bin");

        let mut f = BinaryFile::open(&path, OpenMode::OUT | OpenMode::TRUNCATE).unwrap();
        f.write(b"abc").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 16];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_seek_past_end_creates_gap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sparse.bin");

        let mut f = BinaryFile::open(&path, OpenMode::OUT | OpenMode::TRUNCATE).unwrap();
        f.seek(SeekFrom::Start(4096)).unwrap();
        f.write(b"tail").unwrap();
        assert_eq!(f.len().unwrap(), 4100);

        // The gap reads back as zeros.
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0xffu8; 8];
        f.read(&mut buf).unwrap();
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn test_double_close_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("close.bin");

        let mut f = BinaryFile::open(&path, OpenMode::OUT).unwrap();
        f.close().unwrap();
        f.close().unwrap();
        assert!(!f.is_open());
    }

    #[test]
    fn test_operations_after_close_fail_not_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notopen.bin");

        let mut f = BinaryFile::open(&path, OpenMode::OUT).unwrap();
        f.close().unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(f.read(&mut buf), Err(TreeError::NotOpen)));
        assert!(matches!(f.write(b"x"), Err(TreeError::NotOpen)));
        assert!(matches!(f.seek(SeekFrom::Start(0)), Err(TreeError::NotOpen)));
    }

    #[test]
    fn test_open_missing_read_only_fails_with_io() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.bin");

        match BinaryFile::open(&path, OpenMode::IN) {
            Err(TreeError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected Io error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_exclusive_lock_blocks_second_handle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locked.bin");

        let mut first = BinaryFile::open(&path, OpenMode::OUT).unwrap();
        first.lock(true).unwrap();

        let mut second = BinaryFile::open(&path, OpenMode::OUT).unwrap();
        assert!(matches!(second.lock(true), Err(TreeError::LockFailed { .. })));

        // Released with the handle.
        first.close().unwrap();
        second.lock(true).unwrap();
    }
}
