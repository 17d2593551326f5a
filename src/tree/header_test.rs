// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the header page codec.

#[cfg(test)]
mod tests {
    use crate::codec::order::Endianness;
    use crate::error::TreeError;
    use crate::tree::header::{FileHeader, HEADER_SIZE, MAJOR_VERSION};
    use std::path::Path;

    fn sample(endianness: Endianness) -> FileHeader {
        let mut h = FileHeader::new(endianness, 4096, 0x3, 4, 8, 0xdead_beef, "pagetree_map");
        h.element_count = 123_456_789;
        h.root_page_id = 7;
        h.first_page_id = 2;
        h.last_page_id = 9;
        h.page_count = 10;
        h.free_page_list_head_id = 5;
        h.root_level = 2;
        h.set_user_str("unit test");
        h
    }

    #[test]
    fn test_round_trip_big_endian() {
        let h = sample(Endianness::Big);
        let mut buf = [0u8; HEADER_SIZE];
        h.encode(&mut buf);

        let d = FileHeader::decode(&buf, Path::new("x")).unwrap();
        assert_eq!(d.endianness, Endianness::Big);
        assert_eq!(d.element_count, 123_456_789);
        assert_eq!(d.page_size, 4096);
        assert_eq!(d.flags, 0x3);
        assert_eq!(d.root_page_id, 7);
        assert_eq!(d.first_page_id, 2);
        assert_eq!(d.last_page_id, 9);
        assert_eq!(d.page_count, 10);
        assert_eq!(d.free_page_list_head_id, 5);
        assert_eq!(d.root_level, 2);
        assert_eq!(d.key_size, 4);
        assert_eq!(d.mapped_size, 8);
        assert_eq!(d.signature, 0xdead_beef);
        assert_eq!(d.splash_str(), "pagetree_map");
        assert_eq!(d.user_str(), "unit test");
    }

    #[test]
    fn test_round_trip_little_endian() {
        let h = sample(Endianness::Little);
        let mut buf = [0u8; HEADER_SIZE];
        h.encode(&mut buf);

        let d = FileHeader::decode(&buf, Path::new("x")).unwrap();
        assert_eq!(d.endianness, Endianness::Little);
        assert_eq!(d.element_count, 123_456_789);
        assert_eq!(d.root_level, 2);
        assert_eq!(d.splash_str(), "pagetree_map");
    }

    #[test]
    fn test_encodings_differ_between_orders() {
        let mut big = [0u8; HEADER_SIZE];
        let mut little = [0u8; HEADER_SIZE];
        sample(Endianness::Big).encode(&mut big);
        sample(Endianness::Little).encode(&mut little);
        // Same logical header, different byte images.
        assert_ne!(big, little);
    }

    #[test]
    fn test_bad_marker_rejected() {
        let mut buf = [0u8; HEADER_SIZE];
        sample(Endianness::Big).encode(&mut buf);
        buf[0] = 0xaa;
        assert!(matches!(
            FileHeader::decode(&buf, Path::new("x")),
            Err(TreeError::CorruptHeader { .. })
        ));
    }

    #[test]
    fn test_bad_endianness_byte_rejected() {
        let mut buf = [0u8; HEADER_SIZE];
        sample(Endianness::Big).encode(&mut buf);
        buf[4] = 9;
        assert!(matches!(
            FileHeader::decode(&buf, Path::new("x")),
            Err(TreeError::CorruptHeader { .. })
        ));
    }

    #[test]
    fn test_future_major_version_rejected() {
        let mut buf = [0u8; HEADER_SIZE];
        sample(Endianness::Big).encode(&mut buf);
        buf[5] = MAJOR_VERSION + 1;
        assert!(matches!(
            FileHeader::decode(&buf, Path::new("x")),
            Err(TreeError::CorruptHeader { .. })
        ));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let buf = [0u8; 64];
        assert!(matches!(
            FileHeader::decode(&buf, Path::new("x")),
            Err(TreeError::CorruptHeader { .. })
        ));
    }
}
