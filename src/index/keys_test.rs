// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for flat key encodings.

#[cfg(test)]
mod tests {
    use crate::codec::packed::Big;
    use crate::index::keys::{decode_varint, encode_varint, FlatKey, VARINT_MAX};
    use std::ffi::CString;

    #[test]
    fn test_varint_single_byte_values() {
        let mut buf = [0u8; VARINT_MAX];
        for v in [0usize, 1, 42, 127] {
            let n = encode_varint(v, &mut buf);
            assert_eq!(n, 1);
            assert_eq!(buf[0] & 0x80, 0);
            assert_eq!(decode_varint(&buf[..n]), (v, 1));
        }
    }

    #[test]
    fn test_varint_continuation_is_high_bit_msb_first() {
        let mut buf = [0u8; VARINT_MAX];
        let n = encode_varint(300, &mut buf);
        // 300 = 2 * 128 + 44: continuation byte first, terminal byte last.
        assert_eq!(n, 2);
        assert_eq!(buf[0], 0x82);
        assert_eq!(buf[1], 44);
        assert_eq!(decode_varint(&buf[..n]), (300, 2));
    }

    #[test]
    fn test_varint_large_values_round_trip() {
        let mut buf = [0u8; VARINT_MAX];
        for v in [128usize, 16_384, 1 << 20, usize::MAX >> 1, usize::MAX] {
            let n = encode_varint(v, &mut buf);
            assert!(n <= VARINT_MAX);
            let (decoded, consumed) = decode_varint(&buf[..n]);
            assert_eq!(decoded, v);
            assert_eq!(consumed, n);
        }
    }

    #[test]
    fn test_fixed_types_use_raw_image() {
        let key = Big(0x0102_0304u32);
        assert_eq!(key.flat_size(), 4);
        let mut buf = [0u8; 4];
        key.write_flat(&mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(<Big<u32>>::flat_len(&buf), 4);
        assert_eq!(<Big<u32>>::read_flat(&buf), key);
    }

    #[test]
    fn test_string_length_prefixed() {
        let key = "hello".to_string();
        assert_eq!(key.flat_size(), 6);
        let mut buf = vec![0u8; key.flat_size()];
        key.write_flat(&mut buf);
        assert_eq!(buf, b"\x05hello");
        assert_eq!(String::flat_len(&buf), 6);
        assert_eq!(String::read_flat(&buf), "hello");
    }

    #[test]
    fn test_long_string_takes_two_prefix_bytes() {
        let key = "x".repeat(200);
        assert_eq!(key.flat_size(), 2 + 200);
        let mut buf = vec![0u8; key.flat_size()];
        key.write_flat(&mut buf);
        assert_eq!(String::flat_len(&buf), 202);
        assert_eq!(String::read_flat(&buf), key);
    }

    #[test]
    fn test_empty_string() {
        let key = String::new();
        assert_eq!(key.flat_size(), 1);
        let mut buf = [0xffu8; 1];
        key.write_flat(&mut buf);
        assert_eq!(buf, [0]);
        assert_eq!(String::flat_len(&buf), 1);
        assert_eq!(String::read_flat(&buf), "");
    }

    #[test]
    fn test_cstring_keeps_terminator() {
        let key = CString::new("abc").unwrap();
        assert_eq!(key.flat_size(), 4);
        let mut buf = vec![0xffu8; 4];
        key.write_flat(&mut buf);
        assert_eq!(buf, b"abc\0");
        assert_eq!(CString::flat_len(&buf), 4);
        assert_eq!(CString::read_flat(&buf), key);
    }

    #[test]
    fn test_flat_len_reads_only_its_element() {
        // Two elements back to back; flat_len of the first ignores the
        // second.
        let a = "one".to_string();
        let b = "twofer".to_string();
        let mut buf = vec![0u8; a.flat_size() + b.flat_size()];
        a.write_flat(&mut buf);
        let alen = a.flat_size();
        b.write_flat(&mut buf[alen..]);

        assert_eq!(String::flat_len(&buf), alen);
        assert_eq!(String::read_flat(&buf[..alen]), "one");
        assert_eq!(String::flat_len(&buf[alen..]), b.flat_size());
    }
}
