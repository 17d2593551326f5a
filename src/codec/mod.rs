// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Byte-order adapters and fixed-size value codecs.
//!
//! Everything a tree file stores is a fixed-width byte image. This module
//! provides:
//! - **Order**: the byte-order trait family used for node management fields
//!   (page ids, counts, levels) and header integers, including the 24- and
//!   48-bit widths the node format relies on.
//! - **Packed**: the codec trait for keys and mapped values, with endian
//!   adapters so a key type carries its own on-disk byte order.

pub mod order;
pub mod packed;


// Re-export public API
pub use order::{BigOrder, ByteOrder, Endianness, LittleOrder, NativeOrder};
pub use packed::{Big, Little, Packed};
