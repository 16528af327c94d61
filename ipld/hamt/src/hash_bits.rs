// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::BytesKey;
use sha2::{Digest, Sha256};

const BYTE_BITS: usize = 8;

/// Computes the trie descent path of a key: the SHA-256 digest of the key
/// bytes, sliced into consecutive `bit_width`-bit indices, most significant
/// bit first. Trailing digest bits that do not fill a whole index are
/// ignored.
///
/// `suffix` requests only the tail of the path: `Some(n)` yields the last
/// `n - 1` indices, matching the remaining depth when entries of an
/// overflowing leaf are re-inserted one level deeper.
pub(crate) fn key_to_indices(key: &BytesKey, bit_width: u32, suffix: Option<usize>) -> Vec<u32> {
    let digest = Sha256::digest(&key.0);
    let bit_width = bit_width as usize;

    let mut max_bits = BYTE_BITS * digest.len();
    max_bits -= max_bits % bit_width;

    let mut offset = match suffix {
        Some(n) => max_bits - (n - 1) * bit_width,
        None => 0,
    };

    let mut indices = Vec::with_capacity((max_bits - offset) / bit_width);
    while offset + bit_width <= max_bits {
        let mut index = 0u32;
        for _ in 0..bit_width {
            index <<= 1;
            index |= u32::from((digest[offset / BYTE_BITS] >> (BYTE_BITS - 1 - offset % BYTE_BITS)) & 1);
            offset += 1;
        }
        indices.push(index);
    }
    indices
}
