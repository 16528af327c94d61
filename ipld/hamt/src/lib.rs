// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod error;
mod hamt;
mod hash_bits;
mod node;

pub use self::error::Error;
pub use self::hamt::Hamt;

use serde::{Deserialize, Serialize};

/// Default number of hash bits consumed per level of the trie.
pub const DEFAULT_BIT_WIDTH: u32 = 5;

/// Default number of entries an inline leaf bucket may hold before it is
/// promoted to a child node.
pub const DEFAULT_LEAF_MAX: usize = 3;

/// Key type for the trie, wrapped to be serialized as a byte string.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BytesKey(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl AsRef<[u8]> for BytesKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for BytesKey {
    fn from(bz: Vec<u8>) -> Self {
        BytesKey(bz)
    }
}

impl From<&[u8]> for BytesKey {
    fn from(s: &[u8]) -> Self {
        BytesKey(s.to_vec())
    }
}

impl From<&str> for BytesKey {
    fn from(s: &str) -> Self {
        BytesKey(s.as_bytes().to_vec())
    }
}
