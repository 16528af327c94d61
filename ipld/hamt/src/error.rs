// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use thiserror::Error;

/// HAMT Error
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization reached an inline node that was not flushed to a Cid
    #[error("Expected cid, found inline node")]
    ExpectedCid,
    /// Key was not found
    #[error("Not found")]
    NotFound,
    /// The key hash was exhausted while still inside interior nodes
    #[error("Maximum depth reached")]
    MaxDepth,
    /// A referenced node block is absent from the block store
    #[error("Missing block {0} in store")]
    MissingBlock(Cid),
    /// A loaded node block was written with a different trie geometry
    #[error("Node bit width {0} does not match trie bit width {1}")]
    BitWidthMismatch(u32, u32),
    /// Error interacting with the underlying block store
    #[error(transparent)]
    Store(#[from] ipld_blockstore::Error),
}
