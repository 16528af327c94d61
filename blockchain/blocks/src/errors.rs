// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

#[derive(Debug, PartialEq, Error)]
pub enum Error {
    /// Tipset contains no blocks
    #[error("No blocks for tipset")]
    NoBlocks,
    /// Tipset is not valid
    #[error("Invalid tipset: {0}")]
    InvalidTipset(String),
}
