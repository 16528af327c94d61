// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Block store error
#[derive(Debug, Error)]
pub enum Error {
    /// Error originating from the underlying database
    #[error(transparent)]
    Db(#[from] db::Error),
    /// Error encoding or decoding block data
    #[error(transparent)]
    Encoding(#[from] encoding::Error),
}
