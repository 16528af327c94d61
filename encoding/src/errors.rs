// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Error type for encoding and decoding data
#[derive(Debug, PartialEq, Error)]
pub enum Error {
    #[error("Could not encode in CBOR: {0}")]
    Marshalling(String),
    #[error("Could not decode from CBOR: {0}")]
    Unmarshalling(String),
}
