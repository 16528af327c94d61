// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod errors;
mod tipset;

pub use errors::Error;
pub use tipset::{Height, Tipset, TipsetHash, TipsetKeys};
