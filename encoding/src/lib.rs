// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod cbor;
mod errors;
mod hash;

pub use self::cbor::*;
pub use self::errors::*;
pub use self::hash::*;
