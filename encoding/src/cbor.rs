// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::errors::Error;
use serde::{de::DeserializeOwned, Serialize};

/// Serializes an object into canonical CBOR bytes.
pub fn to_vec<S>(obj: &S) -> Result<Vec<u8>, Error>
where
    S: Serialize,
{
    serde_cbor::to_vec(obj).map_err(|e| Error::Marshalling(e.to_string()))
}

/// Deserializes CBOR bytes into an object.
pub fn from_slice<T>(bz: &[u8]) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    serde_cbor::from_slice(bz).map_err(|e| Error::Unmarshalling(e.to_string()))
}

/// Opt-in trait for types with a canonical CBOR representation.
pub trait Cbor: Serialize + DeserializeOwned {
    fn marshal_cbor(&self) -> Result<Vec<u8>, Error> {
        to_vec(self)
    }

    fn unmarshal_cbor(bz: &[u8]) -> Result<Self, Error> {
        from_slice(bz)
    }
}
