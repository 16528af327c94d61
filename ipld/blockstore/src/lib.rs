// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod errors;

pub use errors::Error;

use cid::multihash::{Code, MultihashDigest};
use cid::Cid;
use db::Store;
use encoding::{from_slice, to_vec};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Multicodec identifier of DAG-CBOR encoded blocks.
pub const DAG_CBOR: u64 = 0x71;

/// Extension of a KV [`Store`] for inserting and retrieving ipld data keyed
/// by Cid.
pub trait BlockStore: Store {
    /// Get typed object from block store by Cid.
    fn get<T>(&self, cid: &Cid) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        match self.read(cid.to_bytes())? {
            Some(bz) => Ok(Some(from_slice(&bz)?)),
            None => Ok(None),
        }
    }

    /// Put an object in the block store and return the Cid identifier.
    fn put<S>(&self, obj: &S) -> Result<Cid, Error>
    where
        S: Serialize,
    {
        let bz = to_vec(obj)?;
        let cid = Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(&bz));
        self.write(cid.to_bytes(), &bz)?;
        Ok(cid)
    }

    /// Returns `Ok(true)` if a block is present by Cid.
    fn contains(&self, cid: &Cid) -> Result<bool, Error> {
        Ok(self.exists(cid.to_bytes())?)
    }
}

impl<T: Store> BlockStore for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use db::MemoryDB;

    #[test]
    fn put_get_roundtrip() {
        let store = MemoryDB::default();
        let obj = (1u64, "block".to_string());

        let cid = store.put(&obj).unwrap();
        assert!(store.contains(&cid).unwrap());
        assert_eq!(store.get::<(u64, String)>(&cid).unwrap(), Some(obj.clone()));

        // content addressed: same bytes, same cid
        assert_eq!(store.put(&obj).unwrap(), cid);
    }

    #[test]
    fn get_missing() {
        let store = MemoryDB::default();
        let cid = store.put(&1u8).unwrap();

        let empty = MemoryDB::default();
        assert_eq!(empty.get::<u8>(&cid).unwrap(), None);
        assert!(!empty.contains(&cid).unwrap());
    }
}
