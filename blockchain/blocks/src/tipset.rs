// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use cid::Cid;
use encoding::blake2b_256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::Error;

/// Chain height of a tipset.
pub type Height = u64;

/// Opaque 32-byte digest identifying a tipset. The default (empty) value
/// means "no tipset" and is used where a parent does not exist.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TipsetHash(#[serde(with = "serde_bytes")] Vec<u8>);

impl TipsetHash {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for TipsetHash {
    fn from(digest: [u8; 32]) -> Self {
        TipsetHash(digest.to_vec())
    }
}

impl fmt::Display for TipsetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for TipsetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TipsetHash({})", hex::encode(&self.0))
    }
}

/// A set of CIDs forming a unique key for a Tipset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Ord, PartialOrd)]
pub struct TipsetKeys {
    pub cids: Vec<Cid>,
}

impl TipsetKeys {
    pub fn new(cids: Vec<Cid>) -> Self {
        Self { cids }
    }

    /// Returns tipset header cids
    pub fn cids(&self) -> &[Cid] {
        &self.cids
    }

    pub fn is_empty(&self) -> bool {
        self.cids.is_empty()
    }

    /// Deterministic digest of the key: blake2b-256 over the concatenated
    /// member cid bytes.
    pub fn hash(&self) -> TipsetHash {
        let mut ingest = Vec::new();
        for cid in &self.cids {
            ingest.extend_from_slice(&cid.to_bytes());
        }
        TipsetHash::from(blake2b_256(&ingest))
    }
}

impl Serialize for TipsetKeys {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.cids.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TipsetKeys {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let cids: Vec<Cid> = Deserialize::deserialize(deserializer)?;
        Ok(TipsetKeys { cids })
    }
}

impl encoding::Cbor for TipsetKeys {}

/// An immutable set of blocks at the same height with the same parent set,
/// reduced to what the chain index tracks: its key, its parents' key and
/// its height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tipset {
    key: TipsetKeys,
    parents: TipsetKeys,
    height: Height,
}

impl Tipset {
    /// Builds a new Tipset. A valid tipset references at least one block,
    /// and every tipset above the genesis height has parents.
    pub fn new(key: TipsetKeys, parents: TipsetKeys, height: Height) -> Result<Self, Error> {
        if key.is_empty() {
            return Err(Error::NoBlocks);
        }
        if height > 0 && parents.is_empty() {
            return Err(Error::InvalidTipset(
                "non-genesis tipset without parents".to_string(),
            ));
        }
        Ok(Self {
            key,
            parents,
            height,
        })
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn key(&self) -> &TipsetKeys {
        &self.key
    }

    pub fn parents(&self) -> &TipsetKeys {
        &self.parents
    }

    /// Digest identifying this tipset.
    pub fn hash(&self) -> TipsetHash {
        self.key.hash()
    }

    /// Digest identifying the parent tipset, empty for the genesis tipset.
    pub fn parent_hash(&self) -> TipsetHash {
        if self.parents.is_empty() {
            TipsetHash::default()
        } else {
            self.parents.hash()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multihash::{Code, MultihashDigest};

    fn template_key(data: &[u8]) -> Cid {
        Cid::new_v1(0x71, Code::Blake2b256.digest(data))
    }

    fn keys(names: &[&[u8]]) -> TipsetKeys {
        TipsetKeys::new(names.iter().map(|n| template_key(n)).collect())
    }

    #[test]
    fn empty_key_is_rejected() {
        assert_eq!(
            Tipset::new(TipsetKeys::default(), TipsetKeys::default(), 0),
            Err(Error::NoBlocks)
        );
    }

    #[test]
    fn missing_parents_are_rejected() {
        let err = Tipset::new(keys(&[b"a"]), TipsetKeys::default(), 1);
        assert!(matches!(err, Err(Error::InvalidTipset(_))));
    }

    #[test]
    fn key_hash_is_deterministic() {
        let a = keys(&[b"one", b"two"]);
        let b = keys(&[b"one", b"two"]);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), keys(&[b"two", b"one"]).hash());
        assert!(!a.hash().is_empty());
    }

    #[test]
    fn genesis_parent_hash_is_empty() {
        let genesis = Tipset::new(keys(&[b"gen"]), TipsetKeys::default(), 0).unwrap();
        assert!(genesis.parent_hash().is_empty());

        let child = Tipset::new(keys(&[b"child"]), genesis.key().clone(), 1).unwrap();
        assert_eq!(child.parent_hash(), genesis.hash());
    }
}
