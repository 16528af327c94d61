// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use cid::Cid;
use serde::de::{self, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::BytesKey;

/// Inline bucket of key-value pairs whose hashes share the trie path down to
/// the bucket's level.
pub(crate) type Leaf = BTreeMap<BytesKey, ByteBuf>;

/// A single occupied position in a node's sparse item array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Item {
    /// Loaded child node, owned inline until the next flush.
    Node(Box<Node>),
    /// Unloaded child node, fetched from the block store on demand.
    Link(Cid),
    /// Leaf bucket.
    Leaf(Leaf),
}

/// Interior trie node: a sparse array of `2^bit_width` items, keyed by one
/// slice of the key hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Node {
    pub(crate) bit_width: u32,
    pub(crate) items: BTreeMap<u32, Item>,
}

impl Node {
    pub fn new(bit_width: u32) -> Self {
        Node {
            bit_width,
            items: BTreeMap::new(),
        }
    }
}

fn bitmap_len(bit_width: u32) -> usize {
    ((1usize << bit_width) + 7) / 8
}

// Nodes are encoded as `(bit_width, bitmap, items)` where the bitmap marks
// the populated indices, msb of the first byte first, and items follow in
// index order. Inline child nodes must have been flushed to links before a
// node is encoded.
impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut bitmap = vec![0u8; bitmap_len(self.bit_width)];
        for &index in self.items.keys() {
            bitmap[index as usize / 8] |= 0x80 >> (index % 8);
        }
        let items: Vec<&Item> = self.items.values().collect();
        (self.bit_width, serde_bytes::Bytes::new(&bitmap), items).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (bit_width, bitmap, items): (u32, ByteBuf, Vec<Item>) =
            Deserialize::deserialize(deserializer)?;
        if bit_width == 0 || bit_width > 8 {
            return Err(de::Error::custom("unsupported bit width"));
        }
        if bitmap.len() != bitmap_len(bit_width) {
            return Err(de::Error::custom("bitmap length does not match bit width"));
        }
        let mut indices = Vec::with_capacity(items.len());
        for index in 0..(1u32 << bit_width) {
            if bitmap[index as usize / 8] & (0x80 >> (index % 8)) != 0 {
                indices.push(index);
            }
        }
        if indices.len() != items.len() {
            return Err(de::Error::custom("bitmap does not match item count"));
        }
        Ok(Node {
            bit_width,
            items: indices.into_iter().zip(items).collect(),
        })
    }
}

#[derive(Serialize)]
struct ItemSer<'a> {
    #[serde(rename = "l", skip_serializing_if = "Option::is_none")]
    link: Option<&'a Cid>,
    #[serde(rename = "v", skip_serializing_if = "Option::is_none")]
    leaf: Option<&'a Leaf>,
}

#[derive(Deserialize)]
struct ItemDe {
    #[serde(rename = "l", default)]
    link: Option<Cid>,
    #[serde(rename = "v", default)]
    leaf: Option<Leaf>,
}

impl Serialize for Item {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Item::Node(_) => Err(ser::Error::custom("expected cid, found inline node")),
            Item::Link(cid) => ItemSer {
                link: Some(cid),
                leaf: None,
            }
            .serialize(serializer),
            Item::Leaf(leaf) => ItemSer {
                link: None,
                leaf: Some(leaf),
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = ItemDe::deserialize(deserializer)?;
        match (repr.link, repr.leaf) {
            (Some(cid), None) => Ok(Item::Link(cid)),
            (None, Some(leaf)) => Ok(Item::Leaf(leaf)),
            _ => Err(de::Error::custom("item must be either a link or a leaf")),
        }
    }
}
