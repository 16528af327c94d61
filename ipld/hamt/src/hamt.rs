// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::btree_map::Entry;

use cid::Cid;
use ipld_blockstore::BlockStore;
use serde_bytes::ByteBuf;

use crate::hash_bits::key_to_indices;
use crate::node::{Item, Leaf, Node};
use crate::{BytesKey, Error, DEFAULT_BIT_WIDTH, DEFAULT_LEAF_MAX};

/// Implementation of the HAMT data structure for IPLD.
///
/// The trie owns an in-memory working copy of its nodes; children referenced
/// by Cid are fetched from the block store the first time an operation
/// descends through them and stay inline until [`Hamt::flush`] writes them
/// back out.
///
/// # Examples
///
/// ```
/// use ipld_hamt::Hamt;
///
/// let store = db::MemoryDB::default();
///
/// let mut map = Hamt::new(&store);
/// map.set("lang".into(), b"rust".to_vec()).unwrap();
/// assert_eq!(map.get(&"lang".into()).unwrap(), b"rust".to_vec());
/// let cid = map.flush().unwrap();
///
/// let mut restored = Hamt::load(&cid, &store);
/// assert_eq!(restored.get(&"lang".into()).unwrap(), b"rust".to_vec());
/// ```
#[derive(Debug)]
pub struct Hamt<'a, BS> {
    root: Item,
    store: &'a BS,
    bit_width: u32,
    leaf_max: usize,
}

impl<BS> PartialEq for Hamt<'_, BS> {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && self.bit_width == other.bit_width
            && self.leaf_max == other.leaf_max
    }
}

impl<'a, BS> Hamt<'a, BS>
where
    BS: BlockStore,
{
    pub fn new(store: &'a BS) -> Self {
        Self::new_with_config(store, DEFAULT_BIT_WIDTH, DEFAULT_LEAF_MAX)
    }

    pub fn new_with_bit_width(store: &'a BS, bit_width: u32) -> Self {
        Self::new_with_config(store, bit_width, DEFAULT_LEAF_MAX)
    }

    /// Constructs an empty trie with explicit geometry. Both parameters are
    /// part of the on-wire format: every serialized node records the bit
    /// width it was written with.
    pub fn new_with_config(store: &'a BS, bit_width: u32, leaf_max: usize) -> Self {
        assert!(
            (1..=8).contains(&bit_width),
            "bit width must be between 1 and 8"
        );
        assert!(leaf_max > 0, "leaf capacity must be positive");
        Hamt {
            root: Item::Node(Box::new(Node::new(bit_width))),
            store,
            bit_width,
            leaf_max,
        }
    }

    /// Lazily opens a trie from a root link. The root block is fetched from
    /// the store on the first operation, which is where a missing or corrupt
    /// root surfaces.
    pub fn load(cid: &Cid, store: &'a BS) -> Self {
        Self::load_with_config(cid, store, DEFAULT_BIT_WIDTH, DEFAULT_LEAF_MAX)
    }

    pub fn load_with_bit_width(cid: &Cid, store: &'a BS, bit_width: u32) -> Self {
        Self::load_with_config(cid, store, bit_width, DEFAULT_LEAF_MAX)
    }

    pub fn load_with_config(cid: &Cid, store: &'a BS, bit_width: u32, leaf_max: usize) -> Self {
        assert!(
            (1..=8).contains(&bit_width),
            "bit width must be between 1 and 8"
        );
        assert!(leaf_max > 0, "leaf capacity must be positive");
        Hamt {
            root: Item::Link(*cid),
            store,
            bit_width,
            leaf_max,
        }
    }

    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    pub fn leaf_max(&self) -> usize {
        self.leaf_max
    }

    /// Returns the value stored under `key`, or [`Error::NotFound`].
    pub fn get(&mut self, key: &BytesKey) -> Result<Vec<u8>, Error> {
        let indices = key_to_indices(key, self.bit_width, None);
        let (store, bit_width) = (self.store, self.bit_width);
        let root = self.root_node()?;
        get_in(store, bit_width, root, &indices, key)
    }

    /// Inserts a key-value pair into the trie, overwriting any previous
    /// value under the same key. Either the whole mutation applies,
    /// including a leaf promotion when the target bucket overflows, or an
    /// error is returned and the trie is unchanged.
    pub fn set(&mut self, key: BytesKey, value: Vec<u8>) -> Result<(), Error> {
        let indices = key_to_indices(&key, self.bit_width, None);
        let (store, bit_width, leaf_max) = (self.store, self.bit_width, self.leaf_max);
        let root = self.root_node()?;
        set_in(store, bit_width, leaf_max, root, &indices, key, ByteBuf::from(value))
    }

    /// Removes the value stored under `key`, compacting interior nodes that
    /// the removal leaves collapsible. Returns [`Error::NotFound`] if the
    /// key is absent.
    pub fn delete(&mut self, key: &BytesKey) -> Result<(), Error> {
        let indices = key_to_indices(key, self.bit_width, None);
        let (store, bit_width, leaf_max) = (self.store, self.bit_width, self.leaf_max);
        let root = self.root_node()?;
        remove_in(store, bit_width, leaf_max, root, &indices, key)
    }

    pub fn contains_key(&mut self, key: &BytesKey) -> Result<bool, Error> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Writes every inline node out to the block store, bottom-up, leaving
    /// the whole trie represented by the returned root Cid. Flushing an
    /// already flushed trie performs no writes and returns the same Cid.
    pub fn flush(&mut self) -> Result<Cid, Error> {
        flush_item(self.store, &mut self.root)?;
        match &self.root {
            Item::Link(cid) => Ok(*cid),
            _ => Err(Error::ExpectedCid),
        }
    }

    /// Iterates over all key-value pairs in the trie, in hash-path order,
    /// loading referenced nodes on demand.
    pub fn for_each<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&BytesKey, &[u8]) -> Result<(), Error>,
    {
        let (store, bit_width) = (self.store, self.bit_width);
        visit_item(store, bit_width, &mut self.root, &mut f)
    }

    /// Returns `true` when the in-memory root holds no entries. An unloaded
    /// root link is reported as non-empty.
    pub fn is_empty(&self) -> bool {
        match &self.root {
            Item::Node(node) => node.items.is_empty(),
            _ => false,
        }
    }

    fn root_node(&mut self) -> Result<&mut Node, Error> {
        load_item(self.store, self.bit_width, &mut self.root)?;
        match &mut self.root {
            Item::Node(node) => Ok(node),
            _ => unreachable!("the root is always a node"),
        }
    }
}

/// Replaces a link item with the node it references, loaded from the store.
fn load_item<BS: BlockStore>(store: &BS, bit_width: u32, item: &mut Item) -> Result<(), Error> {
    if let Item::Link(cid) = item {
        let cid = *cid;
        let node: Node = store.get(&cid)?.ok_or(Error::MissingBlock(cid))?;
        if node.bit_width != bit_width {
            return Err(Error::BitWidthMismatch(node.bit_width, bit_width));
        }
        *item = Item::Node(Box::new(node));
    }
    Ok(())
}

fn get_in<BS: BlockStore>(
    store: &BS,
    bit_width: u32,
    node: &mut Node,
    indices: &[u32],
    key: &BytesKey,
) -> Result<Vec<u8>, Error> {
    let Some(&index) = indices.first() else {
        return Err(Error::MaxDepth);
    };
    let Some(item) = node.items.get_mut(&index) else {
        return Err(Error::NotFound);
    };
    load_item(store, bit_width, item)?;
    match item {
        Item::Node(child) => get_in(store, bit_width, child, &indices[1..], key),
        Item::Leaf(leaf) => leaf
            .get(key)
            .map(|value| value.clone().into_vec())
            .ok_or(Error::NotFound),
        Item::Link(_) => unreachable!("links are loaded before inspection"),
    }
}

fn set_in<BS: BlockStore>(
    store: &BS,
    bit_width: u32,
    leaf_max: usize,
    node: &mut Node,
    indices: &[u32],
    key: BytesKey,
    value: ByteBuf,
) -> Result<(), Error> {
    let Some(&index) = indices.first() else {
        return Err(Error::MaxDepth);
    };
    match node.items.entry(index) {
        Entry::Vacant(entry) => {
            let mut leaf = Leaf::new();
            leaf.insert(key, value);
            entry.insert(Item::Leaf(leaf));
            Ok(())
        }
        Entry::Occupied(entry) => {
            let item = entry.into_mut();
            load_item(store, bit_width, item)?;
            match item {
                Item::Node(child) => {
                    set_in(store, bit_width, leaf_max, child, &indices[1..], key, value)
                }
                Item::Leaf(leaf) => {
                    if leaf.contains_key(&key) || leaf.len() < leaf_max {
                        leaf.insert(key, value);
                        return Ok(());
                    }
                    // Bucket overflow: build the replacement node fully
                    // before touching the leaf, re-hashing every entry at
                    // the deeper offset.
                    let mut child = Node::new(bit_width);
                    set_in(store, bit_width, leaf_max, &mut child, &indices[1..], key, value)?;
                    for (k, v) in leaf.clone() {
                        let suffix = key_to_indices(&k, bit_width, Some(indices.len()));
                        set_in(store, bit_width, leaf_max, &mut child, &suffix, k, v)?;
                    }
                    *item = Item::Node(Box::new(child));
                    Ok(())
                }
                Item::Link(_) => unreachable!("links are loaded before inspection"),
            }
        }
    }
}

fn remove_in<BS: BlockStore>(
    store: &BS,
    bit_width: u32,
    leaf_max: usize,
    node: &mut Node,
    indices: &[u32],
    key: &BytesKey,
) -> Result<(), Error> {
    let Some(&index) = indices.first() else {
        return Err(Error::MaxDepth);
    };
    let remove_item = {
        let Some(item) = node.items.get_mut(&index) else {
            return Err(Error::NotFound);
        };
        load_item(store, bit_width, item)?;
        match item {
            Item::Node(child) => {
                remove_in(store, bit_width, leaf_max, child, &indices[1..], key)?;
                clean_shard(item, leaf_max);
                false
            }
            Item::Leaf(leaf) => {
                if !leaf.contains_key(key) {
                    return Err(Error::NotFound);
                }
                if leaf.len() == 1 {
                    true
                } else {
                    leaf.remove(key);
                    false
                }
            }
            Item::Link(_) => unreachable!("links are loaded before inspection"),
        }
    };
    if remove_item {
        node.items.remove(&index);
    }
    Ok(())
}

/// Compacts an interior node after a removal underneath it: a node left
/// with a single leaf item is replaced by that leaf, and a node whose items
/// are all leaves totalling at most `leaf_max` entries is merged into one
/// leaf at this level.
fn clean_shard(item: &mut Item, leaf_max: usize) {
    let Item::Node(node) = item else { return };
    let replacement = if node.items.len() == 1 {
        match node.items.values().next() {
            Some(Item::Leaf(_)) => node.items.pop_first().map(|(_, child)| child),
            _ => None,
        }
    } else if node.items.len() <= leaf_max {
        let mut merged = Leaf::new();
        let mut collapsible = true;
        'collect: for child in node.items.values() {
            let Item::Leaf(leaf) = child else {
                collapsible = false;
                break;
            };
            for (k, v) in leaf {
                merged.insert(k.clone(), v.clone());
                if merged.len() > leaf_max {
                    collapsible = false;
                    break 'collect;
                }
            }
        }
        collapsible.then(|| Item::Leaf(merged))
    } else {
        None
    };
    if let Some(replacement) = replacement {
        *item = replacement;
    }
}

fn flush_item<BS: BlockStore>(store: &BS, item: &mut Item) -> Result<(), Error> {
    if let Item::Node(node) = item {
        for child in node.items.values_mut() {
            flush_item(store, child)?;
        }
        let cid = store.put(&**node)?;
        *item = Item::Link(cid);
    }
    Ok(())
}

fn visit_item<BS: BlockStore, F>(
    store: &BS,
    bit_width: u32,
    item: &mut Item,
    f: &mut F,
) -> Result<(), Error>
where
    F: FnMut(&BytesKey, &[u8]) -> Result<(), Error>,
{
    load_item(store, bit_width, item)?;
    match item {
        Item::Node(node) => {
            for child in node.items.values_mut() {
                visit_item(store, bit_width, child, f)?;
            }
            Ok(())
        }
        Item::Leaf(leaf) => {
            for (k, v) in leaf.iter() {
                f(k, v)?;
            }
            Ok(())
        }
        Item::Link(_) => unreachable!("links are loaded before inspection"),
    }
}
