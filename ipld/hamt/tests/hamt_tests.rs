// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::{BTreeMap, HashMap};

use ipld_hamt::{BytesKey, Error, Hamt};
use sha2::{Digest, Sha256};

fn key(s: impl AsRef<str>) -> BytesKey {
    BytesKey::from(s.as_ref().as_bytes().to_vec())
}

/// First trie index of a key, used to build colliding fixtures.
fn first_index(k: &BytesKey, bit_width: u32) -> u32 {
    let digest = Sha256::digest(&k.0);
    u32::from(digest[0] >> (8 - bit_width))
}

/// Finds `count` keys whose descent paths collide at depth 0.
fn colliding_keys(bit_width: u32, count: usize) -> Vec<BytesKey> {
    let mut buckets: HashMap<u32, Vec<BytesKey>> = HashMap::new();
    for i in 0u32.. {
        let k = key(format!("key-{i}"));
        let bucket = buckets.entry(first_index(&k, bit_width)).or_default();
        bucket.push(k);
        if bucket.len() == count {
            return bucket.clone();
        }
    }
    unreachable!()
}

#[test]
fn test_basics() {
    let store = db::MemoryDB::default();
    let mut hamt = Hamt::new(&store);

    hamt.set(key("1"), b"world".to_vec()).unwrap();
    assert_eq!(hamt.get(&key("1")).unwrap(), b"world".to_vec());

    hamt.set(key("1"), b"world2".to_vec()).unwrap();
    assert_eq!(hamt.get(&key("1")).unwrap(), b"world2".to_vec());

    assert!(hamt.contains_key(&key("1")).unwrap());
    assert!(!hamt.contains_key(&key("2")).unwrap());
    assert!(matches!(hamt.get(&key("2")), Err(Error::NotFound)));
}

#[test]
fn test_load() {
    let store = db::MemoryDB::default();

    let mut hamt = Hamt::new(&store);
    hamt.set(key("1"), b"world".to_vec()).unwrap();
    let c = hamt.flush().unwrap();

    let mut new_hamt = Hamt::load(&c, &store);
    assert_eq!(new_hamt.get(&key("1")).unwrap(), b"world".to_vec());

    // set value in the first one
    hamt.set(key("2"), b"stuff".to_vec()).unwrap();

    // loading original hash does not see the unflushed entry
    let mut new_hamt = Hamt::load(&c, &store);
    assert!(matches!(new_hamt.get(&key("2")), Err(Error::NotFound)));

    // loading new hash does
    let c2 = hamt.flush().unwrap();
    let mut new_hamt = Hamt::load(&c2, &store);
    assert_eq!(new_hamt.get(&key("2")).unwrap(), b"stuff".to_vec());

    // flushing twice is stable
    assert_eq!(hamt.flush().unwrap(), c2);

    // loading from an empty store fails on first use
    let empty_store = db::MemoryDB::default();
    let mut broken = Hamt::load(&c2, &empty_store);
    assert!(matches!(
        broken.get(&key("1")),
        Err(Error::MissingBlock(_))
    ));
}

#[test]
fn delete() {
    let store = db::MemoryDB::default();
    let mut hamt = Hamt::new(&store);

    hamt.set(key("foo"), b"cat dog bear".to_vec()).unwrap();
    hamt.set(key("bar"), b"cat dog".to_vec()).unwrap();
    hamt.set(key("baz"), b"cat".to_vec()).unwrap();

    hamt.delete(&key("foo")).unwrap();
    assert!(matches!(hamt.get(&key("foo")), Err(Error::NotFound)));
    assert!(matches!(hamt.delete(&key("foo")), Err(Error::NotFound)));

    assert_eq!(hamt.get(&key("bar")).unwrap(), b"cat dog".to_vec());
    assert_eq!(hamt.get(&key("baz")).unwrap(), b"cat".to_vec());
}

#[test]
fn bucket_promotion() {
    let store = db::MemoryDB::default();
    let mut hamt = Hamt::new(&store);

    // Four keys sharing the depth-0 index overflow the bucket and push
    // every entry one level down.
    let keys = colliding_keys(hamt.bit_width(), 4);
    for (i, k) in keys.iter().enumerate() {
        hamt.set(k.clone(), vec![i as u8]).unwrap();
    }
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(hamt.get(k).unwrap(), vec![i as u8]);
    }

    // All four entries survive a store roundtrip.
    let c = hamt.flush().unwrap();
    let mut restored = Hamt::load(&c, &store);
    let mut count = 0;
    restored
        .for_each(|_, _| {
            count += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(count, 4);
}

#[test]
fn promotion_compaction_roundtrip() {
    let store = db::MemoryDB::default();
    let mut hamt = Hamt::new(&store);

    let keys = colliding_keys(hamt.bit_width(), 4);
    for k in &keys[..3] {
        hamt.set(k.clone(), b"v".to_vec()).unwrap();
    }
    let before = hamt.flush().unwrap();

    // The fourth key promotes the bucket; deleting it must compact the
    // trie back to the exact previous shape.
    hamt.set(keys[3].clone(), b"v".to_vec()).unwrap();
    hamt.delete(&keys[3]).unwrap();
    let after = hamt.flush().unwrap();

    assert_eq!(before, after);
}

#[test]
fn order_independence() {
    let store = db::MemoryDB::default();

    let mut forward = Hamt::new(&store);
    for i in 0..100u8 {
        forward.set(key(format!("{i}")), vec![i]).unwrap();
    }

    let mut backward = Hamt::new(&store);
    for i in (0..100u8).rev() {
        backward.set(key(format!("{i}")), vec![i]).unwrap();
    }

    assert_eq!(forward.flush().unwrap(), backward.flush().unwrap());
}

#[test]
fn insert_remove_identity() {
    let store = db::MemoryDB::default();

    let mut empty = Hamt::new(&store);
    let empty_cid = empty.flush().unwrap();

    let mut hamt = Hamt::new(&store);
    for i in 0..40u8 {
        hamt.set(key(format!("{i}")), vec![i]).unwrap();
    }
    // remove in a different order than inserted
    for i in (0..40u8).rev() {
        hamt.delete(&key(format!("{i}"))).unwrap();
    }

    assert!(hamt.is_empty());
    assert_eq!(hamt.flush().unwrap(), empty_cid);
}

#[test]
fn flush_preserves_reads() {
    let store = db::MemoryDB::default();
    let mut hamt = Hamt::new(&store);

    for i in 0..50u8 {
        hamt.set(key(format!("{i}")), vec![i]).unwrap();
    }
    hamt.flush().unwrap();

    for i in 0..50u8 {
        assert_eq!(hamt.get(&key(format!("{i}"))).unwrap(), vec![i]);
    }
}

#[test]
fn for_each_visits_all() {
    let store = db::MemoryDB::default();
    let mut hamt = Hamt::new(&store);

    let mut expected = BTreeMap::new();
    for i in 0..30u8 {
        let k = key(format!("{i}"));
        hamt.set(k.clone(), vec![i]).unwrap();
        expected.insert(k, vec![i]);
    }

    // partially flushed tries traverse through links as well
    hamt.flush().unwrap();

    let mut visited = BTreeMap::new();
    hamt.for_each(|k, v| {
        visited.insert(k.clone(), v.to_vec());
        Ok(())
    })
    .unwrap();
    assert_eq!(visited, expected);
}

#[test]
fn geometry_mismatch_is_rejected() {
    let store = db::MemoryDB::default();
    let mut hamt = Hamt::new_with_bit_width(&store, 5);
    hamt.set(key("1"), b"a".to_vec()).unwrap();
    let c = hamt.flush().unwrap();

    let mut reopened = Hamt::load_with_bit_width(&c, &store, 6);
    assert!(matches!(
        reopened.get(&key("1")),
        Err(Error::BitWidthMismatch(5, 6))
    ));
}

#[test]
fn custom_leaf_capacity() {
    let store = db::MemoryDB::default();
    let mut hamt = Hamt::new_with_config(&store, 5, 2);

    let keys = colliding_keys(5, 3);
    for (i, k) in keys.iter().enumerate() {
        hamt.set(k.clone(), vec![i as u8]).unwrap();
    }
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(hamt.get(k).unwrap(), vec![i as u8]);
    }

    let c = hamt.flush().unwrap();
    let mut restored = Hamt::load_with_config(&c, &store, 5, 2);
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(restored.get(k).unwrap(), vec![i as u8]);
    }
}
