use std::hash::{BuildHasherDefault, Hasher};

use anyhow::Result;

use crate::common::ReplacerPolicy;
use crate::index::extendible_hash_table::DiskExtendibleHashTable;
use crate::storage::page::storable::Rid;
use crate::tests::make_pool;

fn wide_key(i: u32) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..4].copy_from_slice(&i.to_le_bytes());
    key
}

#[test]
fn insert_get_remove_round_trip() -> Result<()> {
    let (bpm, _) = make_pool(16, ReplacerPolicy::LruK);
    let table = DiskExtendibleHashTable::<i32, i32>::new(bpm)?;

    for i in 0..100 {
        assert!(table.insert(&i, &(i * 10))?);
    }
    // Exact duplicates are rejected.
    assert!(!table.insert(&5, &50)?);

    for i in 0..100 {
        assert_eq!(table.get_value(&i)?, vec![i * 10]);
    }
    assert_eq!(table.get_value(&100)?, Vec::<i32>::new());

    for i in 0..100 {
        assert!(table.remove(&i, &(i * 10))?);
    }
    assert!(!table.remove(&0, &0)?);
    for i in 0..100 {
        assert!(table.get_value(&i)?.is_empty());
    }
    assert!(table.verify_integrity()?);
    Ok(())
}

#[test]
fn one_key_can_hold_many_values() -> Result<()> {
    let (bpm, _) = make_pool(16, ReplacerPolicy::LruK);
    let table = DiskExtendibleHashTable::<i32, Rid>::new(bpm)?;

    let first = Rid::new(3, 1);
    let second = Rid::new(3, 2);
    assert!(table.insert(&7, &first)?);
    assert!(table.insert(&7, &second)?);

    let values = table.get_value(&7)?;
    assert_eq!(values.len(), 2);
    assert!(values.contains(&first));
    assert!(values.contains(&second));

    assert!(table.remove(&7, &first)?);
    assert_eq!(table.get_value(&7)?, vec![second]);
    Ok(())
}

#[test]
fn overflow_splits_and_keeps_everything_reachable() -> Result<()> {
    let (bpm, _) = make_pool(32, ReplacerPolicy::LruK);
    let table = DiskExtendibleHashTable::<[u8; 64], u32>::new(bpm.clone())?;

    // A bucket holds 60 of these pairs; 200 inserts force splits.
    for i in 0..200 {
        assert!(table.insert(&wide_key(i), &i)?);
    }
    assert!(table.global_depth()? >= 1);
    assert!(table.verify_integrity()?);

    for i in 0..200 {
        assert_eq!(table.get_value(&wide_key(i))?, vec![i]);
    }

    // Every table operation pairs its fetches with unpins.
    for (_, frame_id) in bpm.page_table_snapshot() {
        assert_eq!(bpm.frame_pin_count(frame_id), 0);
    }
    Ok(())
}

#[test]
fn removals_merge_and_shrink() -> Result<()> {
    let (bpm, _) = make_pool(32, ReplacerPolicy::LruK);
    let table = DiskExtendibleHashTable::<[u8; 64], u32>::new(bpm)?;

    for i in 0..200 {
        assert!(table.insert(&wide_key(i), &i)?);
    }
    let grown_depth = table.global_depth()?;
    assert!(grown_depth >= 1);

    for i in 0..200 {
        assert!(table.remove(&wide_key(i), &i)?);
    }
    for i in 0..200 {
        assert!(table.get_value(&wide_key(i))?.is_empty());
    }
    assert!(table.global_depth()? <= grown_depth);
    assert!(table.verify_integrity()?);
    Ok(())
}

// FNV-1a, a hasher deliberately unlike the default SipHash.
struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }
}

impl Hasher for Fnv1a {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
}

#[test]
fn caller_supplied_hasher_drives_the_table() -> Result<()> {
    let (bpm, _) = make_pool(32, ReplacerPolicy::LruK);
    let table = DiskExtendibleHashTable::<[u8; 64], u32, BuildHasherDefault<Fnv1a>>::with_hasher(
        bpm,
        BuildHasherDefault::default(),
    )?;

    // Enough pairs to split buckets under the caller's hash function.
    for i in 0..200 {
        assert!(table.insert(&wide_key(i), &i)?);
    }
    assert!(!table.insert(&wide_key(7), &7)?);
    assert!(table.global_depth()? >= 1);
    assert!(table.verify_integrity()?);

    for i in 0..200 {
        assert_eq!(table.get_value(&wide_key(i))?, vec![i]);
    }

    for i in 0..200 {
        assert!(table.remove(&wide_key(i), &i)?);
    }
    for i in 0..200 {
        assert!(table.get_value(&wide_key(i))?.is_empty());
    }
    assert!(table.verify_integrity()?);
    Ok(())
}

#[test]
fn survives_a_small_pool() -> Result<()> {
    // Pool of five frames: directory and buckets constantly evicted and
    // reloaded underneath the table.
    let (bpm, _) = make_pool(5, ReplacerPolicy::LruK);
    let table = DiskExtendibleHashTable::<[u8; 64], u32>::new(bpm)?;

    for i in 0..300 {
        assert!(table.insert(&wide_key(i), &i)?);
    }
    for i in 0..300 {
        assert_eq!(table.get_value(&wide_key(i))?, vec![i]);
    }
    assert!(table.verify_integrity()?);
    Ok(())
}
