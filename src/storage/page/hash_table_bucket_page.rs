use std::marker::PhantomData;

use crate::common::{Result, StorageError};
use crate::storage::page::storable::Storable;

/// Typed view over a bucket page of an extendible hash table. The layout is
/// an occupancy bitmap (slot has ever held a pair), a readable bitmap (slot
/// currently holds one), and a packed array of key/value pairs:
///
/// ```text
/// [occupied: ceil(cap/8)] [readable: ceil(cap/8)] [pairs: cap * (K + V)]
/// ```
///
/// Capacity is computed from the pair width so that bitmaps and array
/// together fill at most one page; a freshly zeroed page is a valid empty
/// bucket.
pub struct HashTableBucketPage<B, K, V> {
    data: B,
    _marker: PhantomData<(K, V)>,
}

/// Slots available in one bucket page for the given key/value widths.
pub const fn bucket_capacity<K: Storable, V: Storable>(page_size: usize) -> usize {
    // Two bitmap bits plus the pair itself per slot.
    page_size * 8 / ((K::SIZE + V::SIZE) * 8 + 2)
}

const fn bitmap_bytes(capacity: usize) -> usize {
    (capacity + 7) / 8
}

impl<B, K, V> HashTableBucketPage<B, K, V>
where
    B: AsRef<[u8]>,
    K: Storable + PartialEq,
    V: Storable + PartialEq,
{
    /// Attach the view, validating that the computed layout fits the buffer.
    pub fn attach(data: B) -> Result<Self> {
        let capacity = bucket_capacity::<K, V>(data.as_ref().len());
        let needed = 2 * bitmap_bytes(capacity) + capacity * (K::SIZE + V::SIZE);
        let len = data.as_ref().len();
        if capacity == 0 || needed > len {
            return Err(StorageError::PageLayout(format!(
                "bucket of {capacity} pairs needs {needed} bytes, page has {len}"
            )));
        }
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    pub fn capacity(&self) -> usize {
        bucket_capacity::<K, V>(self.data.as_ref().len())
    }

    fn readable_offset(&self) -> usize {
        bitmap_bytes(self.capacity())
    }

    fn pairs_offset(&self) -> usize {
        2 * bitmap_bytes(self.capacity())
    }

    fn pair_offset(&self, slot: usize) -> usize {
        self.pairs_offset() + slot * (K::SIZE + V::SIZE)
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        self.data.as_ref()[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        let offset = self.readable_offset();
        self.data.as_ref()[offset + slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn key_at(&self, slot: usize) -> K {
        let offset = self.pair_offset(slot);
        K::read_from(&self.data.as_ref()[offset..offset + K::SIZE])
    }

    pub fn value_at(&self, slot: usize) -> V {
        let offset = self.pair_offset(slot) + K::SIZE;
        V::read_from(&self.data.as_ref()[offset..offset + V::SIZE])
    }

    /// All values stored under the key. Occupied slots form a prefix, so
    /// the scan stops at the first slot that never held a pair.
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let mut values = Vec::new();
        for slot in 0..self.capacity() {
            if !self.is_occupied(slot) {
                break;
            }
            if self.is_readable(slot) && self.key_at(slot) == *key {
                values.push(self.value_at(slot));
            }
        }
        values
    }

    pub fn num_readable(&self) -> usize {
        (0..self.capacity()).filter(|&s| self.is_readable(s)).count()
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    /// Live pairs, in slot order.
    pub fn entries(&self) -> Vec<(K, V)> {
        (0..self.capacity())
            .filter(|&s| self.is_readable(s))
            .map(|s| (self.key_at(s), self.value_at(s)))
            .collect()
    }
}

impl<B, K, V> HashTableBucketPage<B, K, V>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
    K: Storable + PartialEq,
    V: Storable + PartialEq,
{
    fn set_occupied(&mut self, slot: usize) {
        self.data.as_mut()[slot / 8] |= 1 << (slot % 8);
    }

    fn set_readable(&mut self, slot: usize) {
        let offset = self.readable_offset();
        self.data.as_mut()[offset + slot / 8] |= 1 << (slot % 8);
    }

    fn set_unreadable(&mut self, slot: usize) {
        let offset = self.readable_offset();
        self.data.as_mut()[offset + slot / 8] &= !(1 << (slot % 8));
    }

    /// Insert the pair, reusing tombstoned slots. Returns false when the
    /// exact pair is already present or the bucket is full.
    pub fn insert(&mut self, key: &K, value: &V) -> bool {
        let capacity = self.capacity();
        let mut vacant = capacity;
        for slot in 0..capacity {
            if self.is_readable(slot) {
                if self.key_at(slot) == *key && self.value_at(slot) == *value {
                    return false;
                }
            } else if vacant == capacity {
                vacant = slot;
            }
        }
        if vacant == capacity {
            return false;
        }

        let offset = self.pair_offset(vacant);
        key.write_to(&mut self.data.as_mut()[offset..offset + K::SIZE]);
        value.write_to(&mut self.data.as_mut()[offset + K::SIZE..offset + K::SIZE + V::SIZE]);
        self.set_occupied(vacant);
        self.set_readable(vacant);
        true
    }

    /// Remove the exact pair. Returns false when it is not present.
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        for slot in 0..self.capacity() {
            if self.is_readable(slot)
                && self.key_at(slot) == *key
                && self.value_at(slot) == *value
            {
                self.remove_at(slot);
                return true;
            }
        }
        false
    }

    pub fn remove_at(&mut self, slot: usize) {
        self.set_unreadable(slot);
    }

    /// Reset to an empty bucket; used when redistributing on a split.
    pub fn clear(&mut self) {
        let pairs = self.pairs_offset();
        self.data.as_mut()[..pairs].fill(0);
    }
}
