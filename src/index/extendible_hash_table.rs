use std::{
    collections::hash_map::DefaultHasher,
    hash::{BuildHasher, BuildHasherDefault, Hash},
    marker::PhantomData,
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{
    buffer::buffer_pool_manager::BufferPoolManager,
    common::{PageId, Result, StorageError},
    storage::page::{
        hash_table_bucket_page::HashTableBucketPage,
        hash_table_directory_page::HashTableDirectoryPage,
        page_guard::{ReadPageGuard, WritePageGuard},
        storable::Storable,
    },
};

/// Deterministic SipHash; directory indices derived from it survive process
/// restarts, which a randomly seeded hasher would break.
pub type DefaultKeyHasher = BuildHasherDefault<DefaultHasher>;

/// A disk-backed extendible hash table built on the buffer pool: one
/// directory page fanning out to bucket pages, growing by bucket splits and
/// shrinking by merges.
///
/// Keys and values are fixed-width codecs bound at this surface, together
/// with the hasher. Lookups hold read guards; mutating operations serialize
/// on a table-level latch and hold write guards, directory before bucket.
pub struct DiskExtendibleHashTable<K, V, S = DefaultKeyHasher> {
    bpm: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    hash_builder: S,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> DiskExtendibleHashTable<K, V>
where
    K: Storable + PartialEq + Hash,
    V: Storable + PartialEq,
{
    pub fn new(bpm: Arc<BufferPoolManager>) -> Result<Self> {
        Self::with_hasher(bpm, DefaultKeyHasher::default())
    }
}

impl<K, V, S> DiskExtendibleHashTable<K, V, S>
where
    K: Storable + PartialEq + Hash,
    V: Storable + PartialEq,
    S: BuildHasher,
{
    /// Create an empty table: a directory of global depth zero pointing at
    /// one empty bucket. Both pages come from `bpm`.
    pub fn with_hasher(bpm: Arc<BufferPoolManager>, hash_builder: S) -> Result<Self> {
        let mut directory_guard = bpm
            .new_page_guarded()?
            .ok_or(StorageError::PoolExhausted)?
            .upgrade_write();
        let directory_page_id = directory_guard.page_id();

        let bucket_guard = bpm
            .new_page_guarded()?
            .ok_or(StorageError::PoolExhausted)?
            .upgrade_write();
        let bucket_page_id = bucket_guard.page_id();

        // A zeroed page is already a valid empty bucket; attaching the views
        // validates both layouts against the page size.
        HashTableBucketPage::<_, K, V>::attach(bucket_guard.data())?;
        {
            let mut directory = HashTableDirectoryPage::attach(directory_guard.data_mut())?;
            directory.set_bucket_page_id(0, bucket_page_id);
            directory.set_local_depth(0, 0);
        }

        debug!(directory_page_id, bucket_page_id, "created hash table");
        Ok(Self {
            bpm,
            directory_page_id,
            table_latch: RwLock::new(()),
            hash_builder,
            _marker: PhantomData,
        })
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    /// All values stored under the key.
    pub fn get_value(&self, key: &K) -> Result<Vec<V>> {
        let _table = self.table_latch.read();

        let directory_guard = self.fetch_read(self.directory_page_id)?;
        let directory = HashTableDirectoryPage::attach(directory_guard.data())?;
        let index = self.directory_index(key, directory.global_depth_mask());
        let bucket_page_id = directory.bucket_page_id(index);

        let bucket_guard = self.fetch_read(bucket_page_id)?;
        let bucket = HashTableBucketPage::<_, K, V>::attach(bucket_guard.data())?;
        Ok(bucket.get_value(key))
    }

    /// Insert the pair. Returns false when the exact pair is already
    /// present. A full bucket splits, doubling the directory as needed; a
    /// directory at maximum depth fails with `DirectoryFull`.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        let _table = self.table_latch.write();

        loop {
            let mut directory_guard = self.fetch_write(self.directory_page_id)?;
            let (index, bucket_page_id) = {
                let directory = HashTableDirectoryPage::attach(directory_guard.data())?;
                let index = self.directory_index(key, directory.global_depth_mask());
                (index, directory.bucket_page_id(index))
            };

            let mut bucket_guard = self.fetch_write(bucket_page_id)?;
            {
                let mut bucket =
                    HashTableBucketPage::<_, K, V>::attach(bucket_guard.data_mut())?;
                if bucket.insert(key, value) {
                    return Ok(true);
                }
                if bucket.get_value(key).iter().any(|existing| existing == value) {
                    return Ok(false);
                }
            }

            // Bucket is full: split it and take another run at the insert
            // with fresh guards.
            self.split_bucket(&mut directory_guard, &mut bucket_guard, index)?;
        }
    }

    /// Remove the exact pair. An emptied bucket merges with its split image
    /// when their depths line up, shrinking the directory where possible.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool> {
        let _table = self.table_latch.write();

        let mut directory_guard = self.fetch_write(self.directory_page_id)?;
        let (index, bucket_page_id) = {
            let directory = HashTableDirectoryPage::attach(directory_guard.data())?;
            let index = self.directory_index(key, directory.global_depth_mask());
            (index, directory.bucket_page_id(index))
        };

        let mut bucket_guard = self.fetch_write(bucket_page_id)?;
        let (removed, emptied) = {
            let mut bucket = HashTableBucketPage::<_, K, V>::attach(bucket_guard.data_mut())?;
            let removed = bucket.remove(key, value);
            (removed, removed && bucket.is_empty())
        };

        if emptied {
            // The merge deletes the empty page, which requires its pin gone.
            drop(bucket_guard);
            self.merge_bucket(&mut directory_guard, index)?;
        }
        Ok(removed)
    }

    pub fn global_depth(&self) -> Result<u32> {
        let _table = self.table_latch.read();
        let directory_guard = self.fetch_read(self.directory_page_id)?;
        let directory = HashTableDirectoryPage::attach(directory_guard.data())?;
        Ok(directory.global_depth())
    }

    pub fn verify_integrity(&self) -> Result<bool> {
        let _table = self.table_latch.read();
        let directory_guard = self.fetch_read(self.directory_page_id)?;
        let directory = HashTableDirectoryPage::attach(directory_guard.data())?;
        Ok(directory.verify_integrity())
    }

    fn hash(&self, key: &K) -> u32 {
        // Downcast the 64-bit hash; the directory never needs more bits.
        self.hash_builder.hash_one(key) as u32
    }

    fn directory_index(&self, key: &K, mask: u32) -> usize {
        (self.hash(key) & mask) as usize
    }

    fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.bpm
            .fetch_page_read(page_id)?
            .ok_or(StorageError::PoolExhausted)
    }

    fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.bpm
            .fetch_page_write(page_id)?
            .ok_or(StorageError::PoolExhausted)
    }

    // Split the full bucket behind directory entry `index`: grow the
    // directory if the bucket already uses the full depth, allocate the
    // split image, repoint every entry on the high-bit side, and deal the
    // pairs out by their hash bit.
    fn split_bucket(
        &self,
        directory_guard: &mut WritePageGuard,
        bucket_guard: &mut WritePageGuard,
        index: usize,
    ) -> Result<()> {
        {
            let mut directory = HashTableDirectoryPage::attach(directory_guard.data_mut())?;
            if directory.local_depth(index) == directory.global_depth() {
                directory.incr_global_depth()?;
            }
        }

        let mut new_bucket_guard = self
            .bpm
            .new_page_guarded()?
            .ok_or(StorageError::PoolExhausted)?
            .upgrade_write();
        let new_page_id = new_bucket_guard.page_id();

        let high_bit = {
            let mut directory = HashTableDirectoryPage::attach(directory_guard.data_mut())?;
            let local_depth = directory.local_depth(index);
            let new_depth = local_depth + 1;
            let old_page_id = directory.bucket_page_id(index);
            let high_bit = 1usize << local_depth;

            for i in 0..directory.size() {
                if directory.bucket_page_id(i) == old_page_id {
                    directory.set_local_depth(i, new_depth);
                    if i & high_bit != 0 {
                        directory.set_bucket_page_id(i, new_page_id);
                    }
                }
            }

            info!(
                old_page_id,
                new_page_id,
                depth = new_depth,
                "split hash bucket"
            );
            high_bit
        };

        let entries = {
            let bucket = HashTableBucketPage::<_, K, V>::attach(bucket_guard.data())?;
            bucket.entries()
        };

        let mut old_bucket = HashTableBucketPage::<_, K, V>::attach(bucket_guard.data_mut())?;
        old_bucket.clear();
        let mut new_bucket =
            HashTableBucketPage::<_, K, V>::attach(new_bucket_guard.data_mut())?;

        for (key, value) in entries {
            let target = if self.hash(&key) as usize & high_bit != 0 {
                &mut new_bucket
            } else {
                &mut old_bucket
            };
            let inserted = target.insert(&key, &value);
            debug_assert!(inserted, "redistribution cannot overflow a bucket");
        }
        Ok(())
    }

    // Fold the emptied bucket at `index` into its split image when both
    // sides sit at the same local depth, then shrink the directory while no
    // entry needs the full width. The empty page must already be unpinned.
    fn merge_bucket(&self, directory_guard: &mut WritePageGuard, index: usize) -> Result<()> {
        let empty_page_id = {
            let mut directory = HashTableDirectoryPage::attach(directory_guard.data_mut())?;

            let local_depth = directory.local_depth(index);
            if local_depth == 0 {
                return Ok(());
            }
            let image_index = directory.split_image_index(index);
            if directory.local_depth(image_index) != local_depth {
                return Ok(());
            }
            let empty_page_id = directory.bucket_page_id(index);
            let image_page_id = directory.bucket_page_id(image_index);
            if empty_page_id == image_page_id {
                return Ok(());
            }

            for i in 0..directory.size() {
                let page_id = directory.bucket_page_id(i);
                if page_id == empty_page_id || page_id == image_page_id {
                    directory.set_bucket_page_id(i, image_page_id);
                    directory.set_local_depth(i, local_depth - 1);
                }
            }
            while directory.can_shrink() {
                directory.decr_global_depth();
            }

            info!(empty_page_id, image_page_id, "merged hash bucket");
            empty_page_id
        };

        if !self.bpm.delete_page(empty_page_id)? {
            warn!(
                page_id = empty_page_id,
                "merged bucket page still pinned, leaking it to the pool"
            );
        }
        Ok(())
    }
}
