use byteorder::{ByteOrder, LittleEndian};

use crate::common::{PageId, Result, StorageError};

/// Maximum number of directory entries on one page, hence a maximum global
/// depth of `MAX_GLOBAL_DEPTH`.
pub const DIRECTORY_ARRAY_SIZE: usize = 256;
pub const MAX_GLOBAL_DEPTH: u32 = 8;

const GLOBAL_DEPTH_OFFSET: usize = 0;
const LOCAL_DEPTHS_OFFSET: usize = 4;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;
const DIRECTORY_PAGE_SIZE: usize = BUCKET_PAGE_IDS_OFFSET + DIRECTORY_ARRAY_SIZE * 8;

/// Typed view over the directory page of an extendible hash table: a global
/// depth, and per-entry local depths and bucket page ids. Works over any
/// page-sized byte buffer; a freshly zeroed page is a valid directory of
/// global depth zero.
pub struct HashTableDirectoryPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HashTableDirectoryPage<B> {
    /// Attach the view, validating that the buffer can hold the layout.
    pub fn attach(data: B) -> Result<Self> {
        let len = data.as_ref().len();
        if len < DIRECTORY_PAGE_SIZE {
            return Err(StorageError::PageLayout(format!(
                "directory needs {DIRECTORY_PAGE_SIZE} bytes, page has {len}"
            )));
        }
        Ok(Self { data })
    }

    pub fn global_depth(&self) -> u32 {
        LittleEndian::read_u32(&self.data.as_ref()[GLOBAL_DEPTH_OFFSET..])
    }

    /// Low-bit mask selecting a directory index from a hash.
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth()) - 1
    }

    /// Number of live directory entries.
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    pub fn local_depth(&self, index: usize) -> u32 {
        u32::from(self.data.as_ref()[LOCAL_DEPTHS_OFFSET + index])
    }

    pub fn local_depth_mask(&self, index: usize) -> u32 {
        (1u32 << self.local_depth(index)) - 1
    }

    pub fn bucket_page_id(&self, index: usize) -> PageId {
        LittleEndian::read_i64(&self.data.as_ref()[BUCKET_PAGE_IDS_OFFSET + index * 8..])
    }

    /// The entry this one splits from or merges into: the index with the
    /// highest local-depth bit flipped.
    pub fn split_image_index(&self, index: usize) -> usize {
        let depth = self.local_depth(index);
        debug_assert!(depth > 0, "depth-zero entry has no split image");
        index ^ (1 << (depth - 1))
    }

    /// The directory can halve when no entry uses its full depth.
    pub fn can_shrink(&self) -> bool {
        let depth = self.global_depth();
        depth > 0 && (0..self.size()).all(|i| self.local_depth(i) < depth)
    }

    /// Structural soundness: every entry's local depth is bounded by the
    /// global depth, and all entries sharing a bucket agree on its depth and
    /// count exactly `2^(global - local)` references.
    pub fn verify_integrity(&self) -> bool {
        let size = self.size();
        let global = self.global_depth();
        for i in 0..size {
            let depth = self.local_depth(i);
            if depth > global {
                return false;
            }
            let page_id = self.bucket_page_id(i);
            let references = (0..size)
                .filter(|&j| self.bucket_page_id(j) == page_id)
                .count();
            if references != (1usize << (global - depth)) {
                return false;
            }
            if (0..size)
                .any(|j| self.bucket_page_id(j) == page_id && self.local_depth(j) != depth)
            {
                return false;
            }
        }
        true
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HashTableDirectoryPage<B> {
    pub fn set_local_depth(&mut self, index: usize, depth: u32) {
        debug_assert!(depth <= MAX_GLOBAL_DEPTH);
        self.data.as_mut()[LOCAL_DEPTHS_OFFSET + index] = depth as u8;
    }

    pub fn set_bucket_page_id(&mut self, index: usize, page_id: PageId) {
        LittleEndian::write_i64(
            &mut self.data.as_mut()[BUCKET_PAGE_IDS_OFFSET + index * 8..],
            page_id,
        );
    }

    /// Double the directory, mirroring the existing half onto the new one.
    pub fn incr_global_depth(&mut self) -> Result<()> {
        let depth = self.global_depth();
        if depth >= MAX_GLOBAL_DEPTH {
            return Err(StorageError::DirectoryFull);
        }
        let old_size = self.size();
        for i in old_size..old_size * 2 {
            let source = i - old_size;
            let page_id = self.bucket_page_id(source);
            let local = self.local_depth(source);
            self.set_bucket_page_id(i, page_id);
            self.set_local_depth(i, local);
        }
        LittleEndian::write_u32(&mut self.data.as_mut()[GLOBAL_DEPTH_OFFSET..], depth + 1);
        Ok(())
    }

    pub fn decr_global_depth(&mut self) {
        let depth = self.global_depth();
        debug_assert!(depth > 0, "directory cannot shrink below one entry");
        LittleEndian::write_u32(&mut self.data.as_mut()[GLOBAL_DEPTH_OFFSET..], depth - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PAGE_SIZE;

    #[test]
    fn zeroed_page_is_depth_zero() {
        let data = vec![0u8; PAGE_SIZE];
        let directory = HashTableDirectoryPage::attach(&data[..]).unwrap();
        assert_eq!(directory.global_depth(), 0);
        assert_eq!(directory.size(), 1);
        assert_eq!(directory.global_depth_mask(), 0);
    }

    #[test]
    fn grow_copies_entries() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut directory = HashTableDirectoryPage::attach(&mut data[..]).unwrap();
        directory.set_bucket_page_id(0, 7);
        directory.set_local_depth(0, 0);

        directory.incr_global_depth().unwrap();
        assert_eq!(directory.size(), 2);
        assert_eq!(directory.bucket_page_id(1), 7);
        assert_eq!(directory.local_depth(1), 0);
        assert!(directory.verify_integrity());
        assert!(directory.can_shrink());
    }

    #[test]
    fn refuses_to_grow_past_capacity() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut directory = HashTableDirectoryPage::attach(&mut data[..]).unwrap();
        for _ in 0..MAX_GLOBAL_DEPTH {
            directory.incr_global_depth().unwrap();
        }
        assert!(matches!(
            directory.incr_global_depth(),
            Err(StorageError::DirectoryFull)
        ));
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        let data = vec![0u8; 16];
        assert!(HashTableDirectoryPage::attach(&data[..]).is_err());
    }
}
