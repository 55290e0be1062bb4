//! Write-back LRU buffer pool sitting between the B-tree engine and a
//! [`PageStore`].
//!
//! - LRU-bounded in-memory page cache, one pool per store
//! - Write-back: only an evicted (or explicitly flushed) dirty page reaches
//!   the store
//! - Record-granular helpers for the records pool (`write_record`,
//!   `read_record`) layered on top of the same page cache
//!
//! # Example
//!
//! ```no_run
//! use buffer::BufferPool;
//! use storage::PageStore;
//! use std::path::Path;
//!
//! let store = PageStore::create(Path::new("/tmp/nodes.db"), 128).unwrap();
//! let mut pool = BufferPool::new(store, 5, None);
//!
//! let page = pool.write_new_page(vec![0u8; 128]).unwrap();
//! let data = pool.read_page(page).unwrap();
//! pool.flush().unwrap();
//! ```


use std::num::NonZeroUsize;

use common::{Address, DbResult, PageId};
use lru::LruCache;
use storage::PageStore;

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    dirty: bool,
}

/// Bounded LRU cache over page-indexed buffers with write-back, plus
/// record-granular read/write for pools backing a record heap.
///
/// `record_size` is only consulted by `write_record`/`write_new_record`/
/// `read_record`; a node-side pool is constructed with `None` and never
/// calls them.
#[derive(Debug)]
pub struct BufferPool {
    store: PageStore,
    cache: LruCache<PageId, Entry>,
    record_size: Option<usize>,
}

impl BufferPool {
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(store: PageStore, capacity: usize, record_size: Option<usize>) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            store,
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
            record_size,
        }
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    fn evict_if_needed(&mut self) -> DbResult<()> {
        if self.cache.len() < self.cache.cap().get() {
            return Ok(());
        }
        if let Some((page, entry)) = self.cache.pop_lru()
            && entry.dirty
        {
            self.store.write_page(page, &entry.data)?;
        }
        Ok(())
    }

    pub fn write_page(&mut self, page: PageId, buf: Vec<u8>) -> DbResult<()> {
        if let Some(entry) = self.cache.get_mut(&page) {
            entry.data = buf;
            entry.dirty = true;
            return Ok(());
        }
        self.evict_if_needed()?;
        self.cache.put(page, Entry { data: buf, dirty: true });
        Ok(())
    }

    pub fn write_new_page(&mut self, buf: Vec<u8>) -> DbResult<PageId> {
        let page = self.store.allocate_page();
        self.write_page(page, buf)?;
        Ok(page)
    }

    pub fn read_page(&mut self, page: PageId) -> DbResult<Vec<u8>> {
        if let Some(entry) = self.cache.get(&page) {
            return Ok(entry.data.clone());
        }
        let data = self.store.read_page(page)?;
        self.evict_if_needed()?;
        self.cache.put(page, Entry { data: data.clone(), dirty: false });
        Ok(data)
    }

    /// Like `read_page` but never perturbs LRU order and never populates
    /// the cache on a miss. Reserved for diagnostic/traversal paths (tree
    /// height, fill ratio) that should not evict useful entries.
    pub fn peek_page(&mut self, page: PageId) -> DbResult<Vec<u8>> {
        if let Some(entry) = self.cache.peek(&page) {
            return Ok(entry.data.clone());
        }
        self.store.read_page(page)
    }

    /// Drops `page` from the cache without flushing, then frees it in the
    /// store.
    pub fn remove_page(&mut self, page: PageId) {
        self.cache.pop(&page);
        self.store.remove_page(page);
    }

    fn fault_in_mut(&mut self, page: PageId) -> DbResult<&mut Entry> {
        if !self.cache.contains(&page) {
            let data = self.store.read_page(page)?;
            self.evict_if_needed()?;
            self.cache.put(page, Entry { data, dirty: false });
        }
        Ok(self.cache.get_mut(&page).expect("just made resident"))
    }

    pub fn write_record(&mut self, addr: Address, buf: &[u8]) -> DbResult<()> {
        let entry = self.fault_in_mut(addr.page)?;
        let start = addr.offset as usize;
        entry.data[start..start + buf.len()].copy_from_slice(buf);
        entry.dirty = true;
        Ok(())
    }

    /// Acquires a free slot from the store if one is known; otherwise
    /// allocates a fresh record page, places `buf` at offset 0, and seeds
    /// the remaining `blocking_factor - 1` slots of that page as free, in
    /// ascending offset order.
    pub fn write_new_record(&mut self, buf: &[u8]) -> DbResult<Address> {
        let record_size = self
            .record_size
            .expect("write_new_record requires a record-sized pool");

        if let Some(addr) = self.store.take_free_slot() {
            self.write_record(addr, buf)?;
            return Ok(addr);
        }

        let page = self.store.allocate_page();
        let page_size = self.store.page_size();
        let mut data = vec![0u8; page_size];
        data[..buf.len()].copy_from_slice(buf);
        self.write_page(page, data)?;

        let blocking_factor = page_size / record_size;
        for slot in 1..blocking_factor {
            self.store.add_free_slot(Address::new(page, (slot * record_size) as u32));
        }

        Ok(Address::new(page, 0))
    }

    pub fn read_record(&mut self, addr: Address) -> DbResult<Vec<u8>> {
        let record_size = self
            .record_size
            .expect("read_record requires a record-sized pool");
        let data = self.read_page(addr.page)?;
        let start = addr.offset as usize;
        Ok(data[start..start + record_size].to_vec())
    }

    /// Registers `addr` as free. Bytes are left undefined; callers must not
    /// read the slot again until it is reallocated.
    pub fn remove_record(&mut self, addr: Address) {
        self.store.add_free_slot(addr);
    }

    /// Force-writes every dirty entry through to the store. Never called
    /// implicitly; the pool otherwise only writes back on eviction.
    pub fn flush(&mut self) -> DbResult<()> {
        for (&page, entry) in self.cache.iter_mut() {
            if entry.dirty {
                self.store.write_page(page, &entry.data)?;
                entry.dirty = false;
            }
        }
        Ok(())
    }
}
