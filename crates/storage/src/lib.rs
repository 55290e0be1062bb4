use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use common::{Address, DbError, DbResult, PageId};

/// A file viewed as an array of equal-size pages, plus free-list
/// bookkeeping for both whole pages and, for the record store, individual
/// record slots. Free sets are in-memory only and reset on every fresh
/// process, matching the non-goal of crash durability: the backing file is
/// truncated on construction so page count and free sets always start from
/// a consistent zero state.
#[derive(Debug)]
pub struct PageStore {
    file: File,
    page_size: usize,
    page_count: u32,
    free_pages: BTreeSet<u32>,
    free_slots: BTreeSet<Address>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl PageStore {
    /// Opens `path`, truncating any existing contents, for pages of
    /// exactly `page_size` bytes.
    pub fn create(path: &Path, page_size: usize) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            page_size,
            page_count: 0,
            free_pages: BTreeSet::new(),
            free_slots: BTreeSet::new(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// If the free-pages set is non-empty, reuses its smallest member
    /// (an arbitrary but deterministic-per-run choice); otherwise grows the
    /// file by one page. Does not write any bytes.
    pub fn allocate_page(&mut self) -> PageId {
        if let Some(&reused) = self.free_pages.iter().next() {
            self.free_pages.remove(&reused);
            return PageId(reused);
        }
        let id = self.page_count;
        self.page_count += 1;
        PageId(id)
    }

    pub fn write_page(&mut self, page: PageId, buf: &[u8]) -> DbResult<()> {
        self.check_range(page)?;
        if buf.len() != self.page_size {
            return Err(DbError::InvalidSize {
                expected: self.page_size,
                actual: buf.len(),
            });
        }
        self.file
            .seek(SeekFrom::Start(page.as_u32() as u64 * self.page_size as u64))?;
        self.file.write_all(buf)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn read_page(&mut self, page: PageId) -> DbResult<Vec<u8>> {
        self.check_range(page)?;
        if self.free_pages.contains(&page.as_u32()) {
            return Err(DbError::ReadFreed { page: page.as_u32() });
        }
        let mut buf = vec![0u8; self.page_size];
        self.file
            .seek(SeekFrom::Start(page.as_u32() as u64 * self.page_size as u64))?;
        self.file.read_exact(&mut buf)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(buf)
    }

    /// Marks `page` free for reuse. Does not touch the file contents.
    pub fn remove_page(&mut self, page: PageId) {
        self.free_pages.insert(page.as_u32());
    }

    /// Registers a record slot as available for reuse by the heap.
    pub fn add_free_slot(&mut self, addr: Address) {
        self.free_slots.insert(addr);
    }

    /// Returns and forgets one known-free slot, if any.
    pub fn take_free_slot(&mut self) -> Option<Address> {
        let addr = *self.free_slots.iter().next()?;
        self.free_slots.remove(&addr);
        Some(addr)
    }

    fn check_range(&self, page: PageId) -> DbResult<()> {
        if page.as_u32() >= self.page_count {
            return Err(DbError::OutOfRange {
                page: page.as_u32(),
                page_count: self.page_count,
            });
        }
        Ok(())
    }
}
