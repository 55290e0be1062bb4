#[cfg(test)]
mod tests;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A totally ordered index key.
pub type Key = i64;

/// Logical identifier for a page within a single page store's file.
/// Always non-negative; the absence of a page ("no parent", "no child")
/// is expressed as `Option<PageId>` at call sites rather than folding a
/// sentinel value into this type.
/// Examples:
/// - `let root = PageId(0);`
/// - `let sibling = PageId(7);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Address of a record slot inside the record heap: `(page, offset)`.
/// Ordered lexicographically by page then offset.
/// Examples:
/// - `let addr = Address::new(PageId(3), 0);`
/// - `let addr = Address::new(PageId(3), 24);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    pub page: PageId,
    pub offset: u32,
}

impl Address {
    pub fn new(page: PageId, offset: u32) -> Self {
        Address { page, offset }
    }
}

/// Domain result of a structural B-tree operation. Travels as a plain
/// return value, never as a raised error — see [`DbError`] for the fatal
/// kinds that do get raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    AlreadyExists,
    DoesNotExist,
}

/// Canonical error type shared across the page store and buffer pool.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("page {page} out of range (page count = {page_count})")]
    OutOfRange { page: u32, page_count: u32 },
    #[error("buffer of length {actual} does not match page size {expected}")]
    InvalidSize { expected: usize, actual: usize },
    #[error("attempted to read freed page {page}")]
    ReadFreed { page: u32 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for a `BTreeIndex`. `D` and `BLOCKING_FACTOR` are
/// compile-time const generics on the engine itself, not settable here;
/// this only carries the two backing file paths and the two cache sizes a
/// caller picks once at construction.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder()
///     .node_file("nodes.db")
///     .record_file("records.db")
///     .node_cache_pages(5)
///     .record_cache_pages(5)
///     .build();
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct Config {
    #[builder(into)]
    pub node_file: PathBuf,
    #[builder(into)]
    pub record_file: PathBuf,
    #[builder(default = 5)]
    pub node_cache_pages: usize,
    #[builder(default = 5)]
    pub record_cache_pages: usize,
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Address, Config, DbError, DbResult, Key, PageId, Status};
}
