//! The record heap API: a thin layer over the records buffer pool that
//! (de)serializes a caller-supplied record type and tracks its address.
//! This stands in for the "record schema" collaborator the tree is generic
//! over.

use buffer::BufferPool;
use common::{Address, DbResult, Key};

/// Contract a caller's record type must satisfy to live in the heap. The
/// core does not constrain anything about the type's internal layout
/// beyond a fixed, compile-time `SIZE` and a byte-level codec.
pub trait Record: Sized {
    const SIZE: usize;

    fn key(&self) -> Key;
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Self;
}

/// Serializes `record`, writes it to a fresh or reused slot in the records
/// pool, and returns the `(key, address)` pair a node entry needs.
pub fn save_record<T: Record>(pool: &mut BufferPool, record: &T) -> DbResult<(Key, Address)> {
    let addr = pool.write_new_record(&record.serialize())?;
    Ok((record.key(), addr))
}

/// Frees the slot at `addr` for reuse. Does not zero the bytes.
pub fn remove_record(pool: &mut BufferPool, addr: Address) {
    pool.remove_record(addr);
}
