//! A disk-resident ordered B-tree index of order `D` over fixed-size
//! pages, backed by a write-back [`buffer::BufferPool`] and two
//! file-backed [`storage::PageStore`]s: one for tree nodes, one for
//! packed records.
//!
//! The tree is generic over a record type implementing [`heap::Record`];
//! the core itself only ever touches that type's `key`, `SIZE`,
//! `serialize`, and `deserialize`.

mod heap;
mod node;

#[cfg(test)]
mod tests;

use std::marker::PhantomData;

use buffer::BufferPool;
use common::{Config, DbResult, Key, PageId, Status};
use node::{Node, NodeEntry};
use storage::PageStore;

pub use heap::Record;
pub use node::node_page_size;

/// The B-tree engine. `D` is the order (max `2D` entries per node, min
/// `D` for a non-root node); `BLOCKING_FACTOR` is the number of records
/// packed per record page. Both are compile-time const generics, not
/// runtime configuration, since the node codec's fixed layout depends on
/// `D` and the record page size depends on `BLOCKING_FACTOR`.
pub struct BTreeIndex<const D: usize, const BLOCKING_FACTOR: usize, T: Record> {
    root: Option<PageId>,
    nodes: BufferPool,
    records: BufferPool,
    _record: PhantomData<T>,
}

impl<const D: usize, const BLOCKING_FACTOR: usize, T: Record> BTreeIndex<D, BLOCKING_FACTOR, T> {
    /// Opens (truncating) the node and record files named in `config` and
    /// starts an empty tree. There is no "open existing" variant: free-page
    /// and free-slot bookkeeping is in-memory only and a fresh process
    /// always starts from a consistent zero state (§4.1, a stated
    /// non-goal of crash durability).
    pub fn create(config: &Config) -> DbResult<Self> {
        assert!(D >= 2, "D must be at least 2");
        assert!(BLOCKING_FACTOR >= 1, "BLOCKING_FACTOR must be at least 1");

        let node_store = PageStore::create(&config.node_file, node_page_size(D))?;
        let record_store = PageStore::create(&config.record_file, T::SIZE * BLOCKING_FACTOR)?;

        Ok(BTreeIndex {
            root: None,
            nodes: BufferPool::new(node_store, config.node_cache_pages, None),
            records: BufferPool::new(record_store, config.record_cache_pages, Some(T::SIZE)),
            _record: PhantomData,
        })
    }

    fn read_node(&mut self, page: PageId) -> DbResult<Node> {
        let bytes = self.nodes.read_page(page)?;
        Ok(node::decode_node(&bytes, D))
    }

    fn peek_node(&mut self, page: PageId) -> DbResult<Node> {
        let bytes = self.nodes.peek_page(page)?;
        Ok(node::decode_node(&bytes, D))
    }

    fn write_node(&mut self, page: PageId, node: &Node) -> DbResult<()> {
        self.nodes.write_page(page, node::encode_node(node, D))
    }

    fn allocate_node(&mut self, node: &Node) -> DbResult<PageId> {
        self.nodes.write_new_page(node::encode_node(node, D))
    }

    /// Loads `child`, sets its `parent` field to `new_parent`, and writes
    /// it back. Named after the donor prototype's `updateChildParent`:
    /// every operation that moves a child into a new parent must keep this
    /// back-reference in sync.
    fn reparent_child(&mut self, child: PageId, new_parent: PageId) -> DbResult<()> {
        let mut node = self.read_node(child)?;
        node.parent = Some(new_parent);
        self.write_node(child, &node)
    }

    /// Descends to the leaf or internal node holding `key`, returning
    /// whether it was found and the page reached.
    fn search_place(&mut self, key: Key) -> DbResult<(Status, PageId)> {
        let mut page = self.root.expect("search_place requires a non-empty tree");
        loop {
            let node = self.read_node(page)?;
            let i = node.search_place(key);
            if i > 0 && node.entries[i - 1].key == key {
                return Ok((Status::AlreadyExists, page));
            }
            if node.leaf {
                return Ok((Status::DoesNotExist, page));
            }
            page = node.children[i];
        }
    }

    /// Point lookup. `None` if the tree is empty or the key is absent.
    pub fn search(&mut self, key: Key) -> DbResult<Option<T>> {
        let Some(root) = self.root else {
            return Ok(None);
        };
        let mut page = root;
        loop {
            let node = self.read_node(page)?;
            let i = node.search_place(key);
            if i > 0 && node.entries[i - 1].key == key {
                let bytes = self.records.read_record(node.entries[i - 1].address)?;
                return Ok(Some(T::deserialize(&bytes)));
            }
            if node.leaf {
                return Ok(None);
            }
            page = node.children[i];
        }
    }

    /// Inserts `record`. Returns `AlreadyExists` without mutating the heap
    /// if its key is already present.
    pub fn insert(&mut self, record: T) -> DbResult<Status> {
        if self.root.is_none() {
            let (key, addr) = heap::save_record(&mut self.records, &record)?;
            let mut leaf = Node::new_leaf(None);
            leaf.entries.push(NodeEntry::new(key, addr));
            let page = self.allocate_node(&leaf)?;
            self.root = Some(page);
            return Ok(Status::Ok);
        }

        let (status, leaf_page) = self.search_place(record.key())?;
        if status == Status::AlreadyExists {
            return Ok(Status::AlreadyExists);
        }

        let (key, addr) = heap::save_record(&mut self.records, &record)?;
        let mut node = self.read_node(leaf_page)?;
        node.add_key(NodeEntry::new(key, addr));
        self.write_node(leaf_page, &node)?;

        self.rebalance_after_insert(leaf_page)?;
        Ok(Status::Ok)
    }

    fn rebalance_after_insert(&mut self, mut page: PageId) -> DbResult<()> {
        loop {
            let node = self.read_node(page)?;
            if node.len() <= 2 * D {
                return Ok(());
            }
            match self.compensate_insert(page, node)? {
                Ok(()) => return Ok(()),
                Err(node) => page = self.split(page, node)?,
            }
        }
    }

    /// Tries to relieve an overflowing `node` (with `2D+1` entries) by
    /// rotating entries through the parent into a sibling that has room.
    /// Prefers the left sibling. Returns the node back unchanged (as
    /// `Err`) if neither sibling can absorb, so the caller can fall back
    /// to splitting.
    fn compensate_insert(&mut self, page: PageId, node: Node) -> DbResult<Result<(), Node>> {
        let Some(parent_page) = node.parent else {
            return Ok(Err(node));
        };
        let parent = self.read_node(parent_page)?;
        let child_index = parent.search_child(page);

        if child_index > 0 {
            let left_page = parent.children[child_index - 1];
            let left = self.read_node(left_page)?;
            if left.len() < 2 * D {
                self.rotate_from_node_to_left(page, node, parent_page, parent, child_index, left_page, left)?;
                return Ok(Ok(()));
            }
        }
        if child_index + 1 < parent.children.len() {
            let right_page = parent.children[child_index + 1];
            let right = self.read_node(right_page)?;
            if right.len() < 2 * D {
                self.rotate_from_node_to_right(page, node, parent_page, parent, child_index, right_page, right)?;
                return Ok(Ok(()));
            }
        }
        Ok(Err(node))
    }

    /// Insert-overflow compensation, spilling entries from the overflowing
    /// `node` into its left sibling through the parent separator.
    #[allow(clippy::too_many_arguments)]
    fn rotate_from_node_to_left(
        &mut self,
        node_page: PageId,
        mut node: Node,
        parent_page: PageId,
        mut parent: Node,
        child_index: usize,
        left_page: PageId,
        mut left: Node,
    ) -> DbResult<()> {
        let parent_index = child_index - 1;
        let rotations = (node.len() - left.len()) / 2;
        let mut adopted = Vec::new();

        for _ in 0..rotations {
            let separator = parent.entries[parent_index];
            left.entries.push(separator);
            let promoted = node.entries.remove(0);
            parent.entries[parent_index] = promoted;
            if !node.leaf {
                let child = node.children.remove(0);
                left.children.push(child);
                adopted.push(child);
            }
        }

        for child in adopted {
            self.reparent_child(child, left_page)?;
        }
        self.write_node(left_page, &left)?;
        self.write_node(parent_page, &parent)?;
        self.write_node(node_page, &node)?;
        Ok(())
    }

    /// Mirror of [`Self::rotate_from_node_to_left`], spilling into the
    /// right sibling instead.
    #[allow(clippy::too_many_arguments)]
    fn rotate_from_node_to_right(
        &mut self,
        node_page: PageId,
        mut node: Node,
        parent_page: PageId,
        mut parent: Node,
        child_index: usize,
        right_page: PageId,
        mut right: Node,
    ) -> DbResult<()> {
        let parent_index = child_index;
        let rotations = (node.len() - right.len()) / 2;
        let mut adopted = Vec::new();

        for _ in 0..rotations {
            let separator = parent.entries[parent_index];
            right.entries.insert(0, separator);
            let promoted = node.entries.pop().expect("overflowing node is non-empty");
            parent.entries[parent_index] = promoted;
            if !node.leaf {
                let child = node.children.pop().expect("overflowing node is non-empty");
                right.children.insert(0, child);
                adopted.push(child);
            }
        }

        for child in adopted {
            self.reparent_child(child, right_page)?;
        }
        self.write_node(right_page, &right)?;
        self.write_node(parent_page, &parent)?;
        self.write_node(node_page, &node)?;
        Ok(())
    }

    /// Splits an overflowing `node` in two, promoting the median entry
    /// into the parent (allocating a fresh root first if `node` had none).
    /// Returns the parent page so the rebalance loop can continue there.
    fn split(&mut self, page: PageId, mut node: Node) -> DbResult<PageId> {
        let parent_page = match node.parent {
            Some(p) => p,
            None => {
                let mut new_root = Node::new_internal(None);
                new_root.children.push(page);
                let new_root_page = self.allocate_node(&new_root)?;
                node.parent = Some(new_root_page);
                self.root = Some(new_root_page);
                new_root_page
            }
        };

        let right_entries = node.entries.split_off(D + 1);
        let median = node.entries.pop().expect("overflowing node has a median entry");
        let right_children = if node.leaf { Vec::new() } else { node.children.split_off(D + 1) };

        let sibling = Node {
            parent: Some(parent_page),
            leaf: node.leaf,
            entries: right_entries,
            children: right_children,
        };
        let sibling_page = self.allocate_node(&sibling)?;

        if !sibling.leaf {
            for &child in &sibling.children {
                self.reparent_child(child, sibling_page)?;
            }
        }

        let mut parent = self.read_node(parent_page)?;
        parent.add_key_with_child(median, sibling_page);

        self.write_node(page, &node)?;
        self.write_node(sibling_page, &sibling)?;
        self.write_node(parent_page, &parent)?;

        Ok(parent_page)
    }

    /// Deletes the record keyed by `key`.
    pub fn remove(&mut self, key: Key) -> DbResult<Status> {
        if self.root.is_none() {
            return Ok(Status::DoesNotExist);
        }
        let (status, found_page) = self.search_place(key)?;
        if status == Status::DoesNotExist {
            return Ok(Status::DoesNotExist);
        }

        let mut found_node = self.read_node(found_page)?;
        let found_index = found_node
            .entries
            .iter()
            .position(|e| e.key == key)
            .expect("key located by search_place");
        heap::remove_record(&mut self.records, found_node.entries[found_index].address);

        let working_page = if found_node.leaf {
            found_node.entries.remove(found_index);
            self.write_node(found_page, &found_node)?;
            found_page
        } else {
            // In-order successor: leftmost leaf of the right subtree.
            let mut successor_page = found_node.children[found_index + 1];
            let mut successor = self.read_node(successor_page)?;
            while !successor.leaf {
                successor_page = successor.children[0];
                successor = self.read_node(successor_page)?;
            }
            let promoted = successor.pop_front();
            found_node.entries[found_index] = promoted;
            self.write_node(found_page, &found_node)?;
            self.write_node(successor_page, &successor)?;
            successor_page
        };

        self.rebalance_after_delete(working_page)?;
        Ok(Status::Ok)
    }

    fn rebalance_after_delete(&mut self, mut page: PageId) -> DbResult<()> {
        loop {
            let node = self.read_node(page)?;

            if node.parent.is_none() {
                if node.len() >= 1 {
                    return Ok(());
                }
                if let Some(&only_child) = node.children.first() {
                    let mut child_node = self.read_node(only_child)?;
                    child_node.parent = None;
                    self.write_node(only_child, &child_node)?;
                    self.nodes.remove_page(page);
                    self.root = Some(only_child);
                } else {
                    self.nodes.remove_page(page);
                    self.root = None;
                }
                return Ok(());
            }

            if node.len() >= D {
                return Ok(());
            }

            match self.compensate_remove(page, node)? {
                Ok(()) => return Ok(()),
                Err(node) => page = self.merge(page, node)?,
            }
        }
    }

    /// Tries to relieve an underfull `node` by borrowing entries from a
    /// sibling that has more than `D`. Prefers the left sibling. Returns
    /// the node back unchanged if neither sibling can lend, so the caller
    /// can fall back to merging.
    fn compensate_remove(&mut self, page: PageId, node: Node) -> DbResult<Result<(), Node>> {
        let parent_page = node.parent.expect("non-root underfull node has a parent");
        let parent = self.read_node(parent_page)?;
        let child_index = parent.search_child(page);

        if child_index > 0 {
            let left_page = parent.children[child_index - 1];
            let left = self.read_node(left_page)?;
            if left.len() > D {
                self.rotate_from_left_to_node(page, node, parent_page, parent, child_index, left_page, left)?;
                return Ok(Ok(()));
            }
        }
        if child_index + 1 < parent.children.len() {
            let right_page = parent.children[child_index + 1];
            let right = self.read_node(right_page)?;
            if right.len() > D {
                self.rotate_from_right_to_node(page, node, parent_page, parent, child_index, right_page, right)?;
                return Ok(Ok(()));
            }
        }
        Ok(Err(node))
    }

    /// Delete-underflow compensation, lending entries from the left
    /// sibling into the underfull `node` through the parent separator.
    #[allow(clippy::too_many_arguments)]
    fn rotate_from_left_to_node(
        &mut self,
        node_page: PageId,
        mut node: Node,
        parent_page: PageId,
        mut parent: Node,
        child_index: usize,
        left_page: PageId,
        mut left: Node,
    ) -> DbResult<()> {
        let parent_index = child_index - 1;
        let rotations = (left.len() - node.len()) / 2;
        let mut adopted = Vec::new();

        for _ in 0..rotations {
            let separator = parent.entries[parent_index];
            node.entries.insert(0, separator);
            let borrowed = left.entries.pop().expect("lending sibling has entries");
            parent.entries[parent_index] = borrowed;
            if !node.leaf {
                let child = left.children.pop().expect("lending sibling has children");
                node.children.insert(0, child);
                adopted.push(child);
            }
        }

        for child in adopted {
            self.reparent_child(child, node_page)?;
        }
        self.write_node(left_page, &left)?;
        self.write_node(parent_page, &parent)?;
        self.write_node(node_page, &node)?;
        Ok(())
    }

    /// Mirror of [`Self::rotate_from_left_to_node`], lending from the
    /// right sibling instead.
    #[allow(clippy::too_many_arguments)]
    fn rotate_from_right_to_node(
        &mut self,
        node_page: PageId,
        mut node: Node,
        parent_page: PageId,
        mut parent: Node,
        child_index: usize,
        right_page: PageId,
        mut right: Node,
    ) -> DbResult<()> {
        let parent_index = child_index;
        let rotations = (right.len() - node.len()) / 2;
        let mut adopted = Vec::new();

        for _ in 0..rotations {
            let separator = parent.entries[parent_index];
            node.entries.push(separator);
            let borrowed = right.entries.remove(0);
            parent.entries[parent_index] = borrowed;
            if !node.leaf {
                let child = right.children.remove(0);
                node.children.push(child);
                adopted.push(child);
            }
        }

        for child in adopted {
            self.reparent_child(child, node_page)?;
        }
        self.write_node(right_page, &right)?;
        self.write_node(parent_page, &parent)?;
        self.write_node(node_page, &node)?;
        Ok(())
    }

    /// Merges an underfull `node` with the sibling on whichever side
    /// exists (preferring left), folding in the parent's separating key.
    /// The lower-indexed page of the pair always survives; the other is
    /// freed. Returns the parent page so the rebalance loop can continue
    /// there.
    fn merge(&mut self, page: PageId, node: Node) -> DbResult<PageId> {
        let parent_page = node.parent.expect("merge requires a parent");
        let mut parent = self.read_node(parent_page)?;
        let child_index = parent.search_child(page);

        let (survivor_page, mut survivor, victim_page, victim, parent_index) = if child_index > 0 {
            let left_page = parent.children[child_index - 1];
            let left = self.read_node(left_page)?;
            (left_page, left, page, node, child_index - 1)
        } else {
            let right_page = parent.children[child_index + 1];
            let right = self.read_node(right_page)?;
            (page, node, right_page, right, child_index)
        };

        let separator = parent.entries[parent_index];
        survivor.entries.push(separator);
        survivor.entries.extend(victim.entries.iter().copied());
        if !survivor.leaf {
            survivor.children.extend(victim.children.iter().copied());
        }

        parent.remove_key(separator.key);
        self.write_node(survivor_page, &survivor)?;
        self.write_node(parent_page, &parent)?;
        self.nodes.remove_page(victim_page);

        if !survivor.leaf {
            for &child in &victim.children {
                self.reparent_child(child, survivor_page)?;
            }
        }

        Ok(parent_page)
    }

    /// Overwrites the record keyed by `record.key()` in place.
    /// `DoesNotExist` if absent.
    pub fn modify(&mut self, record: T) -> DbResult<Status> {
        let Some(root) = self.root else {
            return Ok(Status::DoesNotExist);
        };
        let mut page = root;
        loop {
            let node = self.read_node(page)?;
            let i = node.search_place(record.key());
            if i > 0 && node.entries[i - 1].key == record.key() {
                let addr = node.entries[i - 1].address;
                self.records.write_record(addr, &record.serialize())?;
                return Ok(Status::Ok);
            }
            if node.leaf {
                return Ok(Status::DoesNotExist);
            }
            page = node.children[i];
        }
    }

    /// Every live record, in ascending key order. Collected eagerly: the
    /// tree's single-threaded, synchronous I/O model has no natural way to
    /// hand back a lazy cursor without either re-borrowing the index on
    /// every step or surfacing I/O errors through `Iterator::Item`.
    pub fn iter(&mut self) -> DbResult<std::vec::IntoIter<T>> {
        let mut out = Vec::new();
        if let Some(root) = self.root {
            self.collect_in_order(root, &mut out)?;
        }
        Ok(out.into_iter())
    }

    fn collect_in_order(&mut self, page: PageId, out: &mut Vec<T>) -> DbResult<()> {
        let node = self.peek_node(page)?;
        for i in 0..node.entries.len() {
            if !node.leaf {
                self.collect_in_order(node.children[i], out)?;
            }
            let bytes = self.records.read_record(node.entries[i].address)?;
            out.push(T::deserialize(&bytes));
        }
        if !node.leaf {
            self.collect_in_order(*node.children.last().expect("internal node has a last child"), out)?;
        }
        Ok(())
    }

    /// `(sum of node entry counts) / (node count * 2D)`. A diagnostic read
    /// that does not disturb buffer-pool LRU order.
    pub fn fill_ratio(&mut self) -> DbResult<f64> {
        let Some(root) = self.root else {
            return Ok(0.0);
        };
        let mut total_entries = 0usize;
        let mut node_count = 0usize;
        self.walk_fill_ratio(root, &mut total_entries, &mut node_count)?;
        Ok(total_entries as f64 / (node_count as f64 * (2 * D) as f64))
    }

    fn walk_fill_ratio(&mut self, page: PageId, total: &mut usize, count: &mut usize) -> DbResult<()> {
        let node = self.peek_node(page)?;
        *total += node.len();
        *count += 1;
        if !node.leaf {
            for &child in &node.children {
                self.walk_fill_ratio(child, total, count)?;
            }
        }
        Ok(())
    }

    /// Depth of the tree (1 for a single-leaf tree), or 0 if empty. A
    /// diagnostic read that does not disturb buffer-pool LRU order.
    pub fn height(&mut self) -> DbResult<usize> {
        let Some(root) = self.root else {
            return Ok(0);
        };
        let mut page = root;
        let mut height = 1;
        loop {
            let node = self.peek_node(page)?;
            if node.leaf {
                break;
            }
            page = node.children[0];
            height += 1;
        }
        Ok(height)
    }

    /// Force-writes every dirty page in both pools through to their
    /// stores. Never called implicitly; dropping the index without
    /// calling this loses unflushed writes, matching the non-goal of
    /// crash durability.
    pub fn flush(&mut self) -> DbResult<()> {
        self.nodes.flush()?;
        self.records.flush()?;
        Ok(())
    }

    pub fn node_store_reads(&self) -> u64 {
        self.nodes.store().reads()
    }

    pub fn node_store_writes(&self) -> u64 {
        self.nodes.store().writes()
    }

    pub fn record_store_reads(&self) -> u64 {
        self.records.store().reads()
    }

    pub fn record_store_writes(&self) -> u64 {
        self.records.store().writes()
    }
}
