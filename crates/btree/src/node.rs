//! The B-tree node type and its fixed-layout on-disk codec.
//!
//! A node occupies exactly one page of the node store: a parent pointer, a
//! leaf flag, an entry count, a padded array of `2D` `(key, address)`
//! entries, and a padded array of `2D+1` child page numbers. Unused slots
//! beyond `count` are zero-filled; decoding relies on `count` to know how
//! many entries/children are meaningful.

use common::{Address, Key, PageId};
use serde::{Deserialize, Serialize};

/// One `(key, record address)` pair held by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    pub key: Key,
    pub address: Address,
}

impl NodeEntry {
    pub fn new(key: Key, address: Address) -> Self {
        NodeEntry { key, address }
    }
}

/// A single B-tree node. `children` is empty for a leaf and has
/// `entries.len() + 1` elements otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub parent: Option<PageId>,
    pub leaf: bool,
    pub entries: Vec<NodeEntry>,
    pub children: Vec<PageId>,
}

impl Node {
    pub fn new_leaf(parent: Option<PageId>) -> Self {
        Node {
            parent,
            leaf: true,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn new_internal(parent: Option<PageId>) -> Self {
        Node {
            parent,
            leaf: false,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Upper-bound search by key: the smallest index `i` such that
    /// `entries[i].key > key` (or `entries.len()` if none do).
    pub fn search_place(&self, key: Key) -> usize {
        self.entries.partition_point(|e| e.key <= key)
    }

    /// Index of `page` within `children`.
    ///
    /// # Panics
    /// Panics if `page` is not one of this node's children.
    pub fn search_child(&self, page: PageId) -> usize {
        self.children
            .iter()
            .position(|&c| c == page)
            .expect("page is not a child of this node")
    }

    /// Removes and returns the first entry, along with the first child if
    /// this is not a leaf.
    pub fn pop_front(&mut self) -> NodeEntry {
        let entry = self.entries.remove(0);
        if !self.leaf {
            self.children.remove(0);
        }
        entry
    }

    /// Removes and returns the last entry, along with the last child if
    /// this is not a leaf.
    pub fn pop_back(&mut self) -> NodeEntry {
        let entry = self.entries.pop().expect("pop_back on empty node");
        if !self.leaf {
            self.children.pop();
        }
        entry
    }

    /// Inserts `entry` at its sorted position and returns that index.
    pub fn add_key(&mut self, entry: NodeEntry) -> usize {
        let index = self.search_place(entry.key);
        self.entries.insert(index, entry);
        index
    }

    /// As `add_key`, additionally inserting `child` immediately to the
    /// right of the new entry. Used to promote a split's median into its
    /// parent together with the new sibling page.
    pub fn add_key_with_child(&mut self, entry: NodeEntry, child: PageId) {
        let index = self.add_key(entry);
        self.children.insert(index + 1, child);
    }

    /// Removes the entry matching `key`. On a non-leaf node this also
    /// drops the child immediately to its right — the pointer left stale
    /// once a merge has absorbed that child's page into its left sibling.
    ///
    /// # Panics
    /// Panics if no entry has the given key.
    pub fn remove_key(&mut self, key: Key) {
        let index = self
            .entries
            .iter()
            .position(|e| e.key == key)
            .expect("key not present in node");
        self.entries.remove(index);
        if !self.leaf {
            self.children.remove(index + 1);
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawHeader {
    parent: i32,
    leaf: u8,
    count: u32,
}

#[derive(Serialize, Deserialize)]
struct RawEntry {
    key: i64,
    page: i32,
    offset: u32,
}

// Sizes are named explicitly rather than derived via `size_of`, since
// Rust's default struct layout may reorder/pad fields; bincode's legacy
// (fixint) encoding of these primitive fields is exactly their natural
// byte width with no padding.
const HEADER_SIZE: usize = 4 + 1 + 4;
const ENTRY_SIZE: usize = 8 + 4 + 4;
const CHILD_SIZE: usize = 4;

/// Size in bytes of a serialized node for order `d`. This is the node
/// store's fixed page size.
pub const fn node_page_size(d: usize) -> usize {
    HEADER_SIZE + 2 * d * ENTRY_SIZE + (2 * d + 1) * CHILD_SIZE
}

fn codec_config() -> impl bincode::config::Config {
    bincode::config::legacy()
}

fn encode_page(page: PageId) -> i32 {
    page.as_u32() as i32
}

fn decode_page(raw: i32) -> PageId {
    PageId(raw as u32)
}

/// Serializes `node` into a fresh, zero-padded buffer of `node_page_size(d)`
/// bytes.
pub fn encode_node(node: &Node, d: usize) -> Vec<u8> {
    let mut buf = vec![0u8; node_page_size(d)];
    let cfg = codec_config();

    let header = RawHeader {
        parent: node.parent.map(encode_page).unwrap_or(-1),
        leaf: u8::from(node.leaf),
        count: node.entries.len() as u32,
    };
    bincode::serde::encode_into_slice(&header, &mut buf[..HEADER_SIZE], cfg).expect("encode node header");

    for (i, entry) in node.entries.iter().enumerate() {
        let raw = RawEntry {
            key: entry.key,
            page: encode_page(entry.address.page),
            offset: entry.address.offset,
        };
        let start = HEADER_SIZE + i * ENTRY_SIZE;
        bincode::serde::encode_into_slice(&raw, &mut buf[start..start + ENTRY_SIZE], cfg)
            .expect("encode node entry");
    }

    if !node.leaf {
        let children_base = HEADER_SIZE + 2 * d * ENTRY_SIZE;
        for (i, child) in node.children.iter().enumerate() {
            let start = children_base + i * CHILD_SIZE;
            let raw = encode_page(*child);
            bincode::serde::encode_into_slice(&raw, &mut buf[start..start + CHILD_SIZE], cfg)
                .expect("encode node child");
        }
    }

    buf
}

/// Deserializes a node of order `d` from exactly `node_page_size(d)` bytes.
pub fn decode_node(data: &[u8], d: usize) -> Node {
    let cfg = codec_config();

    let (header, _): (RawHeader, usize) =
        bincode::serde::decode_from_slice(&data[..HEADER_SIZE], cfg).expect("decode node header");
    let parent = if header.parent < 0 {
        None
    } else {
        Some(decode_page(header.parent))
    };
    let leaf = header.leaf != 0;
    let count = header.count as usize;

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let start = HEADER_SIZE + i * ENTRY_SIZE;
        let (raw, _): (RawEntry, usize) =
            bincode::serde::decode_from_slice(&data[start..start + ENTRY_SIZE], cfg).expect("decode node entry");
        entries.push(NodeEntry::new(raw.key, Address::new(decode_page(raw.page), raw.offset)));
    }

    let mut children = Vec::new();
    if !leaf {
        let children_base = HEADER_SIZE + 2 * d * ENTRY_SIZE;
        for i in 0..=count {
            let start = children_base + i * CHILD_SIZE;
            let (raw, _): (i32, usize) =
                bincode::serde::decode_from_slice(&data[start..start + CHILD_SIZE], cfg).expect("decode node child");
            children.push(decode_page(raw));
        }
    }

    Node {
        parent,
        leaf,
        entries,
        children,
    }
}
