//! Storage engine for BurrowDB.
//!
//! This crate provides:
//! - Disk manager for page-level I/O on named data files
//! - Buffer manager facade combining the disk manager with the buffer pool
//! - Heap pages and HeapFile for relation record storage
//! - Sequential heap scans used to bulk-load indexes
//! - Persistent B+ tree index over an integer attribute

mod btree;
mod disk;
mod heap;
mod pager;
mod tuple;

pub use btree::{
    BTreeIndex, InternalNode, LeafNode, MetaNode, ScanOp, LEAF_CAPACITY, NONLEAF_CAPACITY,
    RELATION_NAME_LEN,
};
pub use disk::{DiskManager, DiskManagerConfig, FileId};
pub use heap::{HeapFile, HeapPage, HeapPageHeader, HeapScan, SlotId};
pub use pager::BufferManager;
pub use tuple::RecordId;
