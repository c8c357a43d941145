//! The persistent B+ tree index.
//!
//! One index file serves one (relation, attribute offset) pair. The file
//! is named `"{relation}.{offset}"`; its first allocated page is the meta
//! page, which records the identity of the index and the current root.

use super::constants::RELATION_NAME_LEN;
use super::node::{InternalNode, LeafNode, MetaNode};
use super::scan::{ScanBounds, ScanCursor, ScanOp, ScanState};
use crate::disk::FileId;
use crate::heap::HeapFile;
use crate::pager::BufferManager;
use crate::tuple::RecordId;
use burrow_common::page::{PageHeader, PageId, PageKind, INVALID_PAGE_NUM};
use burrow_common::types::AttrType;
use burrow_common::{BurrowError, Result};
use tracing::{debug, warn};

/// A B+ tree index over a 32-bit integer attribute of one relation.
///
/// Obtained through [`BTreeIndex::open_or_build`], which either reopens
/// an existing index file after validating its meta page or creates a new
/// file and bulk-loads it by scanning the relation. Dropping the index
/// ends any active scan and flushes the file.
pub struct BTreeIndex {
    bufmgr: BufferManager,
    file_id: FileId,
    file_name: String,
    /// Page number of the meta page.
    header_page_num: u32,
    /// Cached copy of the meta page's root pointer.
    root_page_num: u32,
    /// True while the root is still the initial leaf (no split yet).
    root_is_leaf: bool,
    scan: ScanState,
}

impl BTreeIndex {
    /// Opens the index for `(relation_name, attr_byte_offset)` if its
    /// file exists, otherwise creates it and bulk-loads every tuple of
    /// the relation.
    ///
    /// Fails with `BadIndexInfo` when the attribute type is not INTEGER,
    /// when the relation name exceeds the meta page's 20-byte field, or
    /// when an existing file's meta page does not match the arguments.
    pub fn open_or_build(
        bufmgr: BufferManager,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: AttrType,
    ) -> Result<Self> {
        if attr_type != AttrType::Integer {
            return Err(BurrowError::BadIndexInfo(format!(
                "unsupported attribute type {attr_type}, only INTEGER is indexable"
            )));
        }
        if relation_name.len() > RELATION_NAME_LEN {
            return Err(BurrowError::BadIndexInfo(format!(
                "relation name {relation_name:?} exceeds {RELATION_NAME_LEN} bytes"
            )));
        }

        let file_name = format!("{relation_name}.{attr_byte_offset}");
        match bufmgr.disk().open(&file_name)? {
            Some(file_id) => Self::open_existing(
                bufmgr,
                file_id,
                file_name,
                relation_name,
                attr_byte_offset,
                attr_type,
            ),
            None => Self::build(bufmgr, file_name, relation_name, attr_byte_offset, attr_type),
        }
    }

    /// Opens an existing index file, cross-checking its meta page.
    fn open_existing(
        bufmgr: BufferManager,
        file_id: FileId,
        file_name: String,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: AttrType,
    ) -> Result<Self> {
        let header_page_id = bufmgr.disk().first_page_id(file_id)?;

        let frame = bufmgr.read_page(header_page_id)?;
        let meta = MetaNode::from_page(&frame.read_data()[..]);
        bufmgr.unpin_page(header_page_id, false);

        let meta = meta.ok_or_else(|| {
            BurrowError::BadIndexInfo(format!("{file_name} has no valid meta page"))
        })?;

        if meta.relation_name != MetaNode::padded_name(relation_name) {
            return Err(BurrowError::BadIndexInfo(format!(
                "{file_name} was built for a different relation"
            )));
        }
        if meta.attr_byte_offset != attr_byte_offset {
            return Err(BurrowError::BadIndexInfo(format!(
                "{file_name} was built at attribute offset {}, not {attr_byte_offset}",
                meta.attr_byte_offset
            )));
        }
        if meta.attr_type != attr_type {
            return Err(BurrowError::BadIndexInfo(format!(
                "{file_name} was built over a {} attribute, not {attr_type}",
                meta.attr_type
            )));
        }

        // The root page's kind byte tells us whether the tree ever split
        let root_id = PageId::new(file_id, meta.root_page_num);
        let frame = bufmgr.read_page(root_id)?;
        let root_kind = PageHeader::from_bytes(&frame.read_data()[..]).kind;
        bufmgr.unpin_page(root_id, false);

        Ok(Self {
            bufmgr,
            file_id,
            file_name,
            header_page_num: header_page_id.page_num,
            root_page_num: meta.root_page_num,
            root_is_leaf: root_kind == PageKind::Leaf,
            scan: ScanState::Idle,
        })
    }

    /// Creates a new index file and seeds it from a relation scan.
    fn build(
        bufmgr: BufferManager,
        file_name: String,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: AttrType,
    ) -> Result<Self> {
        let file_id = bufmgr.disk().create(&file_name)?;

        // First allocated page is the meta page, second the initial root
        let (header_page_id, meta_frame) = bufmgr.alloc_page(file_id)?;
        let (root_page_id, root_frame) = bufmgr.alloc_page(file_id)?;

        LeafNode::new().write_page(&mut root_frame.write_data()[..], root_page_id.page_num);

        let meta = MetaNode::new(
            relation_name,
            attr_byte_offset,
            attr_type,
            root_page_id.page_num,
        );
        meta.write_page(&mut meta_frame.write_data()[..], header_page_id.page_num);

        bufmgr.unpin_page(header_page_id, true);
        bufmgr.unpin_page(root_page_id, true);

        let mut index = Self {
            bufmgr,
            file_id,
            file_name,
            header_page_num: header_page_id.page_num,
            root_page_num: root_page_id.page_num,
            root_is_leaf: true,
            scan: ScanState::Idle,
        };

        // Bulk-load: every tuple of the relation contributes one entry
        let heap = HeapFile::open(index.bufmgr.clone(), relation_name)?;
        let mut scan = heap.scan()?;
        let mut entries = 0u64;
        while let Some((rid, record)) = scan.next_record()? {
            let offset = attr_byte_offset as usize;
            match record.get(offset..offset + 4) {
                Some(bytes) => {
                    let key = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    index.insert(key, rid)?;
                    entries += 1;
                }
                None => {
                    debug!(rid = %rid, "record too short for indexed attribute, skipped");
                }
            }
        }

        debug!(
            relation = relation_name,
            file = %index.file_name,
            entries,
            "built index from relation scan"
        );
        Ok(index)
    }

    /// Returns the name of the index file.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the disk manager file id of the index file.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Returns the page number of the current root.
    pub fn root_page_num(&self) -> u32 {
        self.root_page_num
    }

    /// Returns the number of node levels, counting the leaf level.
    pub fn height(&self) -> Result<u32> {
        if self.root_is_leaf {
            return Ok(1);
        }
        let root_id = self.page_id(self.root_page_num);
        let frame = self.bufmgr.read_page(root_id)?;
        let root = InternalNode::from_page(&frame.read_data()[..]);
        self.bufmgr.unpin_page(root_id, false);
        Ok(root.level as u32 + 1)
    }

    #[inline]
    fn page_id(&self, page_num: u32) -> PageId {
        PageId::new(self.file_id, page_num)
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Inserts a (key, RecordId) entry.
    ///
    /// Duplicate keys are accepted; equal keys scan back in insertion
    /// order. A full leaf splits, which may cascade separator insertions
    /// up to the root.
    pub fn insert(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let (leaf_num, path) = if self.root_is_leaf {
            (self.root_page_num, Vec::new())
        } else {
            self.find_leaf(key)?
        };
        self.insert_into_leaf(leaf_num, key, rid, path)
    }

    /// Walks from the root to the leaf a key belongs in.
    ///
    /// Returns the leaf page number and the internal pages visited on
    /// the way down, for bottom-up split propagation. Read-only; every
    /// page is unpinned before the walk advances.
    fn find_leaf(&self, key: i32) -> Result<(u32, Vec<u32>)> {
        let mut path = Vec::new();
        let mut current = self.root_page_num;

        loop {
            let page_id = self.page_id(current);
            let frame = self.bufmgr.read_page(page_id)?;
            let node = InternalNode::from_page(&frame.read_data()[..]);
            self.bufmgr.unpin_page(page_id, false);

            path.push(current);
            let child = node.child_for(key);
            if node.level == 1 {
                // One step above the leaves: the child is the target
                return Ok((child, path));
            }
            current = child;
        }
    }

    fn insert_into_leaf(
        &mut self,
        leaf_num: u32,
        key: i32,
        rid: RecordId,
        path: Vec<u32>,
    ) -> Result<()> {
        let page_id = self.page_id(leaf_num);
        let frame = self.bufmgr.read_page(page_id)?;
        let mut node = LeafNode::from_page(&frame.read_data()[..]);

        if !node.is_full() {
            node.insert(key, rid);
            node.write_page(&mut frame.write_data()[..], leaf_num);
            self.bufmgr.unpin_page(page_id, true);
            return Ok(());
        }

        // Full leaf: move the upper half into a new right sibling
        let (right_id, right_frame) = self.bufmgr.alloc_page(self.file_id)?;
        let mut right = node.split();

        if key <= node.keys[node.occupied() - 1] {
            node.insert(key, rid);
        } else {
            right.insert(key, rid);
        }
        let promoted = right.keys[0];

        // Splice the new leaf into the sibling chain
        node.right_sibling = right_id.page_num;

        node.write_page(&mut frame.write_data()[..], leaf_num);
        right.write_page(&mut right_frame.write_data()[..], right_id.page_num);
        self.bufmgr.unpin_page(page_id, true);
        self.bufmgr.unpin_page(right_id, true);

        self.propagate_split(promoted, leaf_num, right_id.page_num, 0, path)
    }

    /// Installs a promoted separator in the parent, splitting full
    /// parents as needed all the way to the root.
    ///
    /// `split_level` is the level of the node that just split (0 for a
    /// leaf); the new root built above it takes `split_level + 1`.
    fn propagate_split(
        &mut self,
        mut sep: i32,
        mut left: u32,
        mut right: u32,
        mut split_level: u16,
        mut path: Vec<u32>,
    ) -> Result<()> {
        loop {
            let Some(parent_num) = path.pop() else {
                return self.create_new_root(sep, left, right, split_level + 1);
            };

            let parent_id = self.page_id(parent_num);
            let frame = self.bufmgr.read_page(parent_id)?;
            let mut parent = InternalNode::from_page(&frame.read_data()[..]);

            if !parent.is_full() {
                parent.insert_separator(sep, right);
                parent.write_page(&mut frame.write_data()[..], parent_num);
                self.bufmgr.unpin_page(parent_id, true);
                return Ok(());
            }

            // Full parent: place the separator, then split around the
            // middle key, which moves up without staying in either half
            parent.insert_separator(sep, right);
            let (new_right_id, new_frame) = self.bufmgr.alloc_page(self.file_id)?;
            let (promoted, right_node) = parent.split_overfull();

            parent.write_page(&mut frame.write_data()[..], parent_num);
            right_node.write_page(&mut new_frame.write_data()[..], new_right_id.page_num);
            let parent_level = parent.level;
            self.bufmgr.unpin_page(parent_id, true);
            self.bufmgr.unpin_page(new_right_id, true);

            sep = promoted;
            left = parent_num;
            right = new_right_id.page_num;
            split_level = parent_level;
        }
    }

    /// Grows the tree by one level: a fresh internal root over the two
    /// halves of the old root, recorded in the meta page.
    fn create_new_root(&mut self, sep: i32, left: u32, right: u32, level: u16) -> Result<()> {
        let (root_id, frame) = self.bufmgr.alloc_page(self.file_id)?;
        let root = InternalNode::new_root(level, sep, left, right);
        root.write_page(&mut frame.write_data()[..], root_id.page_num);
        self.bufmgr.unpin_page(root_id, true);

        let meta_id = self.page_id(self.header_page_num);
        let frame = self.bufmgr.read_page(meta_id)?;
        let meta = MetaNode::from_page(&frame.read_data()[..]);
        let Some(mut meta) = meta else {
            self.bufmgr.unpin_page(meta_id, false);
            return Err(BurrowError::Internal(format!(
                "{} lost its meta page",
                self.file_name
            )));
        };
        meta.root_page_num = root_id.page_num;
        meta.write_page(&mut frame.write_data()[..], self.header_page_num);
        self.bufmgr.unpin_page(meta_id, true);

        self.root_page_num = root_id.page_num;
        self.root_is_leaf = false;
        Ok(())
    }

    // =========================================================================
    // Range scan
    // =========================================================================

    /// Positions a scan at the first entry in
    /// `(low, low_op) .. (high, high_op)`.
    ///
    /// The low operator must be GT or GTE and the high operator LT or
    /// LTE (`BadOpcodes`), and `low <= high` must hold (`BadScanrange`).
    /// Fails with `NoSuchKeyFound` when no key is in range. Any previous
    /// scan is implicitly ended. While the scan is active, the leaf it
    /// is positioned on stays pinned.
    pub fn start_scan(&mut self, low: i32, low_op: ScanOp, high: i32, high_op: ScanOp) -> Result<()> {
        if !low_op.is_low_op() || !high_op.is_high_op() {
            return Err(BurrowError::BadOpcodes);
        }
        if low > high {
            return Err(BurrowError::BadScanrange { low, high });
        }

        // Only one scan at a time
        self.reset_scan();

        let bounds = ScanBounds {
            low,
            low_op,
            high,
            high_op,
        };
        let mut current = if self.root_is_leaf {
            self.root_page_num
        } else {
            self.find_leaf(low)?.0
        };

        loop {
            let page_id = self.page_id(current);
            let frame = self.bufmgr.read_page(page_id)?;
            let node = LeafNode::from_page(&frame.read_data()[..]);

            // First entry satisfying the low bound
            let start = match low_op {
                ScanOp::GT => node.keys.partition_point(|&k| k <= low),
                _ => node.keys.partition_point(|&k| k < low),
            };

            if start < node.occupied() {
                if bounds.satisfies_high(node.keys[start]) {
                    // Leave this leaf pinned for the duration of the scan
                    self.scan = ScanState::Active(ScanCursor {
                        bounds,
                        page_num: current,
                        next_entry: start,
                    });
                    return Ok(());
                }
                self.bufmgr.unpin_page(page_id, false);
                return Err(BurrowError::NoSuchKeyFound);
            }

            // Nothing qualifying on this leaf; try the right sibling
            let sibling = node.right_sibling;
            self.bufmgr.unpin_page(page_id, false);
            if sibling == INVALID_PAGE_NUM {
                return Err(BurrowError::NoSuchKeyFound);
            }
            current = sibling;
        }
    }

    /// Returns the RecordId of the next entry matching the scan.
    ///
    /// Fails with `ScanNotInitialized` outside an active scan and with
    /// `IndexScanCompleted` once the last match has been returned.
    pub fn next(&mut self) -> Result<RecordId> {
        let mut cursor = match self.scan {
            ScanState::Idle => return Err(BurrowError::ScanNotInitialized),
            ScanState::Done => return Err(BurrowError::IndexScanCompleted),
            ScanState::Active(cursor) => cursor,
        };

        let node = self.read_leaf(cursor.page_num)?;

        let key = node.keys[cursor.next_entry];
        if !cursor.bounds.satisfies_high(key) {
            self.bufmgr.unpin_page(self.page_id(cursor.page_num), false);
            self.scan = ScanState::Done;
            return Err(BurrowError::IndexScanCompleted);
        }
        let rid = node.rids[cursor.next_entry];

        // Pre-position for the next call
        if cursor.next_entry + 1 < node.occupied() {
            cursor.next_entry += 1;
            self.scan = ScanState::Active(cursor);
            return Ok(rid);
        }

        // Leaf exhausted: release it and move to the right sibling
        self.bufmgr.unpin_page(self.page_id(cursor.page_num), false);
        if node.right_sibling == INVALID_PAGE_NUM {
            self.scan = ScanState::Done;
            return Ok(rid);
        }

        let sibling_id = self.page_id(node.right_sibling);
        let frame = self.bufmgr.read_page(sibling_id)?;
        let sibling = LeafNode::from_page(&frame.read_data()[..]);

        if sibling.occupied() == 0 || !cursor.bounds.satisfies_high(sibling.keys[0]) {
            self.bufmgr.unpin_page(sibling_id, false);
            self.scan = ScanState::Done;
        } else {
            cursor.page_num = sibling_id.page_num;
            cursor.next_entry = 0;
            self.scan = ScanState::Active(cursor);
        }
        Ok(rid)
    }

    /// Ends the current scan, releasing the pinned leaf.
    ///
    /// Fails with `ScanNotInitialized` when no scan was started.
    pub fn end_scan(&mut self) -> Result<()> {
        match self.scan {
            ScanState::Idle => Err(BurrowError::ScanNotInitialized),
            ScanState::Active(_) | ScanState::Done => {
                self.reset_scan();
                Ok(())
            }
        }
    }

    /// Unpins any scan-held page and returns the scan to Idle.
    fn reset_scan(&mut self) {
        if let ScanState::Active(cursor) = self.scan {
            self.bufmgr.unpin_page(self.page_id(cursor.page_num), false);
        }
        self.scan = ScanState::Idle;
    }

    /// Reads a leaf without retaining a pin.
    fn read_leaf(&self, page_num: u32) -> Result<LeafNode> {
        let page_id = self.page_id(page_num);
        let frame = self.bufmgr.read_page(page_id)?;
        let node = LeafNode::from_page(&frame.read_data()[..]);
        self.bufmgr.unpin_page(page_id, false);
        Ok(node)
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        // The close path never fails: end any scan and flush, logging at most
        let _ = self.end_scan();
        if let Err(err) = self.bufmgr.flush_file(self.file_id) {
            warn!(index = %self.file_name, error = %err, "failed to flush index file on close");
        }
    }
}
