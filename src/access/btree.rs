//! Persistent B+Tree index mapping a unique key to a [`RecordLocator`].
//!
//! Each node holds a single key. Nodes that share a parent form a *row*, a
//! sibling-linked list kept in key order. An inner entry `e[j]` in a row
//! separates its `less` child `c[j]` from its `greater_or_equal` child
//! `c[j + 1]`, so adjacent entries share a child, and every child pointer
//! names the head of a child row. A row holds at most `order - 1` nodes;
//! rows below the root hold at least `ceil(order / 2) - 1`.
//!
//! The whole node file is loaded into an arena of slots. Mutations edit
//! slots, mark them dirty, and are written back through the [`NodeStore`]
//! before the operation returns.

pub mod key;
pub mod node;
pub mod node_store;

pub use self::key::{KeyType, SearchKey};
pub use self::node::{BPlusNode, NodeId, NodeKind};
pub use self::node_store::NodeStore;

use self::key::{ensure_key_type, is_less};
use crate::access::tuple::RecordLocator;
use crate::storage::error::{StorageError, StorageResult};
use log::debug;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Smallest order for which splits leave both halves non-empty.
pub const MIN_ORDER: usize = 3;

fn corrupt(message: impl Into<String>) -> StorageError {
    StorageError::CorruptRecord(message.into())
}

fn dangling(id: NodeId) -> StorageError {
    corrupt(format!("dangling node handle {}", id.0))
}

/// A row that is being rebuilt. `children` is empty for leaf rows and holds
/// `entries.len() + 1` row heads otherwise.
#[derive(Debug)]
struct RowContents {
    entries: Vec<NodeId>,
    children: Vec<NodeId>,
}

impl RowContents {
    fn leaf(entries: Vec<NodeId>) -> Self {
        Self {
            entries,
            children: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn head(&self) -> StorageResult<NodeId> {
        self.entries
            .first()
            .copied()
            .ok_or_else(|| corrupt("row has no nodes"))
    }
}

/// Running totals gathered by [`BPlusTree::check_invariants`].
#[derive(Default)]
struct Audit {
    leaf_depth: Option<usize>,
    leaves: usize,
    nodes: usize,
}

pub struct BPlusTree {
    store: NodeStore,
    path: PathBuf,
    nodes: Vec<Option<BPlusNode>>,
    free: Vec<NodeId>,
    dirty: BTreeSet<NodeId>,
    root: Option<NodeId>,
    key_type: KeyType,
    order: usize,
    len: usize,
}

impl BPlusTree {
    /// Creates an empty tree, truncating any existing file at `path`.
    pub fn create(path: &Path, key_type: KeyType, order: usize) -> StorageResult<Self> {
        if order < MIN_ORDER {
            return Err(StorageError::InvalidArgument(format!(
                "B+Tree order {} is below the minimum of {}",
                order, MIN_ORDER
            )));
        }

        let store = NodeStore::create(path, key_type, order)?;
        Ok(Self {
            store,
            path: path.to_path_buf(),
            nodes: Vec::new(),
            free: Vec::new(),
            dirty: BTreeSet::new(),
            root: None,
            key_type,
            order,
            len: 0,
        })
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        let store = NodeStore::open(path)?;
        let header = *store.header();

        let mut tree = Self {
            store,
            path: path.to_path_buf(),
            nodes: Vec::new(),
            free: Vec::new(),
            dirty: BTreeSet::new(),
            root: header.root,
            key_type: header.key_type,
            order: header.order,
            len: 0,
        };
        tree.reload()?;
        Ok(tree)
    }

    /// Discards the in-memory graph and rebuilds it from the node file.
    pub fn reload(&mut self) -> StorageResult<()> {
        let header = *self.store.header();

        let mut nodes = Vec::with_capacity(header.next_free_index as usize);
        let mut free = Vec::new();
        for index in 0..header.next_free_index {
            let node = self.store.read_node(index as i32)?;
            if node.is_none() {
                free.push(NodeId(index));
            }
            nodes.push(node);
        }
        // Lowest free slot is handed out first
        free.reverse();

        self.len = nodes.iter().flatten().filter(|node| node.is_leaf()).count();
        self.nodes = nodes;
        self.free = free;
        self.dirty.clear();
        self.root = header.root;
        self.key_type = header.key_type;
        self.order = header.order;

        match self.root {
            Some(root) => {
                self.node(root)?;
            }
            None if self.node_count() > 0 => {
                return Err(corrupt(format!(
                    "{:?} has {} nodes but no root",
                    self.path,
                    self.node_count()
                )))
            }
            None => {}
        }

        debug!(
            "loaded B+Tree {:?}: {} keys in {} nodes",
            self.path,
            self.len,
            self.node_count()
        );
        Ok(())
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Live nodes, inner and leaf.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Fewest nodes a row below the root may hold.
    pub fn min_row_len(&self) -> usize {
        (self.order + 1) / 2 - 1
    }

    /// Number of levels; zero for an empty tree.
    pub fn height(&self) -> StorageResult<usize> {
        let mut height = 0;
        let mut current = self.root;
        while let Some(id) = current {
            height += 1;
            if height > self.nodes.len() {
                return Err(corrupt("child pointers form a cycle"));
            }
            current = self.node(id)?.children().map(|(less, _)| less);
        }
        Ok(height)
    }

    pub fn node(&self, id: NodeId) -> StorageResult<&BPlusNode> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| dangling(id))
    }

    pub fn find(&self, key: &SearchKey) -> StorageResult<Option<&BPlusNode>> {
        match self.find_node(key)? {
            Some(id) => self.node(id).map(Some),
            None => Ok(None),
        }
    }

    pub fn get(&self, key: &SearchKey) -> StorageResult<Option<RecordLocator>> {
        Ok(self.find(key)?.and_then(BPlusNode::locator))
    }

    pub fn contains(&self, key: &SearchKey) -> StorageResult<bool> {
        Ok(self.find_node(key)?.is_some())
    }

    /// Adds a leaf for `key`. Fails with `DuplicateKey` if the key is
    /// already present.
    pub fn insert(&mut self, key: SearchKey, locator: RecordLocator) -> StorageResult<NodeId> {
        self.key_type.check(&key)?;

        let Some(start) = self.descend(&key)? else {
            let id = self.alloc(BPlusNode::leaf(key, locator));
            self.root = Some(id);
            self.len = 1;
            self.persist()?;
            return Ok(id);
        };

        let mut row = self.row(start)?;
        let mut position = row.len();
        for (i, &id) in row.iter().enumerate() {
            match key.compare(&self.node(id)?.key)? {
                Ordering::Equal => return Err(StorageError::DuplicateKey(key.to_string())),
                Ordering::Less => {
                    position = i;
                    break;
                }
                Ordering::Greater => {}
            }
        }

        let parent = self.node(start)?.parent;
        let id = self.alloc(BPlusNode::leaf(key, locator));
        row.insert(position, id);
        self.link_row(&row, parent)?;
        if position == 0 {
            self.head_changed(parent, start, id)?;
        }
        self.len += 1;

        if row.len() >= self.order {
            self.split(row)?;
        }
        self.persist()?;
        Ok(id)
    }

    /// Removes `key` and returns the locator its leaf held.
    pub fn delete(&mut self, key: &SearchKey) -> StorageResult<RecordLocator> {
        let target = self
            .find_node(key)?
            .ok_or_else(|| StorageError::NotFound(format!("key {}", key)))?;

        let start = self.row_start(target)?;
        let parent = self.node(start)?.parent;
        let mut row = self.row(start)?;
        row.retain(|&id| id != target);

        let removed = self.release(target)?;
        let locator = removed
            .locator()
            .ok_or_else(|| corrupt("search ended on an inner node"))?;
        self.len -= 1;

        match parent {
            None => {
                self.link_row(&row, None)?;
                self.root = row.first().copied();
            }
            Some(parent_head) if row.len() >= self.min_row_len() => {
                self.link_row(&row, Some(parent_head))?;
                let head = RowContents::leaf(row).head()?;
                if head != start {
                    self.replace_child(parent_head, start, head)?;
                }
            }
            Some(parent_head) => self.rebalance(parent_head, start, RowContents::leaf(row))?,
        }

        self.persist()?;
        Ok(locator)
    }

    /// Points the leaf for `key` at a record's new location.
    pub fn update_pointer(&mut self, key: &SearchKey, locator: RecordLocator) -> StorageResult<()> {
        let id = self
            .find_node(key)?
            .ok_or_else(|| StorageError::NotFound(format!("key {}", key)))?;
        self.node_mut(id)?.kind = NodeKind::Leaf { locator };
        self.persist()
    }

    /// Every `(key, locator)` pair in ascending key order.
    pub fn entries(&self) -> StorageResult<Vec<(SearchKey, RecordLocator)>> {
        let mut out = Vec::with_capacity(self.len);
        if let Some(root) = self.root {
            self.collect(root, 0, &mut out)?;
        }
        Ok(out)
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.store.sync()
    }

    /// Closes the tree and deletes its file.
    pub fn destroy(self) -> StorageResult<()> {
        let Self { store, path, .. } = self;
        drop(store);
        std::fs::remove_file(&path)?;
        Ok(())
    }

    /// Walks the whole tree and reports the first structural fault: keys out
    /// of order or outside their separator bounds, rows of the wrong length,
    /// inconsistent parent or sibling links, leaves at different depths, and
    /// nodes unreachable from the root.
    pub fn check_invariants(&self) -> StorageResult<()> {
        let Some(root) = self.root else {
            if self.len != 0 || self.node_count() != 0 {
                return Err(corrupt(format!(
                    "empty tree holds {} nodes and counts {} keys",
                    self.node_count(),
                    self.len
                )));
            }
            return Ok(());
        };

        let mut audit = Audit::default();
        self.audit_row(root, None, None, None, 1, &mut audit)?;

        if audit.leaves != self.len {
            return Err(corrupt(format!(
                "{} leaves reachable, {} keys counted",
                audit.leaves, self.len
            )));
        }
        if audit.nodes != self.node_count() {
            return Err(corrupt(format!(
                "{} nodes reachable out of {} live",
                audit.nodes,
                self.node_count()
            )));
        }
        Ok(())
    }

    fn audit_row<'a>(
        &'a self,
        start: NodeId,
        parent: Option<NodeId>,
        lower: Option<&'a SearchKey>,
        upper: Option<&'a SearchKey>,
        depth: usize,
        audit: &mut Audit,
    ) -> StorageResult<()> {
        if depth > self.nodes.len() {
            return Err(corrupt("child pointers form a cycle"));
        }

        let row = self.row(start)?;
        let max = self.order - 1;
        let min = if parent.is_none() { 1 } else { self.min_row_len() };
        if row.len() < min || row.len() > max {
            return Err(corrupt(format!(
                "row at node {} has {} nodes, allowed {}..={}",
                start.0,
                row.len(),
                min,
                max
            )));
        }

        let leaf = self.node(start)?.is_leaf();
        let mut previous: Option<&'a BPlusNode> = None;
        for (i, &id) in row.iter().enumerate() {
            let node = self.node(id)?;
            let left = i.checked_sub(1).map(|j| row[j]);

            if node.parent != parent {
                return Err(corrupt(format!(
                    "node {} has parent {:?}, expected {:?}",
                    id.0, node.parent, parent
                )));
            }
            if node.left_sib != left {
                return Err(corrupt(format!(
                    "node {} has left sibling {:?}, expected {:?}",
                    id.0, node.left_sib, left
                )));
            }
            if node.is_leaf() != leaf {
                return Err(corrupt(format!("row at node {} mixes node kinds", start.0)));
            }
            if let Some(lower) = lower {
                if is_less(&node.key, lower)? {
                    return Err(corrupt(format!("key {} below its bound {}", node.key, lower)));
                }
            }
            if let Some(upper) = upper {
                if !is_less(&node.key, upper)? {
                    return Err(corrupt(format!("key {} not below its bound {}", node.key, upper)));
                }
            }
            if let Some(previous) = previous {
                if !is_less(&previous.key, &node.key)? {
                    return Err(corrupt(format!(
                        "keys {} and {} out of order",
                        previous.key, node.key
                    )));
                }
                if let (Some((_, shared)), Some((less, _))) = (previous.children(), node.children()) {
                    if shared != less {
                        return Err(corrupt(format!(
                            "adjacent entries {} and {} disagree on their shared child",
                            previous.key, node.key
                        )));
                    }
                }
            }
            previous = Some(node);
        }
        audit.nodes += row.len();

        if leaf {
            match audit.leaf_depth {
                Some(expected) if expected != depth => {
                    return Err(corrupt(format!(
                        "leaf row at node {} sits at depth {}, others at {}",
                        start.0, depth, expected
                    )))
                }
                _ => audit.leaf_depth = Some(depth),
            }
            audit.leaves += row.len();
            return Ok(());
        }

        let children = self.children(&row)?;
        for (j, &child) in children.iter().enumerate() {
            let child_lower = match j {
                0 => lower,
                _ => Some(&self.node(row[j - 1])?.key),
            };
            let child_upper = match row.get(j) {
                Some(&id) => Some(&self.node(id)?.key),
                None => upper,
            };
            if self.node(child)?.left_sib.is_some() {
                return Err(corrupt(format!("child pointer {} is not a row head", child.0)));
            }
            self.audit_row(child, Some(start), child_lower, child_upper, depth + 1, audit)?;
        }
        Ok(())
    }

    fn collect(
        &self,
        start: NodeId,
        depth: usize,
        out: &mut Vec<(SearchKey, RecordLocator)>,
    ) -> StorageResult<()> {
        if depth > self.nodes.len() {
            return Err(corrupt("child pointers form a cycle"));
        }

        let row = self.row(start)?;
        if self.node(start)?.is_leaf() {
            for id in row {
                let node = self.node(id)?;
                let locator = node
                    .locator()
                    .ok_or_else(|| corrupt(format!("row at node {} mixes node kinds", start.0)))?;
                out.push((node.key.clone(), locator));
            }
            return Ok(());
        }

        for child in self.children(&row)? {
            self.collect(child, depth + 1, out)?;
        }
        Ok(())
    }

    fn find_node(&self, key: &SearchKey) -> StorageResult<Option<NodeId>> {
        ensure_key_type(&self.key_type, key)?;

        let Some(start) = self.descend(key)? else {
            return Ok(None);
        };
        for id in self.row(start)? {
            match key.compare(&self.node(id)?.key)? {
                Ordering::Equal => return Ok(Some(id)),
                Ordering::Less => break,
                Ordering::Greater => {}
            }
        }
        Ok(None)
    }

    /// Head of the leaf row whose key range covers `key`. Each inner row is
    /// scanned left to right before dropping a level.
    fn descend(&self, key: &SearchKey) -> StorageResult<Option<NodeId>> {
        let Some(mut current) = self.root else {
            return Ok(None);
        };

        let mut steps = 0;
        loop {
            let node = self.node(current)?;
            let Some((less, greater_or_equal)) = node.children() else {
                return Ok(Some(current));
            };

            current = if is_less(key, &node.key)? {
                less
            } else {
                node.right_sib.unwrap_or(greater_or_equal)
            };

            steps += 1;
            if steps > self.nodes.len() {
                return Err(corrupt("descent does not terminate"));
            }
        }
    }

    fn split(&mut self, row: Vec<NodeId>) -> StorageResult<()> {
        let head = *row.first().ok_or_else(|| corrupt("split of an empty row"))?;
        let parent = self.node(head)?.parent;
        let half = self.order / 2;

        let (separator, right_start) = if self.node(head)?.is_leaf() {
            let (left, right) = row.split_at(half);
            let key = self.node(right[0])?.key.clone();
            let separator = self.alloc(BPlusNode::inner(key, left[0], right[0]));
            self.link_row(left, parent)?;
            self.link_row(right, parent)?;
            (separator, right[0])
        } else {
            // The middle entry moves up and leaves the row
            let children = self.children(&row)?;
            let (left, right) = (&row[..half], &row[half + 1..]);
            self.link_inner(left, &children[..=half], parent)?;
            self.link_inner(right, &children[half + 1..], parent)?;
            (row[half], right[0])
        };
        debug!(
            "split row at node {} of {} nodes around {}",
            head.0,
            row.len(),
            self.node(separator)?.key
        );

        let Some(parent_head) = parent else {
            self.link_inner(&[separator], &[head, right_start], None)?;
            self.root = Some(separator);
            return Ok(());
        };

        let mut entries = self.row(parent_head)?;
        let mut children = self.children(&entries)?;
        let index = children
            .iter()
            .position(|&child| child == head)
            .ok_or_else(|| corrupt(format!("row at node {} missing from its parent", head.0)))?;
        children.insert(index + 1, right_start);
        entries.insert(index, separator);

        let grandparent = self.node(parent_head)?.parent;
        self.link_inner(&entries, &children, grandparent)?;
        if entries[0] != parent_head {
            self.head_changed(grandparent, parent_head, entries[0])?;
        }

        if entries.len() >= self.order {
            self.split(entries)?;
        }
        Ok(())
    }

    /// Restores the minimum length of `row`, a child of the row headed by
    /// `parent_head`. `stale` is the handle the parent still uses for it,
    /// which may already have been released or moved.
    fn rebalance(
        &mut self,
        parent_head: NodeId,
        stale: NodeId,
        mut row: RowContents,
    ) -> StorageResult<()> {
        let grandparent = self.node(parent_head)?.parent;
        let mut entries = self.row(parent_head)?;
        let mut children = self.children(&entries)?;
        let index = children
            .iter()
            .position(|&child| child == stale)
            .ok_or_else(|| corrupt(format!("row at node {} missing from its parent", stale.0)))?;
        let min = self.min_row_len();

        let left = match index.checked_sub(1) {
            Some(i) => Some(self.contents(children[i])?),
            None => None,
        };
        let right = match children.get(index + 1) {
            Some(&child) => Some(self.contents(child)?),
            None => None,
        };

        match (left, right) {
            (Some(mut left), _) if left.entries.len() > min => {
                self.borrow_from_left(&mut left, &mut row, entries[index - 1])?;
                self.write_row(&left, Some(parent_head))?;
                self.write_row(&row, Some(parent_head))?;
                children[index] = row.head()?;
            }
            (_, Some(mut right)) if right.entries.len() > min => {
                self.borrow_from_right(&mut row, &mut right, entries[index])?;
                self.write_row(&row, Some(parent_head))?;
                self.write_row(&right, Some(parent_head))?;
                children[index] = row.head()?;
                children[index + 1] = right.head()?;
            }
            (left, right) => {
                let (separator_index, merged) = match (left, right) {
                    (Some(left), _) => (index - 1, self.merge(left, row, entries[index - 1])?),
                    (None, Some(right)) => (index, self.merge(row, right, entries[index])?),
                    (None, None) => {
                        return Err(corrupt(format!(
                            "row at node {} has no siblings to rebalance with",
                            stale.0
                        )))
                    }
                };
                entries.remove(separator_index);
                children.remove(separator_index + 1);
                children[separator_index] = merged.head()?;

                if entries.is_empty() && grandparent.is_none() {
                    self.write_row(&merged, None)?;
                    self.root = Some(merged.head()?);
                    debug!("root collapsed into row at node {}", merged.head()?.0);
                    return Ok(());
                }

                self.write_row(&merged, Some(parent_head))?;
                if let Some(grandparent) = grandparent {
                    if entries.len() < min {
                        return self.rebalance(
                            grandparent,
                            parent_head,
                            RowContents { entries, children },
                        );
                    }
                }
            }
        }

        self.link_inner(&entries, &children, grandparent)?;
        if entries[0] != parent_head {
            self.head_changed(grandparent, parent_head, entries[0])?;
        }
        Ok(())
    }

    fn borrow_from_left(
        &mut self,
        left: &mut RowContents,
        row: &mut RowContents,
        separator: NodeId,
    ) -> StorageResult<()> {
        let leaf = left.is_leaf();
        let moved = left
            .entries
            .pop()
            .ok_or_else(|| corrupt("borrow from an empty row"))?;

        if leaf {
            let key = self.node(moved)?.key.clone();
            self.node_mut(separator)?.key = key;
        } else {
            let child = left
                .children
                .pop()
                .ok_or_else(|| corrupt("borrow from an empty row"))?;
            self.swap_keys(moved, separator)?;
            row.children.insert(0, child);
        }
        row.entries.insert(0, moved);

        debug!("borrowed node {} from left sibling", moved.0);
        Ok(())
    }

    fn borrow_from_right(
        &mut self,
        row: &mut RowContents,
        right: &mut RowContents,
        separator: NodeId,
    ) -> StorageResult<()> {
        let leaf = right.is_leaf();
        if right.entries.len() < 2 {
            return Err(corrupt("borrow from a row at its minimum"));
        }
        let moved = right.entries.remove(0);

        if leaf {
            let key = self.node(right.entries[0])?.key.clone();
            self.node_mut(separator)?.key = key;
        } else {
            let child = right.children.remove(0);
            self.swap_keys(moved, separator)?;
            row.children.push(child);
        }
        row.entries.push(moved);

        debug!("borrowed node {} from right sibling", moved.0);
        Ok(())
    }

    /// Joins two adjacent rows. An inner separator moves down between them;
    /// a leaf-level separator is released.
    fn merge(
        &mut self,
        mut left: RowContents,
        right: RowContents,
        separator: NodeId,
    ) -> StorageResult<RowContents> {
        if left.is_leaf() && right.is_leaf() {
            self.release(separator)?;
        } else {
            left.entries.push(separator);
            left.children.extend(right.children);
        }
        left.entries.extend(right.entries);

        debug!(
            "merged rows into {} nodes around separator {}",
            left.entries.len(),
            separator.0
        );
        Ok(left)
    }

    fn swap_keys(&mut self, a: NodeId, b: NodeId) -> StorageResult<()> {
        let a_key = self.node(a)?.key.clone();
        let b_key = std::mem::replace(&mut self.node_mut(b)?.key, a_key);
        self.node_mut(a)?.key = b_key;
        Ok(())
    }

    fn node_mut(&mut self, id: NodeId) -> StorageResult<&mut BPlusNode> {
        let node = self
            .nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| dangling(id))?;
        self.dirty.insert(id);
        Ok(node)
    }

    fn alloc(&mut self, node: BPlusNode) -> NodeId {
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id.0 as usize] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() as u32 - 1)
            }
        };
        self.dirty.insert(id);
        id
    }

    fn release(&mut self, id: NodeId) -> StorageResult<BPlusNode> {
        let node = self
            .nodes
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or_else(|| dangling(id))?;
        self.free.push(id);
        self.dirty.insert(id);
        Ok(node)
    }

    /// Writes every dirty slot and the header.
    fn persist(&mut self) -> StorageResult<()> {
        for id in std::mem::take(&mut self.dirty) {
            match self.nodes.get(id.0 as usize).and_then(Option::as_ref) {
                Some(node) => self.store.write_node(Some(node), id.0 as i32)?,
                None => self.store.release_node(id.0 as i32)?,
            }
        }
        self.store.set_root(self.root);
        self.store.write_header()
    }

    fn row_start(&self, id: NodeId) -> StorageResult<NodeId> {
        let mut current = id;
        for _ in 0..=self.nodes.len() {
            match self.node(current)?.left_sib {
                Some(left) => current = left,
                None => return Ok(current),
            }
        }
        Err(corrupt(format!("sibling links around node {} form a cycle", id.0)))
    }

    fn row(&self, start: NodeId) -> StorageResult<Vec<NodeId>> {
        let mut row = vec![start];
        let mut current = self.node(start)?.right_sib;
        while let Some(id) = current {
            if row.len() > self.nodes.len() {
                return Err(corrupt(format!(
                    "sibling links from node {} form a cycle",
                    start.0
                )));
            }
            row.push(id);
            current = self.node(id)?.right_sib;
        }
        Ok(row)
    }

    fn children(&self, row: &[NodeId]) -> StorageResult<Vec<NodeId>> {
        let mut children = Vec::with_capacity(row.len() + 1);
        for (i, &id) in row.iter().enumerate() {
            let (less, greater_or_equal) = self
                .node(id)?
                .children()
                .ok_or_else(|| corrupt(format!("leaf {} in an inner row", id.0)))?;
            if i == 0 {
                children.push(less);
            }
            children.push(greater_or_equal);
        }
        Ok(children)
    }

    fn contents(&self, start: NodeId) -> StorageResult<RowContents> {
        let entries = self.row(start)?;
        let children = if self.node(start)?.is_leaf() {
            Vec::new()
        } else {
            self.children(&entries)?
        };
        Ok(RowContents { entries, children })
    }

    fn write_row(&mut self, row: &RowContents, parent: Option<NodeId>) -> StorageResult<()> {
        if row.is_leaf() {
            self.link_row(&row.entries, parent)
        } else {
            self.link_inner(&row.entries, &row.children, parent)
        }
    }

    /// Chains `row` through its sibling links under `parent`. Only nodes
    /// whose links change are marked dirty.
    fn link_row(&mut self, row: &[NodeId], parent: Option<NodeId>) -> StorageResult<()> {
        for (i, &id) in row.iter().enumerate() {
            let left = i.checked_sub(1).map(|j| row[j]);
            let right = row.get(i + 1).copied();

            let node = self.node(id)?;
            if node.left_sib != left || node.right_sib != right || node.parent != parent {
                let node = self.node_mut(id)?;
                node.left_sib = left;
                node.right_sib = right;
                node.parent = parent;
            }
        }
        Ok(())
    }

    /// Links an inner row, assigns each entry its pair of children and points
    /// every child row at the new row head.
    fn link_inner(
        &mut self,
        row: &[NodeId],
        children: &[NodeId],
        parent: Option<NodeId>,
    ) -> StorageResult<()> {
        if row.is_empty() || children.len() != row.len() + 1 {
            return Err(corrupt(format!(
                "inner row of {} entries with {} children",
                row.len(),
                children.len()
            )));
        }

        self.link_row(row, parent)?;
        for (i, &id) in row.iter().enumerate() {
            let kind = NodeKind::Inner {
                less: children[i],
                greater_or_equal: children[i + 1],
            };
            if self.node(id)?.kind != kind {
                self.node_mut(id)?.kind = kind;
            }
        }

        let head = Some(row[0]);
        for &child in children {
            for id in self.row(child)? {
                if self.node(id)?.parent != head {
                    self.node_mut(id)?.parent = head;
                }
            }
        }
        Ok(())
    }

    /// The row formerly headed by `old` now starts at `new`.
    fn head_changed(
        &mut self,
        parent: Option<NodeId>,
        old: NodeId,
        new: NodeId,
    ) -> StorageResult<()> {
        match parent {
            Some(parent_head) => self.replace_child(parent_head, old, new),
            None => {
                self.root = Some(new);
                Ok(())
            }
        }
    }

    fn replace_child(&mut self, parent_head: NodeId, old: NodeId, new: NodeId) -> StorageResult<()> {
        let swap = |id: NodeId| if id == old { new } else { id };

        for id in self.row(parent_head)? {
            let (less, greater_or_equal) = self
                .node(id)?
                .children()
                .ok_or_else(|| corrupt(format!("leaf {} in an inner row", id.0)))?;
            if less == old || greater_or_equal == old {
                self.node_mut(id)?.kind = NodeKind::Inner {
                    less: swap(less),
                    greater_or_equal: swap(greater_or_equal),
                };
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("path", &self.path)
            .field("key_type", &self.key_type)
            .field("order", &self.order)
            .field("len", &self.len)
            .field("root", &self.root)
            .finish()
    }
}
