use super::key::KeyType;
use super::node::{decode_node, encode_free, encode_node, node_record_size, write_field, BPlusNode, NodeId, NO_NODE};
use crate::access::value::{ColumnType, DataType};
use crate::storage::disk::{read_at, write_at};
use crate::storage::error::{StorageError, StorageResult};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// `root_index, key_type, key_size, next_free_index, order`, five `i32`s.
pub const NODE_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub root: Option<NodeId>,
    pub key_type: KeyType,
    /// One past the highest slot ever written.
    pub next_free_index: u32,
    pub order: usize,
}

impl NodeHeader {
    fn encode(&self) -> StorageResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(NODE_HEADER_SIZE);
        write_field(&mut buf, NodeId::to_raw(self.root))?;
        write_field(&mut buf, self.key_type.data_type.code())?;
        write_field(&mut buf, self.key_type.size as i32)?;
        write_field(&mut buf, self.next_free_index as i32)?;
        write_field(&mut buf, self.order as i32)?;
        Ok(buf)
    }

    fn decode(data: &[u8; NODE_HEADER_SIZE]) -> StorageResult<Self> {
        let field = |i: usize| LittleEndian::read_i32(&data[i * 4..]);

        let data_type = DataType::from_i32(field(1))?;
        let (key_size, next_free_index, order) = (field(2), field(3), field(4));
        if key_size < 0 || next_free_index < 0 || order < 3 {
            return Err(StorageError::CorruptRecord(format!(
                "node header has key size {}, next free index {}, order {}",
                key_size, next_free_index, order
            )));
        }

        let root = NodeId::from_raw(field(0))?;
        if matches!(root, Some(root) if root.0 >= next_free_index as u32) {
            return Err(StorageError::CorruptRecord(format!(
                "root {} beyond last node slot {}",
                field(0),
                next_free_index
            )));
        }

        Ok(Self {
            root,
            key_type: ColumnType::new(data_type, key_size as usize),
            next_free_index: next_free_index as u32,
            order: order as usize,
        })
    }
}

/// Per-table file of fixed-size B+Tree node records behind a small header.
/// A node's slot index is its identity.
pub struct NodeStore {
    file: File,
    header: NodeHeader,
    record_size: usize,
}

impl NodeStore {
    pub fn create(path: &Path, key_type: KeyType, order: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut store = Self {
            file,
            header: NodeHeader {
                root: None,
                key_type,
                next_free_index: 0,
                order,
            },
            record_size: node_record_size(&key_type),
        };
        store.write_header()?;
        Ok(store)
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut raw = [0u8; NODE_HEADER_SIZE];
        read_at(&mut file, 0, &mut raw)?;
        let header = NodeHeader::decode(&raw)?;
        let record_size = node_record_size(&header.key_type);

        let expected = NODE_HEADER_SIZE as u64 + header.next_free_index as u64 * record_size as u64;
        if file.metadata()?.len() < expected {
            return Err(StorageError::CorruptRecord(format!(
                "{:?} is shorter than its {} declared nodes",
                path, header.next_free_index
            )));
        }

        Ok(Self {
            file,
            header,
            record_size,
        })
    }

    pub fn header(&self) -> &NodeHeader {
        &self.header
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn set_root(&mut self, root: Option<NodeId>) {
        self.header.root = root;
    }

    /// Reads the node in slot `index`. `-1` and released slots yield `None`.
    pub fn read_node(&mut self, index: i32) -> StorageResult<Option<BPlusNode>> {
        if index == NO_NODE {
            return Ok(None);
        }
        if index < 0 || index as u32 >= self.header.next_free_index {
            return Err(StorageError::OutOfRange(format!(
                "node {} outside 0..{}",
                index, self.header.next_free_index
            )));
        }

        let offset = self.offset(index);
        let mut buf = vec![0u8; self.record_size];
        read_at(&mut self.file, offset, &mut buf)?;
        decode_node(&buf, &self.header.key_type)
    }

    /// Overwrites slot `index` in place, growing the file when the slot is
    /// new.
    pub fn write_node(&mut self, node: Option<&BPlusNode>, index: i32) -> StorageResult<()> {
        let node = match node {
            Some(node) if index >= 0 => node,
            _ => {
                return Err(StorageError::InvalidArgument(format!(
                    "cannot write {} to node slot {}",
                    if node.is_some() { "a node" } else { "a missing node" },
                    index
                )))
            }
        };

        let buf = encode_node(node, &self.header.key_type)?;
        self.write_slot(index, &buf)
    }

    /// Marks slot `index` as free so it can be handed out again.
    pub fn release_node(&mut self, index: i32) -> StorageResult<()> {
        if index < 0 {
            return Err(StorageError::InvalidArgument(format!(
                "cannot release node slot {}",
                index
            )));
        }
        let buf = encode_free(&self.header.key_type)?;
        self.write_slot(index, &buf)
    }

    pub fn write_header(&mut self) -> StorageResult<()> {
        let buf = self.header.encode()?;
        write_at(&mut self.file, 0, &buf)
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn write_slot(&mut self, index: i32, buf: &[u8]) -> StorageResult<()> {
        let offset = self.offset(index);
        write_at(&mut self.file, offset, buf)?;
        let next = index as u32 + 1;
        if next > self.header.next_free_index {
            self.header.next_free_index = next;
        }
        Ok(())
    }

    fn offset(&self, index: i32) -> u64 {
        NODE_HEADER_SIZE as u64 + index as u64 * self.record_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tuple::RecordLocator;
    use crate::access::value::Value;
    use crate::storage::page::PageId;
    use anyhow::Result;
    use tempfile::tempdir;

    fn leaf(key: &str, slot: u16) -> BPlusNode {
        BPlusNode::leaf(Value::String(key.to_string()), RecordLocator::new(PageId(1), slot))
    }

    #[test]
    fn test_create_writes_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("1.bPlusTree");
        let store = NodeStore::create(&path, KeyType::varchar(8), 5)?;
        assert_eq!(store.record_size(), 12 + 32);
        drop(store);

        assert_eq!(std::fs::metadata(&path)?.len(), NODE_HEADER_SIZE as u64);
        let store = NodeStore::open(&path)?;
        assert_eq!(
            *store.header(),
            NodeHeader {
                root: None,
                key_type: KeyType::varchar(8),
                next_free_index: 0,
                order: 5,
            }
        );
        Ok(())
    }

    #[test]
    fn test_write_and_read_nodes() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("1.bPlusTree");
        let mut store = NodeStore::create(&path, KeyType::varchar(8), 4)?;

        store.write_node(Some(&leaf("b", 1)), 0)?;
        store.write_node(Some(&leaf("a", 0)), 1)?;
        store.write_node(Some(&leaf("c", 2)), 0)?;
        assert_eq!(store.header().next_free_index, 2);

        assert_eq!(store.read_node(0)?, Some(leaf("c", 2)));
        assert_eq!(store.read_node(1)?, Some(leaf("a", 0)));
        Ok(())
    }

    #[test]
    fn test_sentinel_and_bounds() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("1.bPlusTree");
        let mut store = NodeStore::create(&path, KeyType::varchar(8), 4)?;

        assert_eq!(store.read_node(NO_NODE)?, None);
        assert!(matches!(store.read_node(0), Err(StorageError::OutOfRange(_))));
        assert!(matches!(store.read_node(-5), Err(StorageError::OutOfRange(_))));

        assert!(matches!(
            store.write_node(Some(&leaf("a", 0)), NO_NODE),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.write_node(None, 0),
            Err(StorageError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_released_slot_reads_as_none() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("1.bPlusTree");
        let mut store = NodeStore::create(&path, KeyType::varchar(8), 4)?;

        store.write_node(Some(&leaf("a", 0)), 0)?;
        store.release_node(0)?;
        assert_eq!(store.read_node(0)?, None);
        Ok(())
    }

    #[test]
    fn test_header_persists_root() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("1.bPlusTree");

        {
            let mut store = NodeStore::create(&path, KeyType::integer(), 4)?;
            store.write_node(
                Some(&BPlusNode::leaf(Value::Integer(5), RecordLocator::new(PageId(0), 0))),
                0,
            )?;
            store.set_root(Some(NodeId(0)));
            store.write_header()?;
        }

        let mut store = NodeStore::open(&path)?;
        assert_eq!(store.header().root, Some(NodeId(0)));
        assert_eq!(store.header().next_free_index, 1);
        assert_eq!(store.read_node(0)?.map(|node| node.key), Some(Value::Integer(5)));
        Ok(())
    }

    #[test]
    fn test_corrupt_header_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("1.bPlusTree");

        let mut raw = Vec::new();
        for field in [0i32, DataType::Integer.code(), 0, 0, 4] {
            raw.extend_from_slice(&field.to_le_bytes());
        }
        // Root slot 0 while no slot has been written
        std::fs::write(&path, &raw)?;
        assert!(matches!(
            NodeStore::open(&path),
            Err(StorageError::CorruptRecord(_))
        ));

        raw[4..8].copy_from_slice(&42i32.to_le_bytes());
        std::fs::write(&path, &raw)?;
        assert!(NodeStore::open(&path).is_err());

        // Header claims more nodes than the file holds
        let mut raw = Vec::new();
        for field in [-1i32, DataType::Integer.code(), 0, 3, 4] {
            raw.extend_from_slice(&field.to_le_bytes());
        }
        std::fs::write(&path, &raw)?;
        assert!(NodeStore::open(&path).is_err());
        Ok(())
    }
}
