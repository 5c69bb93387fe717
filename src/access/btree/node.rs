//! B+Tree node representation and its fixed-size on-disk record.
//!
//! Every relationship between nodes is an integer handle into the node file,
//! so parent, sibling and child links serialize as plain `i32`s with `-1`
//! standing for "no node".

use super::key::{KeyType, SearchKey};
use crate::access::tuple::RecordLocator;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;

/// Sentinel handle for "no node".
pub const NO_NODE: i32 = -1;

/// Number of `i32` fields after the key in every record: kind, less,
/// greater-or-equal, parent, left sibling, right sibling, page index and
/// record index.
pub const NODE_FIELD_COUNT: usize = 8;

const KIND_LEAF: i32 = 0;
const KIND_INNER: i32 = 1;
const KIND_FREE: i32 = 2;

/// Stable handle of a node: its slot in the node file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn to_raw(id: Option<NodeId>) -> i32 {
        id.map_or(NO_NODE, |id| id.0 as i32)
    }

    pub fn from_raw(raw: i32) -> StorageResult<Option<NodeId>> {
        match raw {
            NO_NODE => Ok(None),
            raw if raw >= 0 => Ok(Some(NodeId(raw as u32))),
            raw => Err(StorageError::CorruptRecord(format!("invalid node handle {}", raw))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Separator entry: keys below `key` live under `less`, the rest under
    /// `greater_or_equal`. Both point at the head of a child row.
    Inner {
        less: NodeId,
        greater_or_equal: NodeId,
    },
    Leaf { locator: RecordLocator },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BPlusNode {
    pub key: SearchKey,
    /// Head of the parent row; `None` for members of the root row.
    pub parent: Option<NodeId>,
    pub left_sib: Option<NodeId>,
    pub right_sib: Option<NodeId>,
    pub kind: NodeKind,
}

impl BPlusNode {
    pub fn leaf(key: SearchKey, locator: RecordLocator) -> Self {
        Self {
            key,
            parent: None,
            left_sib: None,
            right_sib: None,
            kind: NodeKind::Leaf { locator },
        }
    }

    pub fn inner(key: SearchKey, less: NodeId, greater_or_equal: NodeId) -> Self {
        Self {
            key,
            parent: None,
            left_sib: None,
            right_sib: None,
            kind: NodeKind::Inner {
                less,
                greater_or_equal,
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn is_inner(&self) -> bool {
        !self.is_leaf()
    }

    pub fn locator(&self) -> Option<RecordLocator> {
        match self.kind {
            NodeKind::Leaf { locator } => Some(locator),
            NodeKind::Inner { .. } => None,
        }
    }

    /// `(less, greater_or_equal)` for inner nodes.
    pub fn children(&self) -> Option<(NodeId, NodeId)> {
        match self.kind {
            NodeKind::Inner {
                less,
                greater_or_equal,
            } => Some((less, greater_or_equal)),
            NodeKind::Leaf { .. } => None,
        }
    }
}

/// Width of one node record for the given key type.
pub fn node_record_size(key_type: &KeyType) -> usize {
    key_type.encoded_width() + NODE_FIELD_COUNT * 4
}

pub fn encode_node(node: &BPlusNode, key_type: &KeyType) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(node_record_size(key_type));
    key_type.encode(&node.key, &mut buf)?;

    let (kind, less, greater_or_equal, page_index, record_index) = match node.kind {
        NodeKind::Inner {
            less,
            greater_or_equal,
        } => (KIND_INNER, less.0 as i32, greater_or_equal.0 as i32, NO_NODE, NO_NODE),
        NodeKind::Leaf { locator } => (
            KIND_LEAF,
            NO_NODE,
            NO_NODE,
            locator.page_id.0 as i32,
            locator.slot_id as i32,
        ),
    };

    for field in [
        kind,
        less,
        greater_or_equal,
        NodeId::to_raw(node.parent),
        NodeId::to_raw(node.left_sib),
        NodeId::to_raw(node.right_sib),
        page_index,
        record_index,
    ] {
        buf.write_i32::<LittleEndian>(field)?;
    }
    Ok(buf)
}

/// Record written into a released slot.
pub fn encode_free(key_type: &KeyType) -> StorageResult<Vec<u8>> {
    let mut buf = vec![0u8; key_type.encoded_width()];
    buf.write_i32::<LittleEndian>(KIND_FREE)?;
    for _ in 1..NODE_FIELD_COUNT {
        buf.write_i32::<LittleEndian>(NO_NODE)?;
    }
    Ok(buf)
}

/// Decodes one record; `None` for a released slot.
pub fn decode_node(data: &[u8], key_type: &KeyType) -> StorageResult<Option<BPlusNode>> {
    if data.len() != node_record_size(key_type) {
        return Err(StorageError::CorruptRecord(format!(
            "node record of {} bytes, expected {}",
            data.len(),
            node_record_size(key_type)
        )));
    }

    let (key_bytes, mut fields) = data.split_at(key_type.encoded_width());
    let mut raw = [0i32; NODE_FIELD_COUNT];
    for field in raw.iter_mut() {
        *field = fields.read_i32::<LittleEndian>()?;
    }
    let [kind, less, greater_or_equal, parent, left_sib, right_sib, page_index, record_index] = raw;

    if kind == KIND_FREE {
        return Ok(None);
    }

    let key = key_type.decode(&mut &key_bytes[..])?;
    let kind = match kind {
        KIND_INNER => {
            let less = NodeId::from_raw(less)?;
            let greater_or_equal = NodeId::from_raw(greater_or_equal)?;
            match (less, greater_or_equal) {
                (Some(less), Some(greater_or_equal)) => NodeKind::Inner {
                    less,
                    greater_or_equal,
                },
                _ => {
                    return Err(StorageError::CorruptRecord(
                        "inner node without both children".to_string(),
                    ))
                }
            }
        }
        KIND_LEAF => {
            if page_index < 0 || !(0..=u16::MAX as i32).contains(&record_index) {
                return Err(StorageError::CorruptRecord(format!(
                    "leaf locator ({}, {}) out of range",
                    page_index, record_index
                )));
            }
            NodeKind::Leaf {
                locator: RecordLocator::new(PageId(page_index as u32), record_index as u16),
            }
        }
        other => {
            return Err(StorageError::CorruptRecord(format!(
                "unknown node kind {}",
                other
            )))
        }
    };

    Ok(Some(BPlusNode {
        key,
        parent: NodeId::from_raw(parent)?,
        left_sib: NodeId::from_raw(left_sib)?,
        right_sib: NodeId::from_raw(right_sib)?,
        kind,
    }))
}

/// Writes a single `i32` header field.
pub(crate) fn write_field<W: Write>(out: &mut W, value: i32) -> StorageResult<()> {
    out.write_i32::<LittleEndian>(value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::Value;
    use anyhow::Result;

    fn linked(mut node: BPlusNode) -> BPlusNode {
        node.parent = Some(NodeId(9));
        node.left_sib = Some(NodeId(0));
        node.right_sib = None;
        node
    }

    fn assert_round_trip(node: &BPlusNode, key_type: &KeyType) -> Result<()> {
        let encoded = encode_node(node, key_type)?;
        assert_eq!(encoded.len(), node_record_size(key_type));
        assert_eq!(decode_node(&encoded, key_type)?.as_ref(), Some(node));
        Ok(())
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(node_record_size(&KeyType::integer()), 4 + 32);
        assert_eq!(node_record_size(&KeyType::double()), 8 + 32);
        assert_eq!(node_record_size(&KeyType::boolean()), 1 + 32);
        assert_eq!(node_record_size(&KeyType::varchar(10)), 14 + 32);
    }

    #[test]
    fn test_integer_round_trip() -> Result<()> {
        let key_type = KeyType::integer();
        for key in [i32::MIN, -1, 0, i32::MAX] {
            let leaf = BPlusNode::leaf(Value::Integer(key), RecordLocator::new(PageId(3), 17));
            assert_round_trip(&linked(leaf), &key_type)?;
            let inner = BPlusNode::inner(Value::Integer(key), NodeId(1), NodeId(u32::MAX >> 1));
            assert_round_trip(&inner, &key_type)?;
        }
        Ok(())
    }

    #[test]
    fn test_double_round_trip() -> Result<()> {
        let key_type = KeyType::double();
        for key in [f64::MIN, -0.5, 0.0, f64::MIN_POSITIVE, f64::MAX] {
            let leaf = BPlusNode::leaf(Value::Double(key), RecordLocator::new(PageId(0), 0));
            assert_round_trip(&linked(leaf), &key_type)?;
        }
        Ok(())
    }

    #[test]
    fn test_boolean_round_trip() -> Result<()> {
        let key_type = KeyType::boolean();
        for key in [false, true] {
            let inner = BPlusNode::inner(Value::Boolean(key), NodeId(4), NodeId(5));
            assert_round_trip(&linked(inner), &key_type)?;
        }
        Ok(())
    }

    #[test]
    fn test_string_round_trip() -> Result<()> {
        let key_type = KeyType::varchar(12);
        for key in ["", "a", "a\0", "\0\0", "exactly12byt"] {
            let leaf = BPlusNode::leaf(
                Value::String(key.to_string()),
                RecordLocator::new(PageId(u32::MAX >> 1), u16::MAX),
            );
            assert_round_trip(&leaf, &key_type)?;
        }

        let too_long = BPlusNode::leaf(
            Value::String("thirteen byte".to_string()),
            RecordLocator::new(PageId(0), 0),
        );
        assert!(matches!(
            encode_node(&too_long, &key_type),
            Err(StorageError::CapacityExceeded { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_free_record_decodes_to_none() -> Result<()> {
        let key_type = KeyType::varchar(4);
        let encoded = encode_free(&key_type)?;
        assert_eq!(encoded.len(), node_record_size(&key_type));
        assert_eq!(decode_node(&encoded, &key_type)?, None);
        Ok(())
    }

    #[test]
    fn test_corrupt_records() -> Result<()> {
        let key_type = KeyType::integer();
        let leaf = BPlusNode::leaf(Value::Integer(1), RecordLocator::new(PageId(0), 0));
        let mut encoded = encode_node(&leaf, &key_type)?;

        // Unknown kind
        encoded[4..8].copy_from_slice(&7i32.to_le_bytes());
        assert!(matches!(
            decode_node(&encoded, &key_type),
            Err(StorageError::CorruptRecord(_))
        ));

        // Negative page index on a leaf
        let mut encoded = encode_node(&leaf, &key_type)?;
        let page_offset = 4 + 6 * 4;
        encoded[page_offset..page_offset + 4].copy_from_slice(&(-3i32).to_le_bytes());
        assert!(decode_node(&encoded, &key_type).is_err());

        // Parent handle below the sentinel
        let mut encoded = encode_node(&leaf, &key_type)?;
        encoded[16..20].copy_from_slice(&(-2i32).to_le_bytes());
        assert!(decode_node(&encoded, &key_type).is_err());

        // Truncated record
        assert!(decode_node(&encoded[..10], &key_type).is_err());
        Ok(())
    }
}
