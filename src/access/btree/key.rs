use crate::access::value::{ColumnType, Value};
use crate::storage::error::{StorageError, StorageResult};
use std::cmp::Ordering;

/// Key values stored in the B+Tree. Comparison follows [`Value::compare`].
pub type SearchKey = Value;

/// Type and declared size of a tree's keys; fixes the node record width.
pub type KeyType = ColumnType;

/// Rejects a probe key whose tag differs from the tree's key type.
///
/// Strings longer than the key capacity are not rejected here: they can be
/// looked up (and are never found), but not inserted.
pub fn ensure_key_type(key_type: &KeyType, key: &SearchKey) -> StorageResult<()> {
    if key.data_type() != key_type.data_type {
        return Err(StorageError::TypeMismatch {
            expected: key_type.data_type,
            found: key.data_type(),
        });
    }
    Ok(())
}

pub fn is_less(a: &SearchKey, b: &SearchKey) -> StorageResult<bool> {
    Ok(a.compare(b)? == Ordering::Less)
}
