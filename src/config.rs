use crate::access::btree::MIN_ORDER;
use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BUFFER_POOL_CAPACITY: usize = 64;
pub const DEFAULT_BTREE_ORDER: usize = 4;

/// Tunables fixed when a database is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Resident page frames shared by all tables.
    pub buffer_pool_capacity: usize,
    /// Order of newly created indexes. Existing indexes keep the order in
    /// their file header.
    pub btree_order: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_pool_capacity: DEFAULT_BUFFER_POOL_CAPACITY,
            btree_order: DEFAULT_BTREE_ORDER,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> StorageResult<()> {
        if self.buffer_pool_capacity == 0 {
            return Err(StorageError::InvalidArgument(
                "buffer pool capacity must be at least 1".to_string(),
            ));
        }
        if self.btree_order < MIN_ORDER {
            return Err(StorageError::InvalidArgument(format!(
                "B+Tree order must be at least {}, got {}",
                MIN_ORDER, self.btree_order
            )));
        }
        Ok(())
    }
}
