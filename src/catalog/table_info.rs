//! Table information and metadata structures.

use crate::access::{ColumnType, Value};
use crate::catalog::ColumnInfo;
use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_id: TableId,
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn schema(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.column_type).collect()
    }

    /// Position of the primary-key column, if the table has one.
    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.is_primary_key)
    }

    pub fn primary_key(&self) -> Option<&ColumnInfo> {
        self.primary_key_index().map(|i| &self.columns[i])
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.column_name == name)
    }

    pub fn heap_file_name(&self) -> String {
        format!("{}.tbl", self.table_id)
    }

    pub fn index_file_name(&self) -> String {
        format!("{}.bPlusTree", self.table_id)
    }

    /// Checks arity, types and string capacities of a full record.
    pub fn check_record(&self, values: &[Value]) -> StorageResult<()> {
        if values.len() != self.columns.len() {
            return Err(StorageError::InvalidArgument(format!(
                "table '{}' has {} columns, got {} values",
                self.table_name,
                self.columns.len(),
                values.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(values) {
            column.column_type.check(value)?;
        }
        Ok(())
    }
}
