//! Column information and metadata structures.

use crate::access::{ColumnType, DataType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub column_type: ColumnType,
    pub is_primary_key: bool,
    pub column_order: u32,
}

impl ColumnInfo {
    pub fn new(column_name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            column_name: column_name.into(),
            column_type,
            is_primary_key: false,
            column_order: 0,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn data_type(&self) -> DataType {
        self.column_type.data_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let column = ColumnInfo::new("id", ColumnType::integer()).primary_key();
        assert_eq!(column.column_name, "id");
        assert!(column.is_primary_key);
        assert_eq!(column.data_type(), DataType::Integer);

        let column = ColumnInfo::new("name", ColumnType::varchar(16));
        assert!(!column.is_primary_key);
        assert_eq!(column.column_type.size, 16);
    }
}
