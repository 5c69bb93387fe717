//! Schema manager: which tables exist and what their columns are.
//!
//! The catalog is small and rewritten whole on every change, so it lives in
//! a single `catalog.bin` file rather than in table pages.

pub mod column_info;
pub mod table_info;

pub use column_info::ColumnInfo;
pub use table_info::{TableId, TableInfo};

use crate::access::DataType;
use crate::storage::error::{StorageError, StorageResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CATALOG_FILE_NAME: &str = "catalog.bin";

/// First id handed to a user table.
pub const FIRST_TABLE_ID: TableId = TableId(1);

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    next_table_id: TableId,
    tables: Vec<TableInfo>,
}

#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    tables: BTreeMap<TableId, TableInfo>,
    next_table_id: TableId,
}

impl Catalog {
    /// Loads the catalog in `dir`, creating an empty one if none exists.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        let path = dir.join(CATALOG_FILE_NAME);
        if !path.exists() {
            let catalog = Self {
                path,
                tables: BTreeMap::new(),
                next_table_id: FIRST_TABLE_ID,
            };
            catalog.save()?;
            return Ok(catalog);
        }

        let file: CatalogFile = bincode::deserialize(&fs::read(&path)?)?;
        let mut tables = BTreeMap::new();
        for table in file.tables {
            if table.table_id >= file.next_table_id {
                return Err(StorageError::CorruptRecord(format!(
                    "table id {} not below next id {}",
                    table.table_id, file.next_table_id
                )));
            }
            tables.insert(table.table_id, table);
        }

        Ok(Self {
            path,
            tables,
            next_table_id: file.next_table_id,
        })
    }

    fn save(&self) -> StorageResult<()> {
        let file = CatalogFile {
            next_table_id: self.next_table_id,
            tables: self.tables.values().cloned().collect(),
        };
        let data = bincode::serialize(&file)?;

        // Old catalog stays in place until the rename
        let tmp = self.path.with_extension("bin.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Registers a new table. Column order is assigned from position.
    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnInfo>) -> StorageResult<TableInfo> {
        if name.is_empty() {
            return Err(StorageError::InvalidArgument("table name is empty".to_string()));
        }
        if self.get_table(name).is_some() {
            return Err(StorageError::InvalidArgument(format!(
                "table '{}' already exists",
                name
            )));
        }
        validate_columns(name, &columns)?;

        let table_id = self.next_table_id;
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, mut column)| {
                column.column_order = i as u32;
                column
            })
            .collect();
        let info = TableInfo {
            table_id,
            table_name: name.to_string(),
            columns,
        };

        self.next_table_id = TableId(table_id.0 + 1);
        self.tables.insert(table_id, info.clone());
        self.save()?;

        info!("created table '{}' with id {}", name, table_id);
        Ok(info)
    }

    pub fn drop_table(&mut self, name: &str) -> StorageResult<TableInfo> {
        let table_id = self
            .get_table(name)
            .map(|info| info.table_id)
            .ok_or_else(|| StorageError::NotFound(format!("table '{}'", name)))?;

        let info = self
            .tables
            .remove(&table_id)
            .ok_or_else(|| StorageError::NotFound(format!("table '{}'", name)))?;
        self.save()?;

        info!("dropped table '{}' with id {}", name, table_id);
        Ok(info)
    }

    pub fn get_table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.values().find(|t| t.table_name == name)
    }

    pub fn get_table_by_id(&self, table_id: TableId) -> Option<&TableInfo> {
        self.tables.get(&table_id)
    }

    /// All tables in id order.
    pub fn list_tables(&self) -> Vec<&TableInfo> {
        self.tables.values().collect()
    }
}

fn validate_columns(table: &str, columns: &[ColumnInfo]) -> StorageResult<()> {
    if columns.is_empty() {
        return Err(StorageError::InvalidArgument(format!(
            "table '{}' has no columns",
            table
        )));
    }

    for (i, column) in columns.iter().enumerate() {
        if column.column_name.is_empty() {
            return Err(StorageError::InvalidArgument(format!(
                "column {} of '{}' has no name",
                i, table
            )));
        }
        if columns[..i].iter().any(|c| c.column_name == column.column_name) {
            return Err(StorageError::InvalidArgument(format!(
                "column '{}' appears twice in '{}'",
                column.column_name, table
            )));
        }
        if column.data_type() == DataType::Varchar && column.column_type.size == 0 {
            return Err(StorageError::InvalidArgument(format!(
                "string column '{}' needs a capacity",
                column.column_name
            )));
        }
    }

    if columns.iter().filter(|c| c.is_primary_key).count() > 1 {
        return Err(StorageError::InvalidArgument(format!(
            "table '{}' declares more than one primary key",
            table
        )));
    }
    Ok(())
}
