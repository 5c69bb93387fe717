use crate::access::{BPlusTree, Record, RecordLocator, TableHeap, Value};
use crate::catalog::{Catalog, ColumnInfo, TableId, TableInfo};
use crate::config::EngineConfig;
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::{BufferPool, BufferPoolStats, PageManager};
use log::{info, warn};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Row count and shape of one table, as reported by `verify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub table_id: TableId,
    pub table_name: String,
    pub rows: usize,
    pub pages: u32,
    /// Levels in the primary-key index; `None` without a primary key.
    pub index_height: Option<usize>,
}

/// A table with its heap and, when it has a primary key, its index.
struct OpenTable {
    info: TableInfo,
    heap: TableHeap,
    index: Option<BPlusTree>,
    primary_key: Option<usize>,
}

impl OpenTable {
    fn key_of(&self, values: &[Value]) -> Option<Value> {
        self.primary_key.and_then(|i| values.get(i).cloned())
    }

    fn insert(&mut self, pool: &mut BufferPool, values: &[Value]) -> StorageResult<RecordLocator> {
        self.info.check_record(values)?;

        let key = self.key_of(values);
        if let (Some(index), Some(key)) = (self.index.as_ref(), key.as_ref()) {
            if index.contains(key)? {
                return Err(StorageError::DuplicateKey(key.to_string()));
            }
        }

        let locator = self.heap.insert(pool, values)?;
        if let (Some(index), Some(key)) = (self.index.as_mut(), key) {
            if let Err(e) = index.insert(key, locator) {
                // Appended records sit last on their page, so nothing moves
                self.heap.delete(pool, locator)?;
                return Err(e);
            }
        }
        Ok(locator)
    }

    fn select_all(&self, pool: &mut BufferPool) -> StorageResult<Vec<Record>> {
        let Some(index) = self.index.as_ref() else {
            return self.heap.scan(pool);
        };

        let mut records = Vec::with_capacity(index.len());
        for (_, locator) in index.entries()? {
            records.push(Record::new(locator, self.heap.get(pool, locator)?));
        }
        Ok(records)
    }

    fn select_by_key(&self, pool: &mut BufferPool, key: &Value) -> StorageResult<Option<Record>> {
        let Some(index) = self.index.as_ref() else {
            return Err(no_primary_key(&self.info));
        };
        match index.get(key)? {
            Some(locator) => Ok(Some(Record::new(locator, self.heap.get(pool, locator)?))),
            None => Ok(None),
        }
    }

    fn delete_by_key(&mut self, pool: &mut BufferPool, key: &Value) -> StorageResult<Record> {
        let (index, position) = match (self.index.as_mut(), self.primary_key) {
            (Some(index), Some(position)) => (index, position),
            _ => return Err(no_primary_key(&self.info)),
        };

        let locator = index
            .get(key)?
            .ok_or_else(|| StorageError::NotFound(format!("key {}", key)))?;
        let values = self.heap.get(pool, locator)?;
        index.delete(key)?;

        let relocated = match self.heap.delete(pool, locator) {
            Ok(relocated) => relocated,
            Err(e) => {
                index.insert(key.clone(), locator)?;
                return Err(e);
            }
        };
        for moved in relocated {
            let moved_key = moved
                .values
                .get(position)
                .ok_or_else(|| StorageError::CorruptRecord("record without its key column".to_string()))?;
            index.update_pointer(moved_key, moved.locator)?;
        }
        Ok(Record::new(locator, values))
    }

    fn update_record(
        &mut self,
        pool: &mut BufferPool,
        key: &Value,
        values: &[Value],
    ) -> StorageResult<RecordLocator> {
        self.info.check_record(values)?;
        let (index, position) = match (self.index.as_mut(), self.primary_key) {
            (Some(index), Some(position)) => (index, position),
            _ => return Err(no_primary_key(&self.info)),
        };

        let locator = index
            .get(key)?
            .ok_or_else(|| StorageError::NotFound(format!("key {}", key)))?;
        let new_key = &values[position];

        if new_key.compare(key)? == Ordering::Equal {
            self.heap.update(pool, locator, values)?;
            return Ok(locator);
        }

        if index.contains(new_key)? {
            return Err(StorageError::DuplicateKey(new_key.to_string()));
        }

        // Index is re-keyed before the heap changes; each failure undoes the
        // steps before it
        index.insert(new_key.clone(), locator)?;
        if let Err(e) = index.delete(key) {
            index.delete(new_key)?;
            return Err(e);
        }
        if let Err(e) = self.heap.update(pool, locator, values) {
            index.delete(new_key)?;
            index.insert(key.clone(), locator)?;
            return Err(e);
        }
        Ok(locator)
    }

    /// Cross-checks the index against the heap.
    fn verify(&self, pool: &mut BufferPool) -> StorageResult<TableSummary> {
        let records = self.heap.scan(pool)?;

        let index_height = match (self.index.as_ref(), self.primary_key) {
            (Some(index), Some(position)) => {
                index.check_invariants()?;
                if index.len() != records.len() {
                    return Err(StorageError::CorruptRecord(format!(
                        "table '{}' holds {} records but its index {} keys",
                        self.info.table_name,
                        records.len(),
                        index.len()
                    )));
                }
                for record in &records {
                    let key = &record.values[position];
                    if index.get(key)? != Some(record.locator) {
                        return Err(StorageError::CorruptRecord(format!(
                            "index entry for key {} does not point at {}",
                            key, record.locator
                        )));
                    }
                }
                Some(index.height()?)
            }
            _ => None,
        };

        Ok(TableSummary {
            table_id: self.info.table_id,
            table_name: self.info.table_name.clone(),
            rows: records.len(),
            pages: pool.page_count(self.info.table_id)?,
            index_height,
        })
    }
}

fn no_primary_key(info: &TableInfo) -> StorageError {
    StorageError::InvalidArgument(format!("table '{}' has no primary key", info.table_name))
}

/// A data directory holding the catalog plus one heap file and at most one
/// index file per table.
pub struct Database {
    dir: PathBuf,
    config: EngineConfig,
    pool: BufferPool,
    catalog: Catalog,
    tables: HashMap<TableId, OpenTable>,
}

impl Database {
    /// Opens the database in `dir`, creating the directory and an empty
    /// catalog when they do not exist yet.
    pub fn open(dir: &Path, config: EngineConfig) -> StorageResult<Self> {
        config.validate()?;
        fs::create_dir_all(dir)?;

        let catalog = Catalog::open(dir)?;
        let pool = BufferPool::new(Box::new(LruReplacer::new()), config.buffer_pool_capacity)?;
        let mut db = Self {
            dir: dir.to_path_buf(),
            config,
            pool,
            catalog,
            tables: HashMap::new(),
        };

        let infos: Vec<TableInfo> = db.catalog.list_tables().into_iter().cloned().collect();
        for info in infos {
            let store = PageManager::open(&db.dir.join(info.heap_file_name()))?;
            let index = match info.primary_key() {
                Some(_) => Some(BPlusTree::open(&db.dir.join(info.index_file_name()))?),
                None => None,
            };
            db.attach(info, store, index)?;
        }

        info!(
            "opened database at {:?} with {} tables",
            db.dir,
            db.tables.len()
        );
        Ok(db)
    }

    fn attach(
        &mut self,
        info: TableInfo,
        store: PageManager,
        index: Option<BPlusTree>,
    ) -> StorageResult<()> {
        let heap = TableHeap::new(info.table_id, info.schema())?;
        self.pool.register_table(info.table_id, store);
        let primary_key = info.primary_key_index();
        self.tables.insert(
            info.table_id,
            OpenTable {
                info,
                heap,
                index,
                primary_key,
            },
        );
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> BufferPoolStats {
        self.pool.stats()
    }

    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnInfo>) -> StorageResult<TableInfo> {
        let info = self.catalog.create_table(name, columns)?;

        if let Err(e) = self.create_files(&info) {
            if let Err(undo) = self.catalog.drop_table(name) {
                warn!("could not remove table '{}' after failed create: {}", name, undo);
            }
            return Err(e);
        }
        Ok(info)
    }

    fn create_files(&mut self, info: &TableInfo) -> StorageResult<()> {
        let store = PageManager::create(&self.dir.join(info.heap_file_name()))?;
        let index = match info.primary_key() {
            Some(column) => Some(BPlusTree::create(
                &self.dir.join(info.index_file_name()),
                column.column_type,
                self.config.btree_order,
            )?),
            None => None,
        };
        self.attach(info.clone(), store, index)
    }

    /// Removes a table along with its heap and index files.
    pub fn drop_table(&mut self, name: &str) -> StorageResult<()> {
        let info = self.catalog.drop_table(name)?;
        self.pool.unregister_table(info.table_id);

        if let Some(table) = self.tables.remove(&info.table_id) {
            if let Some(index) = table.index {
                index.destroy()?;
            }
        }
        fs::remove_file(self.dir.join(info.heap_file_name()))?;
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Option<&TableInfo> {
        self.catalog.get_table(name)
    }

    /// All tables in id order.
    pub fn list_tables(&self) -> Vec<&TableInfo> {
        self.catalog.list_tables()
    }

    pub fn insert_record(&mut self, table: &str, values: Vec<Value>) -> StorageResult<RecordLocator> {
        let (open, pool) = self.open_table(table)?;
        open.insert(pool, &values)
    }

    /// Every record, in primary-key order when the table has a primary key
    /// and in heap order otherwise.
    pub fn select_all(&mut self, table: &str) -> StorageResult<Vec<Record>> {
        let (open, pool) = self.open_table(table)?;
        open.select_all(pool)
    }

    pub fn select_by_key(&mut self, table: &str, key: &Value) -> StorageResult<Option<Record>> {
        let (open, pool) = self.open_table(table)?;
        open.select_by_key(pool, key)
    }

    /// Deletes the record with primary key `key` and returns it.
    pub fn delete_by_key(&mut self, table: &str, key: &Value) -> StorageResult<Record> {
        let (open, pool) = self.open_table(table)?;
        open.delete_by_key(pool, key)
    }

    /// Replaces the record with primary key `key`. The record keeps its
    /// location; a changed primary key is re-keyed in the index.
    pub fn update_record(
        &mut self,
        table: &str,
        key: &Value,
        values: Vec<Value>,
    ) -> StorageResult<RecordLocator> {
        let (open, pool) = self.open_table(table)?;
        open.update_record(pool, key, &values)
    }

    pub fn row_count(&mut self, table: &str) -> StorageResult<usize> {
        let (open, pool) = self.open_table(table)?;
        match open.index.as_ref() {
            Some(index) => Ok(index.len()),
            None => Ok(open.heap.scan(pool)?.len()),
        }
    }

    /// Checks every index against its heap. Stops at the first fault.
    pub fn verify(&mut self) -> StorageResult<Vec<TableSummary>> {
        let mut ids: Vec<TableId> = self.tables.keys().copied().collect();
        ids.sort();

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(table) = self.tables.get(&id) {
                summaries.push(table.verify(&mut self.pool)?);
            }
        }
        Ok(summaries)
    }

    /// Writes every dirty page and syncs all files.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.pool.flush_all()?;
        for table in self.tables.values_mut() {
            if let Some(index) = table.index.as_mut() {
                index.sync()?;
            }
        }
        info!("flushed database at {:?}", self.dir);
        Ok(())
    }

    fn open_table(&mut self, name: &str) -> StorageResult<(&mut OpenTable, &mut BufferPool)> {
        let table_id = self
            .catalog
            .get_table(name)
            .map(|info| info.table_id)
            .ok_or_else(|| StorageError::NotFound(format!("table '{}'", name)))?;
        let table = self
            .tables
            .get_mut(&table_id)
            .ok_or_else(|| StorageError::NotFound(format!("table '{}' is not open", name)))?;
        Ok((table, &mut self.pool))
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best effort flush on drop
        if let Err(e) = self.flush() {
            warn!("flush of {:?} on close failed: {}", self.dir, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::ColumnType;
    use crate::storage::PageId;
    use anyhow::Result;
    use tempfile::tempdir;

    fn users() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", ColumnType::integer()).primary_key(),
            ColumnInfo::new("name", ColumnType::varchar(16)),
            ColumnInfo::new("active", ColumnType::boolean()),
        ]
    }

    fn user(id: i32, name: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::String(name.into()), Value::Boolean(true)]
    }

    fn ids(records: &[Record]) -> Vec<i32> {
        records
            .iter()
            .filter_map(|r| match r.values[0] {
                Value::Integer(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_create_and_list_tables() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        db.create_table("users", users())?;
        db.create_table("log", vec![ColumnInfo::new("line", ColumnType::varchar(32))])?;

        let names: Vec<_> = db.list_tables().iter().map(|t| t.table_name.clone()).collect();
        assert_eq!(names, vec!["users", "log"]);
        assert!(dir.path().join("1.tbl").exists());
        assert!(dir.path().join("1.bPlusTree").exists());
        assert!(dir.path().join("2.tbl").exists());
        assert!(!dir.path().join("2.bPlusTree").exists());
        Ok(())
    }

    #[test]
    fn test_select_all_in_key_order() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        db.create_table("users", users())?;

        for id in [5, 1, 4, 2, 3] {
            db.insert_record("users", user(id, "u"))?;
        }
        assert_eq!(ids(&db.select_all("users")?), vec![1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_duplicate_primary_key() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        db.create_table("users", users())?;

        db.insert_record("users", user(1, "ann"))?;
        let result = db.insert_record("users", user(1, "bob"));
        assert!(matches!(result, Err(StorageError::DuplicateKey(_))));
        assert_eq!(db.row_count("users")?, 1);
        Ok(())
    }

    #[test]
    fn test_delete_keeps_index_in_step() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        db.create_table("users", users())?;
        for id in 1..=6 {
            db.insert_record("users", user(id, "u"))?;
        }

        // Records after the deleted one slide down within the page
        let deleted = db.delete_by_key("users", &Value::Integer(2))?;
        assert_eq!(deleted.values, user(2, "u"));

        let record = db.select_by_key("users", &Value::Integer(6))?.expect("key 6 is present");
        assert_eq!(record.values, user(6, "u"));
        assert_eq!(record.locator.slot_id, 4);
        assert_eq!(db.select_by_key("users", &Value::Integer(2))?, None);
        db.verify()?;
        Ok(())
    }

    #[test]
    fn test_update_record() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        db.create_table("users", users())?;
        db.insert_record("users", user(1, "ann"))?;
        db.insert_record("users", user(2, "bob"))?;

        db.update_record("users", &Value::Integer(1), user(1, "anne"))?;
        let record = db.select_by_key("users", &Value::Integer(1))?.expect("key 1 is present");
        assert_eq!(record.values[1], Value::String("anne".into()));

        // Changing the key moves the index entry, not the record
        let locator = db.update_record("users", &Value::Integer(1), user(10, "anne"))?;
        assert_eq!(db.select_by_key("users", &Value::Integer(1))?, None);
        assert_eq!(
            db.select_by_key("users", &Value::Integer(10))?.map(|r| r.locator),
            Some(locator)
        );

        let result = db.update_record("users", &Value::Integer(10), user(2, "x"));
        assert!(matches!(result, Err(StorageError::DuplicateKey(_))));
        db.verify()?;
        Ok(())
    }

    fn damage_first_page(db: &mut Database) -> Result<()> {
        // Flip the record size in the heap page header
        db.pool.fetch(TableId(1), PageId(0))?.data_mut()[4] ^= 0xFF;
        Ok(())
    }

    fn index_of(db: &Database) -> &BPlusTree {
        db.tables[&TableId(1)].index.as_ref().expect("users has an index")
    }

    #[test]
    fn test_failed_rekey_leaves_index_unchanged() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        db.create_table("users", users())?;
        let locator = db.insert_record("users", user(1, "ann"))?;
        db.insert_record("users", user(2, "bob"))?;

        damage_first_page(&mut db)?;
        let result = db.update_record("users", &Value::Integer(1), user(10, "ann"));
        assert!(matches!(result, Err(StorageError::CorruptRecord(_))));
        assert_eq!(index_of(&db).get(&Value::Integer(1))?, Some(locator));
        assert_eq!(index_of(&db).get(&Value::Integer(10))?, None);
        index_of(&db).check_invariants()?;

        damage_first_page(&mut db)?;
        db.verify()?;
        assert_eq!(
            db.select_by_key("users", &Value::Integer(1))?.map(|r| r.values),
            Some(user(1, "ann"))
        );
        Ok(())
    }

    #[test]
    fn test_failed_delete_keeps_index_entry() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        db.create_table("users", users())?;
        let locator = db.insert_record("users", user(1, "ann"))?;

        damage_first_page(&mut db)?;
        assert!(db.delete_by_key("users", &Value::Integer(1)).is_err());
        assert_eq!(index_of(&db).get(&Value::Integer(1))?, Some(locator));

        damage_first_page(&mut db)?;
        db.verify()?;
        assert_eq!(db.row_count("users")?, 1);
        Ok(())
    }

    #[test]
    fn test_table_without_primary_key() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        db.create_table("log", vec![ColumnInfo::new("line", ColumnType::varchar(32))])?;

        db.insert_record("log", vec![Value::String("b".into())])?;
        db.insert_record("log", vec![Value::String("a".into())])?;
        let lines: Vec<_> = db.select_all("log")?.into_iter().map(|r| r.values).collect();
        assert_eq!(
            lines,
            vec![vec![Value::String("b".into())], vec![Value::String("a".into())]]
        );

        assert!(matches!(
            db.delete_by_key("log", &Value::String("a".into())),
            Err(StorageError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_unknown_table() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        assert!(matches!(
            db.select_all("ghost"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            db.drop_table("ghost"),
            Err(StorageError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_drop_table_removes_files() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        db.create_table("users", users())?;
        db.insert_record("users", user(1, "ann"))?;

        db.drop_table("users")?;
        assert!(db.list_tables().is_empty());
        assert!(!dir.path().join("1.tbl").exists());
        assert!(!dir.path().join("1.bPlusTree").exists());
        Ok(())
    }

    #[test]
    fn test_reopen() -> Result<()> {
        let dir = tempdir()?;
        {
            let mut db = Database::open(dir.path(), EngineConfig::default())?;
            db.create_table("users", users())?;
            for id in 0..50 {
                db.insert_record("users", user(id, "u"))?;
            }
            db.delete_by_key("users", &Value::Integer(7))?;
        }

        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        assert_eq!(db.row_count("users")?, 49);
        assert_eq!(db.select_by_key("users", &Value::Integer(7))?, None);
        assert_eq!(
            db.select_by_key("users", &Value::Integer(8))?.map(|r| r.values),
            Some(user(8, "u"))
        );
        let summaries = db.verify()?;
        assert_eq!(summaries[0].rows, 49);
        Ok(())
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempdir().unwrap();
        let config = EngineConfig {
            buffer_pool_capacity: 0,
            ..Default::default()
        };
        assert!(Database::open(dir.path(), config).is_err());
    }
}
