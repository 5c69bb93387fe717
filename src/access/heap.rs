use crate::access::tuple::{Record, RecordLocator};
use crate::access::value::{deserialize_values, record_size, serialize_values, ColumnType, Value};
use crate::catalog::TableId;
use crate::storage::buffer::BufferPool;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::heap_page::MAX_RECORD_SIZE;
use crate::storage::page::{HeapPage, PageId};

/// Manages a table's records across the pages of its heap file.
///
/// Records have a fixed width derived from the schema. Pages stay compact:
/// deleting a record slides the later records on its page down one slot and
/// reports their new locators so indexes can follow them.
pub struct TableHeap {
    table_id: TableId,
    schema: Vec<ColumnType>,
    record_size: usize,
    /// No page below this one has room for another record.
    insert_hint: u32,
}

impl TableHeap {
    pub fn new(table_id: TableId, schema: Vec<ColumnType>) -> StorageResult<Self> {
        let record_size = record_size(&schema);
        if record_size == 0 || record_size > MAX_RECORD_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "record size {} must be in 1..={}",
                record_size, MAX_RECORD_SIZE
            )));
        }

        Ok(Self {
            table_id,
            schema,
            record_size,
            insert_hint: 0,
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn schema(&self) -> &[ColumnType] {
        &self.schema
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Insert a record into the first page with room, appending a page when
    /// every existing one is full.
    pub fn insert(&mut self, pool: &mut BufferPool, values: &[Value]) -> StorageResult<RecordLocator> {
        let data = serialize_values(values, &self.schema)?;
        let page_count = pool.page_count(self.table_id)?;

        let mut page_id = self.insert_hint;
        while page_id < page_count {
            let page = pool.fetch(self.table_id, PageId(page_id))?;
            let view = HeapPage::from_data(&page.data()[..]);
            view.validate(self.record_size)?;

            if view.has_room() {
                let mut heap_page = HeapPage::from_data(&mut page.data_mut()[..]);
                let slot_id = heap_page.push_record(&data)?;
                self.insert_hint = page_id;
                return Ok(RecordLocator::new(PageId(page_id), slot_id));
            }
            page_id += 1;
        }

        let (new_page_id, page) = pool.new_page(self.table_id)?;
        let mut heap_page = HeapPage::new(&mut page.data_mut()[..], new_page_id, self.record_size)?;
        let slot_id = heap_page.push_record(&data)?;
        self.insert_hint = new_page_id.0;

        Ok(RecordLocator::new(new_page_id, slot_id))
    }

    pub fn get(&self, pool: &mut BufferPool, locator: RecordLocator) -> StorageResult<Vec<Value>> {
        let page = pool.fetch(self.table_id, locator.page_id)?;
        let heap_page = HeapPage::from_data(&page.data()[..]);
        heap_page.validate(self.record_size)?;
        deserialize_values(heap_page.record(locator.slot_id)?, &self.schema)
    }

    /// Overwrites a record in place; fixed-width records always fit.
    pub fn update(
        &self,
        pool: &mut BufferPool,
        locator: RecordLocator,
        values: &[Value],
    ) -> StorageResult<()> {
        let data = serialize_values(values, &self.schema)?;
        let page = pool.fetch(self.table_id, locator.page_id)?;
        let mut heap_page = HeapPage::from_data(&mut page.data_mut()[..]);
        heap_page.validate(self.record_size)?;
        heap_page.overwrite_record(locator.slot_id, &data)
    }

    /// Deletes a record and returns the records that compaction moved, at
    /// their new locations.
    pub fn delete(&mut self, pool: &mut BufferPool, locator: RecordLocator) -> StorageResult<Vec<Record>> {
        let page = pool.fetch(self.table_id, locator.page_id)?;
        let mut heap_page = HeapPage::from_data(&mut page.data_mut()[..]);
        heap_page.validate(self.record_size)?;

        let moved = heap_page.remove_record(locator.slot_id)?;
        let mut relocated = Vec::with_capacity(moved as usize);
        for slot_id in locator.slot_id..locator.slot_id + moved {
            let values = deserialize_values(heap_page.record(slot_id)?, &self.schema)?;
            relocated.push(Record::new(RecordLocator::new(locator.page_id, slot_id), values));
        }

        self.insert_hint = self.insert_hint.min(locator.page_id.0);
        Ok(relocated)
    }

    /// All records in heap order.
    pub fn scan(&self, pool: &mut BufferPool) -> StorageResult<Vec<Record>> {
        let page_count = pool.page_count(self.table_id)?;
        let mut records = Vec::new();

        for page_id in (0..page_count).map(PageId) {
            let page = pool.fetch(self.table_id, page_id)?;
            let heap_page = HeapPage::from_data(&page.data()[..]);
            heap_page.validate(self.record_size)?;

            for slot_id in 0..heap_page.record_count() {
                let values = deserialize_values(heap_page.record(slot_id)?, &self.schema)?;
                records.push(Record::new(RecordLocator::new(page_id, slot_id), values));
            }
        }

        Ok(records)
    }
}
