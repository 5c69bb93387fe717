pub mod heap_page;

use crate::catalog::TableId;
use crate::storage::PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

/// A resident page owned by one buffer pool frame.
///
/// `recency` is stamped by the pool on every access. `is_dirty` is set by any
/// mutable access and cleared when the pool writes the page back.
#[derive(Debug)]
pub struct Page {
    table_id: TableId,
    page_id: PageId,
    data: Box<[u8; PAGE_SIZE]>,
    recency: u64,
    is_dirty: bool,
}

impl Page {
    pub(crate) fn new(table_id: TableId, page_id: PageId, data: Box<[u8; PAGE_SIZE]>) -> Self {
        Self {
            table_id,
            page_id,
            data,
            recency: 0,
            is_dirty: false,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn key(&self) -> (TableId, PageId) {
        (self.table_id, self.page_id)
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Mutable view of the page bytes. Marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.is_dirty = true;
        &mut self.data
    }

    pub fn recency(&self) -> u64 {
        self.recency
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub(crate) fn stamp(&mut self, counter: u64) {
        self.recency = counter;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.is_dirty = false;
    }
}

pub use heap_page::HeapPage;
