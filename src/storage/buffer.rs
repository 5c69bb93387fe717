pub mod lru;
pub mod replacer;

use crate::catalog::TableId;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::{Page, PageId, PageManager, PAGE_SIZE};
use log::debug;
use replacer::{FrameId, Replacer};
use std::collections::HashMap;

/// Counters describing how the pool has been used since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub write_backs: u64,
}

/// Bounded cache of pages keyed by `(TableId, PageId)`.
///
/// At most one frame holds a given key. Every access stamps the page with
/// the next value of `access_counter`, which starts at zero when the pool is
/// built and only ever increases, so recency comparisons never tie between
/// distinct accesses. Dirty pages are written back on eviction and on flush.
pub struct BufferPool {
    frames: Vec<Page>,
    stores: HashMap<TableId, PageManager>,
    replacer: Box<dyn Replacer>,
    capacity: usize,
    access_counter: u64,
    stats: BufferPoolStats,
}

impl BufferPool {
    pub fn new(replacer: Box<dyn Replacer>, capacity: usize) -> StorageResult<Self> {
        if capacity == 0 {
            return Err(StorageError::InvalidArgument(
                "buffer pool capacity must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            frames: Vec::with_capacity(capacity),
            stores: HashMap::new(),
            replacer,
            capacity,
            access_counter: 0,
            stats: BufferPoolStats::default(),
        })
    }

    /// Attaches the backing file for a table.
    pub fn register_table(&mut self, table_id: TableId, store: PageManager) {
        self.stores.insert(table_id, store);
    }

    /// Detaches a table, discarding its resident pages without writing them.
    pub fn unregister_table(&mut self, table_id: TableId) -> Option<PageManager> {
        self.frames.retain(|page| page.table_id() != table_id);
        self.stores.remove(&table_id)
    }

    pub fn page_count(&self, table_id: TableId) -> StorageResult<u32> {
        Ok(self.store(table_id)?.block_count())
    }

    /// Returns the resident copy of a page, reading it in on a miss.
    pub fn fetch(&mut self, table_id: TableId, page_id: PageId) -> StorageResult<&mut Page> {
        let counter = self.next_counter();

        if let Some(frame_id) = self.find_frame(table_id, page_id) {
            self.stats.hits += 1;
            let page = &mut self.frames[frame_id];
            page.stamp(counter);
            return Ok(page);
        }

        self.stats.misses += 1;
        let mut data = Box::new([0u8; PAGE_SIZE]);
        self.store_mut(table_id)?.read_block(page_id, &mut data[..])?;

        let mut page = Page::new(table_id, page_id, data);
        page.stamp(counter);
        let frame_id = self.install(page)?;
        Ok(&mut self.frames[frame_id])
    }

    /// Appends a zeroed page to the table's file and returns it resident and
    /// dirty.
    pub fn new_page(&mut self, table_id: TableId) -> StorageResult<(PageId, &mut Page)> {
        let page_id = self.store_mut(table_id)?.allocate_block()?;
        let counter = self.next_counter();

        let mut page = Page::new(table_id, page_id, Box::new([0u8; PAGE_SIZE]));
        page.stamp(counter);
        page.mark_dirty();
        let frame_id = self.install(page)?;
        Ok((page_id, &mut self.frames[frame_id]))
    }

    /// Marks a resident page dirty. Write-back is deferred to eviction or
    /// flush.
    pub fn mark_dirty(&mut self, table_id: TableId, page_id: PageId) -> StorageResult<()> {
        let frame_id = self
            .find_frame(table_id, page_id)
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "table {} page {} is not resident",
                    table_id.0, page_id.0
                ))
            })?;
        self.frames[frame_id].mark_dirty();
        Ok(())
    }

    /// Writes back every dirty resident page. Nothing is evicted.
    pub fn flush_all(&mut self) -> StorageResult<()> {
        let tables: Vec<TableId> = self.stores.keys().copied().collect();
        for table_id in tables {
            self.flush_table(table_id)?;
        }
        Ok(())
    }

    pub fn flush_table(&mut self, table_id: TableId) -> StorageResult<()> {
        let Self {
            frames,
            stores,
            stats,
            ..
        } = self;
        let store = stores
            .get_mut(&table_id)
            .ok_or_else(|| StorageError::NotFound(format!("table {} has no page store", table_id.0)))?;

        for page in frames
            .iter_mut()
            .filter(|page| page.table_id() == table_id && page.is_dirty())
        {
            store.write_block(page.page_id(), page.data())?;
            page.clear_dirty();
            stats.write_backs += 1;
        }
        store.sync()
    }

    pub fn is_resident(&self, table_id: TableId, page_id: PageId) -> bool {
        self.find_frame(table_id, page_id).is_some()
    }

    pub fn resident_count(&self) -> usize {
        self.frames.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferPoolStats {
        self.stats
    }

    /// Resident pages in frame order.
    pub fn resident_pages(&self) -> impl Iterator<Item = &Page> {
        self.frames.iter()
    }

    fn find_frame(&self, table_id: TableId, page_id: PageId) -> Option<FrameId> {
        self.frames
            .iter()
            .position(|page| page.table_id() == table_id && page.page_id() == page_id)
    }

    /// Places a page in a free frame, evicting a victim when full.
    fn install(&mut self, page: Page) -> StorageResult<FrameId> {
        if self.frames.len() < self.capacity {
            self.frames.push(page);
            return Ok(self.frames.len() - 1);
        }

        let frame_id = self
            .replacer
            .victim(&self.frames)
            .ok_or_else(|| StorageError::InvalidArgument("no frame available for eviction".to_string()))?;

        let victim = &self.frames[frame_id];
        debug!(
            "{} evicting table {} page {} (recency {}, dirty {})",
            self.replacer.name(),
            victim.table_id().0,
            victim.page_id().0,
            victim.recency(),
            victim.is_dirty()
        );

        if victim.is_dirty() {
            let (table_id, page_id) = victim.key();
            let store = self
                .stores
                .get_mut(&table_id)
                .ok_or_else(|| StorageError::NotFound(format!("table {} has no page store", table_id.0)))?;
            store.write_block(page_id, self.frames[frame_id].data())?;
            self.stats.write_backs += 1;
        }

        self.stats.evictions += 1;
        self.frames[frame_id] = page;
        Ok(frame_id)
    }

    fn next_counter(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    fn store(&self, table_id: TableId) -> StorageResult<&PageManager> {
        self.stores
            .get(&table_id)
            .ok_or_else(|| StorageError::NotFound(format!("table {} has no page store", table_id.0)))
    }

    fn store_mut(&mut self, table_id: TableId) -> StorageResult<&mut PageManager> {
        self.stores
            .get_mut(&table_id)
            .ok_or_else(|| StorageError::NotFound(format!("table {} has no page store", table_id.0)))
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity)
            .field("resident", &self.frames.len())
            .field("access_counter", &self.access_counter)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashSet;
    use tempfile::{tempdir, TempDir};

    const T: TableId = TableId(1);

    fn create_test_buffer_pool(capacity: usize, pages: u32) -> Result<(TempDir, BufferPool)> {
        let dir = tempdir()?;
        let mut store = PageManager::create(&dir.path().join("1.tbl"))?;
        for i in 0..pages {
            let mut buf = vec![0u8; PAGE_SIZE];
            buf[0] = i as u8;
            store.write_block(PageId(i), &buf)?;
        }

        let mut pool = BufferPool::new(Box::new(lru::LruReplacer::new()), capacity)?;
        pool.register_table(T, store);
        Ok((dir, pool))
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(BufferPool::new(Box::new(lru::LruReplacer::new()), 0).is_err());
    }

    #[test]
    fn test_fetch_hit_and_miss() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(4, 2)?;

        assert_eq!(pool.fetch(T, PageId(1))?.data()[0], 1);
        assert_eq!(pool.fetch(T, PageId(1))?.data()[0], 1);
        assert_eq!(pool.fetch(T, PageId(0))?.data()[0], 0);

        let stats = pool.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(pool.resident_count(), 2);
        Ok(())
    }

    #[test]
    fn test_exact_key_match() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(4, 3)?;

        pool.fetch(T, PageId(0))?;
        // A different page must not be served from the first resident frame
        assert_eq!(pool.fetch(T, PageId(2))?.page_id(), PageId(2));
        assert_eq!(pool.fetch(T, PageId(2))?.data()[0], 2);
        Ok(())
    }

    #[test]
    fn test_lru_eviction_order() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(2, 4)?;

        pool.fetch(T, PageId(1))?;
        pool.fetch(T, PageId(2))?;
        pool.fetch(T, PageId(3))?;

        assert!(!pool.is_resident(T, PageId(1)));
        assert!(pool.is_resident(T, PageId(2)));
        assert!(pool.is_resident(T, PageId(3)));

        let misses = pool.stats().misses;
        pool.fetch(T, PageId(1))?;
        assert_eq!(pool.stats().misses, misses + 1);
        assert!(!pool.is_resident(T, PageId(2)));
        Ok(())
    }

    #[test]
    fn test_access_refreshes_recency() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(2, 4)?;

        pool.fetch(T, PageId(0))?;
        pool.fetch(T, PageId(1))?;
        pool.fetch(T, PageId(0))?;
        pool.fetch(T, PageId(2))?;

        // Page 1 was least recently touched
        assert!(pool.is_resident(T, PageId(0)));
        assert!(!pool.is_resident(T, PageId(1)));
        Ok(())
    }

    #[test]
    fn test_reused_frame_evicted_by_recency_not_position() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(2, 4)?;

        pool.fetch(T, PageId(0))?;
        pool.fetch(T, PageId(1))?;
        // Page 2 takes over frame 0
        pool.fetch(T, PageId(2))?;
        pool.fetch(T, PageId(3))?;

        assert!(!pool.is_resident(T, PageId(1)));
        assert!(pool.is_resident(T, PageId(2)));
        assert!(pool.is_resident(T, PageId(3)));
        Ok(())
    }

    #[test]
    fn test_dirty_page_written_back_on_eviction() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(1, 2)?;

        pool.fetch(T, PageId(0))?.data_mut()[10] = 77;
        pool.fetch(T, PageId(1))?;
        assert_eq!(pool.stats().write_backs, 1);

        assert_eq!(pool.fetch(T, PageId(0))?.data()[10], 77);
        Ok(())
    }

    #[test]
    fn test_clean_page_not_written_back() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(1, 2)?;

        pool.fetch(T, PageId(0))?;
        pool.fetch(T, PageId(1))?;
        assert_eq!(pool.stats().write_backs, 0);
        assert_eq!(pool.stats().evictions, 1);
        Ok(())
    }

    #[test]
    fn test_mark_dirty_defers_write() -> Result<()> {
        let (dir, mut pool) = create_test_buffer_pool(4, 1)?;

        {
            let page = pool.fetch(T, PageId(0))?;
            page.data_mut()[1] = 5;
        }
        pool.mark_dirty(T, PageId(0))?;
        assert!(pool.mark_dirty(T, PageId(9)).is_err());

        // Nothing reached the file yet
        let mut buf = vec![0u8; PAGE_SIZE];
        PageManager::open(&dir.path().join("1.tbl"))?.read_block(PageId(0), &mut buf)?;
        assert_eq!(buf[1], 0);

        pool.flush_all()?;
        PageManager::open(&dir.path().join("1.tbl"))?.read_block(PageId(0), &mut buf)?;
        assert_eq!(buf[1], 5);
        Ok(())
    }

    #[test]
    fn test_flush_all_keeps_pages_resident() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(4, 3)?;

        for i in 0..3 {
            pool.fetch(T, PageId(i))?.data_mut()[0] = 50 + i as u8;
        }
        pool.flush_all()?;

        assert_eq!(pool.resident_count(), 3);
        assert!(pool.resident_pages().all(|page| !page.is_dirty()));
        assert_eq!(pool.stats().write_backs, 3);
        Ok(())
    }

    #[test]
    fn test_new_page() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(2, 0)?;

        let (page_id, page) = pool.new_page(T)?;
        assert_eq!(page_id, PageId(0));
        assert!(page.is_dirty());
        page.data_mut()[0] = 42;

        pool.new_page(T)?;
        pool.new_page(T)?;
        assert_eq!(pool.page_count(T)?, 3);

        // Page 0 was evicted and must have been persisted
        assert_eq!(pool.fetch(T, PageId(0))?.data()[0], 42);
        Ok(())
    }

    #[test]
    fn test_fetch_missing_page_fails() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(2, 1)?;
        assert!(matches!(
            pool.fetch(T, PageId(5)),
            Err(StorageError::OutOfRange(_))
        ));
        assert!(pool.fetch(TableId(99), PageId(0)).is_err());
        Ok(())
    }

    #[test]
    fn test_pages_of_different_tables() -> Result<()> {
        let (dir, mut pool) = create_test_buffer_pool(4, 1)?;
        let mut other = PageManager::create(&dir.path().join("2.tbl"))?;
        other.write_block(PageId(0), &vec![9u8; PAGE_SIZE])?;
        pool.register_table(TableId(2), other);

        assert_eq!(pool.fetch(T, PageId(0))?.data()[0], 0);
        assert_eq!(pool.fetch(TableId(2), PageId(0))?.data()[0], 9);
        assert_eq!(pool.resident_count(), 2);

        assert!(pool.unregister_table(TableId(2)).is_some());
        assert_eq!(pool.resident_count(), 1);
        assert!(!pool.is_resident(TableId(2), PageId(0)));
        Ok(())
    }

    #[test]
    fn test_capacity_bound_and_single_residency() -> Result<()> {
        let (_dir, mut pool) = create_test_buffer_pool(3, 8)?;
        let pattern = [0u32, 1, 2, 0, 3, 4, 1, 1, 5, 6, 7, 0, 2, 2, 3];

        for page_id in pattern {
            let before: Vec<(PageId, u64)> = pool
                .resident_pages()
                .map(|page| (page.page_id(), page.recency()))
                .collect();
            let was_resident = pool.is_resident(T, PageId(page_id));
            let evictions = pool.stats().evictions;

            pool.fetch(T, PageId(page_id))?;

            assert!(pool.resident_count() <= pool.capacity());
            let keys: HashSet<_> = pool.resident_pages().map(|page| page.key()).collect();
            assert_eq!(keys.len(), pool.resident_count());

            if pool.stats().evictions > evictions {
                assert!(!was_resident);
                let (oldest, _) = before
                    .iter()
                    .min_by_key(|(_, recency)| *recency)
                    .copied()
                    .unwrap();
                assert!(!pool.is_resident(T, oldest));
            }
        }
        Ok(())
    }
}
