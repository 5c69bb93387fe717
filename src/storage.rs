//! Storage layer implementation for pagedb.
//!
//! This module provides the foundation for persistent data storage using a page-based
//! architecture. Key components:
//!
//! - **Page**: Fixed-size (8KB) blocks of data, the basic unit of I/O
//! - **PageManager**: Whole-block reads and writes against a table's heap file
//! - **BufferPool**: Bounded in-memory cache of pages with LRU eviction and
//!   deferred write-back of dirty pages
//! - **HeapPage**: Fixed-record-size page format for table records
//!
//! Every operation is synchronous and driven by a single session; the pool
//! hands out `&mut Page` borrows instead of latched guards.

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPool, BufferPoolStats};
pub use disk::{PageManager, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::{HeapPage, Page, PageId};
