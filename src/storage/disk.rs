pub mod page_manager;

pub use page_manager::{read_at, write_at, PageManager, FILE_HEADER_SIZE, PAGE_SIZE};
