use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 8192;

/// Size of the `page_count: i32` header at the start of every heap file.
pub const FILE_HEADER_SIZE: usize = 4;

/// Whole-block I/O against one table's heap file.
///
/// The file starts with a little-endian `i32` holding the number of blocks,
/// followed by `PAGE_SIZE` blocks.
pub struct PageManager {
    file: File,
    page_count: u32,
}

impl PageManager {
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut manager = Self {
            file,
            page_count: 0,
        };
        manager.write_header()?;
        Ok(manager)
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0u8; FILE_HEADER_SIZE];
        read_at(&mut file, 0, &mut header)?;
        let page_count = LittleEndian::read_i32(&header);
        if page_count < 0 {
            return Err(StorageError::CorruptRecord(format!(
                "negative page count {} in {:?}",
                page_count, path
            )));
        }

        let expected = Self::page_offset(PageId(page_count as u32));
        if file.metadata()?.len() < expected {
            return Err(StorageError::CorruptRecord(format!(
                "{:?} is shorter than its {} declared pages",
                path, page_count
            )));
        }

        Ok(Self {
            file,
            page_count: page_count as u32,
        })
    }

    pub fn read_block(&mut self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "Buffer size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                buf.len()
            )));
        }

        if page_id.0 >= self.page_count {
            return Err(StorageError::OutOfRange(format!(
                "page {} does not exist ({} pages)",
                page_id.0, self.page_count
            )));
        }

        read_at(&mut self.file, Self::page_offset(page_id), buf)
    }

    /// Writes one block, extending the file when `page_id` is past the end.
    pub fn write_block(&mut self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        if data.len() != PAGE_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "Data size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                data.len()
            )));
        }

        write_at(&mut self.file, Self::page_offset(page_id), data)?;

        if page_id.0 >= self.page_count {
            self.page_count = page_id.0 + 1;
            self.write_header()?;
        }

        Ok(())
    }

    pub fn block_count(&self) -> u32 {
        self.page_count
    }

    /// Appends a zeroed block and returns its id.
    pub fn allocate_block(&mut self) -> StorageResult<PageId> {
        let page_id = PageId(self.page_count);
        self.write_block(page_id, &[0u8; PAGE_SIZE])?;
        Ok(page_id)
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn write_header(&mut self) -> StorageResult<()> {
        let mut header = [0u8; FILE_HEADER_SIZE];
        LittleEndian::write_i32(&mut header, self.page_count as i32);
        write_at(&mut self.file, 0, &header)
    }

    fn page_offset(page_id: PageId) -> u64 {
        FILE_HEADER_SIZE as u64 + page_id.0 as u64 * PAGE_SIZE as u64
    }
}

/// Reads exactly `buf.len()` bytes at `offset`; fails with `OutOfRange` when
/// the file ends first.
pub fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
    let file_size = file.metadata()?.len();
    if offset + buf.len() as u64 > file_size {
        return Err(StorageError::OutOfRange(format!(
            "read of {} bytes at offset {} past end of file ({} bytes)",
            buf.len(),
            offset,
            file_size
        )));
    }

    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)?;
    Ok(())
}

/// Writes all of `data` at `offset`. Seeking past the end extends the file.
pub fn write_at(file: &mut File, offset: u64, data: &[u8]) -> StorageResult<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    Ok(())
}
