use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};

// Header structure (8 bytes)
const HEADER_SIZE: usize = 8;
const PAGE_ID_OFFSET: usize = 0;
const RECORD_SIZE_OFFSET: usize = 4;
const RECORD_COUNT_OFFSET: usize = 6;

/// Largest record a heap page can hold.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - HEADER_SIZE;

/// Fixed-record-size heap page.
///
/// Records are packed back to back after the header; removing one shifts
/// every later record down a slot so the page never has holes.
pub struct HeapPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HeapPage<B> {
    pub fn from_data(data: B) -> Self {
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        PageId(LittleEndian::read_u32(&self.bytes()[PAGE_ID_OFFSET..]))
    }

    pub fn record_size(&self) -> usize {
        LittleEndian::read_u16(&self.bytes()[RECORD_SIZE_OFFSET..]) as usize
    }

    pub fn record_count(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes()[RECORD_COUNT_OFFSET..])
    }

    pub fn capacity(&self) -> u16 {
        match self.record_size() {
            0 => 0,
            size => (MAX_RECORD_SIZE / size) as u16,
        }
    }

    pub fn has_room(&self) -> bool {
        self.record_count() < self.capacity()
    }

    pub fn record(&self, slot_id: u16) -> StorageResult<&[u8]> {
        let range = self.slot_range(slot_id)?;
        Ok(&self.bytes()[range])
    }

    /// Structural check of a page read from disk.
    pub fn validate(&self, record_size: usize) -> StorageResult<()> {
        if self.record_size() != record_size {
            return Err(StorageError::CorruptRecord(format!(
                "page {} has record size {}, table expects {}",
                self.page_id().0,
                self.record_size(),
                record_size
            )));
        }
        if self.record_count() > self.capacity() {
            return Err(StorageError::CorruptRecord(format!(
                "page {} claims {} records, capacity {}",
                self.page_id().0,
                self.record_count(),
                self.capacity()
            )));
        }
        Ok(())
    }

    fn slot_range(&self, slot_id: u16) -> StorageResult<std::ops::Range<usize>> {
        let count = self.record_count();
        if slot_id >= count {
            return Err(StorageError::NotFound(format!(
                "slot {} on page {} ({} records)",
                slot_id,
                self.page_id().0,
                count
            )));
        }
        let size = self.record_size();
        let start = HEADER_SIZE + slot_id as usize * size;
        Ok(start..start + size)
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeapPage<B> {
    /// Formats `data` as an empty page for records of `record_size` bytes.
    pub fn new(mut data: B, page_id: PageId, record_size: usize) -> StorageResult<Self> {
        if record_size == 0 || record_size > MAX_RECORD_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "record size {} must be in 1..={}",
                record_size, MAX_RECORD_SIZE
            )));
        }

        let bytes = data.as_mut();
        bytes.fill(0);
        LittleEndian::write_u32(&mut bytes[PAGE_ID_OFFSET..], page_id.0);
        LittleEndian::write_u16(&mut bytes[RECORD_SIZE_OFFSET..], record_size as u16);
        LittleEndian::write_u16(&mut bytes[RECORD_COUNT_OFFSET..], 0);

        Ok(Self { data })
    }

    /// Appends a record and returns its slot.
    pub fn push_record(&mut self, record: &[u8]) -> StorageResult<u16> {
        self.check_len(record)?;
        if !self.has_room() {
            return Err(StorageError::CapacityExceeded {
                len: (self.record_count() as usize + 1) * self.record_size(),
                capacity: MAX_RECORD_SIZE,
            });
        }

        let slot_id = self.record_count();
        self.set_record_count(slot_id + 1);
        let range = self.slot_range(slot_id)?;
        self.bytes_mut()[range].copy_from_slice(record);
        Ok(slot_id)
    }

    pub fn overwrite_record(&mut self, slot_id: u16, record: &[u8]) -> StorageResult<()> {
        self.check_len(record)?;
        let range = self.slot_range(slot_id)?;
        self.bytes_mut()[range].copy_from_slice(record);
        Ok(())
    }

    /// Removes a record, compacting the records after it down by one slot.
    /// Returns the number of records that moved.
    pub fn remove_record(&mut self, slot_id: u16) -> StorageResult<u16> {
        let range = self.slot_range(slot_id)?;
        let count = self.record_count();
        let end = HEADER_SIZE + count as usize * self.record_size();

        let bytes = self.bytes_mut();
        bytes.copy_within(range.end..end, range.start);
        bytes[end - (range.end - range.start)..end].fill(0);
        self.set_record_count(count - 1);

        Ok(count - 1 - slot_id)
    }

    fn check_len(&self, record: &[u8]) -> StorageResult<()> {
        if record.len() != self.record_size() {
            return Err(StorageError::InvalidArgument(format!(
                "record of {} bytes on page with record size {}",
                record.len(),
                self.record_size()
            )));
        }
        Ok(())
    }

    fn set_record_count(&mut self, count: u16) {
        LittleEndian::write_u16(&mut self.bytes_mut()[RECORD_COUNT_OFFSET..], count);
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }
}
