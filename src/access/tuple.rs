use crate::access::value::Value;
use crate::storage::page::PageId;
use std::cmp::Ordering;
use std::fmt;

/// Location of a record in a table heap: the page and the slot within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordLocator {
    pub page_id: PageId,
    pub slot_id: u16,
}

impl RecordLocator {
    pub fn new(page_id: PageId, slot_id: u16) -> Self {
        Self { page_id, slot_id }
    }
}

impl PartialOrd for RecordLocator {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordLocator {
    fn cmp(&self, other: &Self) -> Ordering {
        // First compare by page_id, then by slot_id
        match self.page_id.0.cmp(&other.page_id.0) {
            Ordering::Equal => self.slot_id.cmp(&other.slot_id),
            other => other,
        }
    }
}

impl fmt::Display for RecordLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id.0, self.slot_id)
    }
}

/// A decoded table row together with where it lives.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub locator: RecordLocator,
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(locator: RecordLocator, values: Vec<Value>) -> Self {
        Self { locator, values }
    }
}
