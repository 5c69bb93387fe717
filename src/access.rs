//! Access layer for records and indexes.
//!
//! - **TableHeap**: fixed-width records spread across a table's heap pages
//! - **BPlusTree**: persistent primary-key index over record locators
//! - **Value**: typed column values and their fixed-width codec
//!
//! Higher layers work with logical records and keys; page bytes stay below
//! this module.

pub mod btree;
pub mod heap;
pub mod tuple;
pub mod value;

pub use btree::{BPlusNode, BPlusTree, KeyType, NodeId, NodeStore, SearchKey};
pub use heap::TableHeap;
pub use tuple::{Record, RecordLocator};
pub use value::{deserialize_values, serialize_values, ColumnType, DataType, Value};
