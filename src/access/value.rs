use crate::storage::error::{StorageError, StorageResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};

/// Data types supported by the database
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer = 1,
    Double = 2,
    Boolean = 3,
    Varchar = 4,
}

impl DataType {
    pub fn from_i32(value: i32) -> StorageResult<Self> {
        match value {
            1 => Ok(DataType::Integer),
            2 => Ok(DataType::Double),
            3 => Ok(DataType::Boolean),
            4 => Ok(DataType::Varchar),
            _ => Err(StorageError::CorruptRecord(format!(
                "Unknown data type: {}",
                value
            ))),
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// A data type together with its declared capacity. `size` is only
/// meaningful for `Varchar`, where it bounds the string length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnType {
    pub data_type: DataType,
    pub size: usize,
}

impl ColumnType {
    pub fn new(data_type: DataType, size: usize) -> Self {
        let size = match data_type {
            DataType::Varchar => size,
            _ => 0,
        };
        Self { data_type, size }
    }

    pub fn integer() -> Self {
        Self::new(DataType::Integer, 0)
    }

    pub fn double() -> Self {
        Self::new(DataType::Double, 0)
    }

    pub fn boolean() -> Self {
        Self::new(DataType::Boolean, 0)
    }

    pub fn varchar(size: usize) -> Self {
        Self::new(DataType::Varchar, size)
    }

    /// Number of bytes a value of this type occupies on disk.
    pub fn encoded_width(&self) -> usize {
        match self.data_type {
            DataType::Integer => 4,
            DataType::Double => 8,
            DataType::Boolean => 1,
            DataType::Varchar => 4 + self.size,
        }
    }

    /// Checks that `value` has this type and fits its capacity.
    pub fn check(&self, value: &Value) -> StorageResult<()> {
        let found = value.data_type();
        if found != self.data_type {
            return Err(StorageError::TypeMismatch {
                expected: self.data_type,
                found,
            });
        }
        if let Value::String(s) = value {
            if s.len() > self.size {
                return Err(StorageError::CapacityExceeded {
                    len: s.len(),
                    capacity: self.size,
                });
            }
        }
        Ok(())
    }

    /// Writes `value` in its fixed-width encoding. Strings are stored as an
    /// `i32` length followed by `size` bytes, zero padded.
    pub fn encode<W: Write>(&self, value: &Value, out: &mut W) -> StorageResult<()> {
        self.check(value)?;
        match value {
            Value::Integer(i) => out.write_i32::<LittleEndian>(*i)?,
            Value::Double(d) => out.write_f64::<LittleEndian>(*d)?,
            Value::Boolean(b) => out.write_u8(u8::from(*b))?,
            Value::String(s) => {
                let bytes = s.as_bytes();
                out.write_i32::<LittleEndian>(bytes.len() as i32)?;
                out.write_all(bytes)?;
                out.write_all(&vec![0u8; self.size - bytes.len()])?;
            }
        }
        Ok(())
    }

    pub fn decode<R: Read>(&self, input: &mut R) -> StorageResult<Value> {
        let value = match self.data_type {
            DataType::Integer => Value::Integer(input.read_i32::<LittleEndian>()?),
            DataType::Double => Value::Double(input.read_f64::<LittleEndian>()?),
            DataType::Boolean => match input.read_u8()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => {
                    return Err(StorageError::CorruptRecord(format!(
                        "invalid boolean byte {}",
                        other
                    )))
                }
            },
            DataType::Varchar => {
                let len = input.read_i32::<LittleEndian>()?;
                if len < 0 || len as usize > self.size {
                    return Err(StorageError::CorruptRecord(format!(
                        "string length {} outside 0..={}",
                        len, self.size
                    )));
                }
                let mut buf = vec![0u8; self.size];
                input.read_exact(&mut buf)?;
                buf.truncate(len as usize);
                let s = String::from_utf8(buf)
                    .map_err(|e| StorageError::CorruptRecord(format!("invalid utf-8: {}", e)))?;
                Value::String(s)
            }
        };
        Ok(value)
    }
}

/// Values that can be stored in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Integer(i32),
    Double(f64),
    Boolean(bool),
    String(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Integer(_) => DataType::Integer,
            Value::Double(_) => DataType::Double,
            Value::Boolean(_) => DataType::Boolean,
            Value::String(_) => DataType::Varchar,
        }
    }

    /// Total order within one type: numeric for numbers, `false < true`,
    /// byte-wise for strings. Values of different types do not compare.
    pub fn compare(&self, other: &Value) -> StorageResult<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => Ok(a.total_cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Ok(a.as_bytes().cmp(b.as_bytes())),
            _ => Err(StorageError::TypeMismatch {
                expected: self.data_type(),
                found: other.data_type(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "'{}'", s),
        }
    }
}

/// Total encoded width of a record with the given column types.
pub fn record_size(schema: &[ColumnType]) -> usize {
    schema.iter().map(ColumnType::encoded_width).sum()
}

/// Serialize values according to schema, each padded to its fixed width
pub fn serialize_values(values: &[Value], schema: &[ColumnType]) -> StorageResult<Vec<u8>> {
    if values.len() != schema.len() {
        return Err(StorageError::InvalidArgument(format!(
            "Value count {} doesn't match schema length {}",
            values.len(),
            schema.len()
        )));
    }

    let mut data = Vec::with_capacity(record_size(schema));
    for (value, column_type) in values.iter().zip(schema) {
        column_type.encode(value, &mut data)?;
    }
    Ok(data)
}

/// Deserialize bytes according to schema
pub fn deserialize_values(data: &[u8], schema: &[ColumnType]) -> StorageResult<Vec<Value>> {
    if data.len() != record_size(schema) {
        return Err(StorageError::CorruptRecord(format!(
            "record of {} bytes, schema expects {}",
            data.len(),
            record_size(schema)
        )));
    }

    let mut input = data;
    schema
        .iter()
        .map(|column_type| column_type.decode(&mut input))
        .collect()
}
