use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

use bytes::Bytes;

use crate::error::CorruptError;
use crate::varint;

/// # [Record Format](https://www.sqlite.org/fileformat.html#record-format)
///
/// A record contains a header and a body, in that order. The header begins with a single varint which determines the total number of bytes in the header.
/// The varint value is the size of the header in bytes including the size varint itself.
/// Following the size varint are one or more additional varints, one per column.
/// These additional varints are called "serial type" numbers and determine the datatype of each column, according to the following chart:
/// +-------------+------------+-----------------------------------------------------------------------------------------+
/// |Serial Type  |Content Size|Meaning                                                                                  |
/// +-------------+------------+-----------------------------------------------------------------------------------------|
/// |0            |0           |Value is a NULL.                                                                         |
/// |1            |1           |Value is an 8-bit twos-complement integer.                                               |
/// |2            |2           |Value is a big-endian 16-bit twos-complement integer.                                    |
/// |3            |3           |Value is a big-endian 24-bit twos-complement integer.                                    |
/// |4            |4           |Value is a big-endian 32-bit twos-complement integer.                                    |
/// |5            |6           |Value is a big-endian 48-bit twos-complement integer.                                    |
/// |6            |8           |Value is a big-endian 64-bit twos-complement integer.                                    |
/// |7            |8           |Value is a big-endian IEEE 754-2008 64-bit floating point number.                        |
/// |8            |0           |Value is the integer 0. (Only available for schema format 4 and higher.)                 |
/// |9            |0           |Value is the integer 1. (Only available for schema format 4 and higher.)                 |
/// |10,11        |variable    |Reserved for internal use. Never appear in a well-formed database file.                  |
/// |N≥12 and even|(N-12)/2    |Value is a BLOB that is (N-12)/2 bytes in length.                                        |
/// |N≥13 and odd |(N-13)/2    |Value is a string in the text encoding and (N-13)/2 bytes in length.                     |
/// +-------------+------------+-----------------------------------------------------------------------------------------+
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
  /// The table rowid, or for index records the rowid stored in the trailing
  /// column.
  pub rowid: i64,
  pub columns: Vec<Column>,
}

impl Record {
  /// Column `idx`, or NULL when the record is shorter than that.
  pub fn column(&self, idx: usize) -> Column {
    self.columns.get(idx).cloned().unwrap_or_default()
  }

  pub fn values(&self) -> Vec<Value> {
    self.columns.iter().map(Column::value).collect()
  }

  /// Compares the leading columns of this record against `key`, column by
  /// column, using SQLite's default ordering.
  pub fn compare_prefix(&self, key: &[Value]) -> Ordering {
    for (idx, wanted) in key.iter().enumerate() {
      match self.column(idx).value().compare(wanted) {
        Ordering::Equal => continue,
        other => return other,
      }
    }
    Ordering::Equal
  }
}

impl Display for Record {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    let row: Vec<String> = self.columns.iter().map(|c| c.value().to_string()).collect();
    write!(f, "rowid={} row=[ {} ]", self.rowid, row.join(" | "))
  }
}

/// One column of a record: its serial type and the bytes it occupies in the
/// payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Column {
  pub serial_type: u64,
  pub content: Bytes,
}

/// Content size in bytes for a serial type.
pub fn content_size(serial_type: u64) -> Result<usize, CorruptError> {
  match serial_type {
    0 | 8 | 9 => Ok(0),
    1 => Ok(1),
    2 => Ok(2),
    3 => Ok(3),
    4 => Ok(4),
    5 => Ok(6),
    6 | 7 => Ok(8),
    10 | 11 => Err(CorruptError::ReservedSerialType(serial_type)),
    n if n % 2 == 0 => Ok(((n - 12) / 2) as usize),
    n => Ok(((n - 13) / 2) as usize),
  }
}

fn sign_extend(bytes: &[u8]) -> i64 {
  let mut value = if bytes.first().is_some_and(|b| b & 0x80 != 0) {
    -1i64
  } else {
    0
  };
  for &b in bytes {
    value = (value << 8) | b as i64;
  }
  value
}

impl Column {
  pub fn is_null(&self) -> bool {
    self.serial_type == 0
  }

  pub fn value(&self) -> Value {
    match self.serial_type {
      0 => Value::Null,
      1..=6 => Value::Integer(sign_extend(&self.content)),
      7 => {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.content[..8]);
        Value::Float(f64::from_be_bytes(raw))
      }
      8 => Value::Integer(0),
      9 => Value::Integer(1),
      n if n % 2 == 0 => Value::Blob(self.content.clone()),
      _ => Value::Text(String::from_utf8_lossy(&self.content).into_owned()),
    }
  }

  /// Only defined for the stored integer types 1 through 6.
  pub fn as_int(&self) -> Option<i64> {
    match self.serial_type {
      1..=6 => Some(sign_extend(&self.content)),
      _ => None,
    }
  }
}

/// Splits a record payload into its columns. Column content is sliced out of
/// `payload` without copying.
pub fn read_columns(payload: &Bytes) -> Result<Vec<Column>, CorruptError> {
  let (header_size, mut offset) =
    varint::decode(payload).ok_or(CorruptError::RecordHeaderLength {
      consumed: payload.len(),
      declared: 0,
    })?;
  let header_size = header_size as usize;

  let mut serial_types = Vec::new();
  while offset < header_size {
    let (serial_type, len) = payload
      .get(offset..)
      .and_then(varint::decode)
      .ok_or(CorruptError::RecordHeaderLength {
        consumed: offset,
        declared: header_size,
      })?;
    serial_types.push(serial_type);
    offset += len;
  }
  if offset != header_size {
    return Err(CorruptError::RecordHeaderLength {
      consumed: offset,
      declared: header_size,
    });
  }

  let mut columns = Vec::with_capacity(serial_types.len());
  for serial_type in serial_types {
    let size = content_size(serial_type)?;
    if offset + size > payload.len() {
      return Err(CorruptError::RecordPayloadLength {
        consumed: offset + size,
        declared: payload.len(),
      });
    }
    let content = payload.slice(offset..offset + size);
    if serial_type >= 13 && serial_type % 2 == 1 && std::str::from_utf8(&content).is_err() {
      return Err(CorruptError::InvalidText { offset });
    }
    columns.push(Column {
      serial_type,
      content,
    });
    offset += size;
  }

  if offset != payload.len() {
    return Err(CorruptError::RecordPayloadLength {
      consumed: offset,
      declared: payload.len(),
    });
  }
  Ok(columns)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Integer(i64),
  Float(f64),
  Blob(Bytes),
  Text(String),
}

impl Value {
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Integer(_) => "integer",
      Value::Float(_) => "real",
      Value::Blob(_) => "blob",
      Value::Text(_) => "text",
    }
  }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Value::Integer(value) => Some(*value),
      _ => None,
    }
  }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      Value::Text(value) => Some(value),
      _ => None,
    }
  }

  pub fn as_blob(&self) -> Option<&[u8]> {
    match self {
      Value::Blob(value) => Some(value),
      _ => None,
    }
  }

  fn class(&self) -> u8 {
    match self {
      Value::Null => 0,
      Value::Integer(_) | Value::Float(_) => 1,
      Value::Text(_) => 2,
      Value::Blob(_) => 3,
    }
  }

  /// SQLite's default (BINARY collation) ordering: NULL < numbers < text <
  /// blobs.
  pub fn compare(&self, other: &Value) -> Ordering {
    match (self, other) {
      (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
      (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
      (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
      (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
      (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
      (Value::Blob(a), Value::Blob(b)) => a.as_ref().cmp(b.as_ref()),
      _ => self.class().cmp(&other.class()),
    }
  }
}

impl Display for Value {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    match self {
      Value::Null => write!(f, "NULL"),
      Value::Integer(value) => write!(f, "{}", value),
      Value::Float(value) => write!(f, "{}", value),
      Value::Blob(value) => write!(f, "{}", String::from_utf8_lossy(value)),
      Value::Text(value) => write!(f, "{}", value),
    }
  }
}
