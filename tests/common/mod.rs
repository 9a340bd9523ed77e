#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use sqlite_native::btree::record::Value;
use sqlite_native::varint;
use tempfile::{NamedTempFile, TempDir};

pub const PAGE_SIZE: usize = 4096;

/// A 100-byte header for a WAL-mode, UTF-8, schema format 4 file.
pub fn header(pages: u32, schema_cookie: u32) -> [u8; 100] {
  let mut bytes = [0u8; 100];
  bytes[0..16].copy_from_slice(b"SQLite format 3\0");
  bytes[16..18].copy_from_slice(&(PAGE_SIZE as u16).to_be_bytes());
  bytes[18] = 2;
  bytes[19] = 2;
  bytes[21] = 64;
  bytes[22] = 32;
  bytes[23] = 32;
  bytes[24..28].copy_from_slice(&1u32.to_be_bytes());
  bytes[28..32].copy_from_slice(&pages.to_be_bytes());
  bytes[40..44].copy_from_slice(&schema_cookie.to_be_bytes());
  bytes[44..48].copy_from_slice(&4u32.to_be_bytes());
  bytes[56..60].copy_from_slice(&1u32.to_be_bytes());
  bytes[92..96].copy_from_slice(&1u32.to_be_bytes());
  bytes[96..100].copy_from_slice(&3_045_001u32.to_be_bytes());
  bytes
}

pub fn record(values: &[Value]) -> Vec<u8> {
  let mut types = Vec::new();
  let mut body = Vec::new();
  for value in values {
    match value {
      Value::Null => types.extend(varint::encode(0)),
      Value::Integer(v) => {
        types.extend(varint::encode(6));
        body.extend(v.to_be_bytes());
      }
      Value::Float(v) => {
        types.extend(varint::encode(7));
        body.extend(v.to_be_bytes());
      }
      Value::Text(s) => {
        types.extend(varint::encode(13 + 2 * s.len() as u64));
        body.extend(s.as_bytes());
      }
      Value::Blob(b) => {
        types.extend(varint::encode(12 + 2 * b.len() as u64));
        body.extend(b.iter());
      }
    }
  }
  let mut payload = varint::encode(types.len() as u64 + 1);
  payload.extend(types);
  payload.extend(body);
  payload
}

/// A table leaf page (type 0x0d) holding `rows` in the order given.
pub fn table_leaf(page_number: u32, rows: &[(i64, Vec<Value>)]) -> Vec<u8> {
  let mut data = vec![0u8; PAGE_SIZE];
  let base = if page_number == 1 { 100 } else { 0 };
  let mut content = PAGE_SIZE;
  for (i, (rowid, values)) in rows.iter().enumerate() {
    let payload = record(values);
    let mut cell = varint::encode(payload.len() as u64);
    cell.extend(varint::encode(*rowid as u64));
    cell.extend(payload);

    content -= cell.len();
    data[content..content + cell.len()].copy_from_slice(&cell);
    let pointer = base + 8 + i * 2;
    data[pointer..pointer + 2].copy_from_slice(&(content as u16).to_be_bytes());
  }
  data[base] = 0x0d;
  data[base + 3..base + 5].copy_from_slice(&(rows.len() as u16).to_be_bytes());
  data[base + 5..base + 7].copy_from_slice(&(content as u16).to_be_bytes());
  data
}

/// A `sqlite_schema` row for a table rooted at `root_page`.
pub fn table_entry(name: &str, root_page: i64) -> Vec<Value> {
  vec![
    Value::Text("table".into()),
    Value::Text(name.into()),
    Value::Text(name.into()),
    Value::Integer(root_page),
    Value::Text(format!("CREATE TABLE {}(column1 INTEGER)", name)),
  ]
}

/// Page 1 lists `table1` on page 2, which holds the rows 123 and 456.
pub fn two_row_image(schema_cookie: u32) -> NamedTempFile {
  write_image(
    vec![
      table_leaf(1, &[(1, table_entry("table1", 2))]),
      table_leaf(
        2,
        &[
          (1, vec![Value::Integer(123)]),
          (2, vec![Value::Integer(456)]),
        ],
      ),
    ],
    schema_cookie,
  )
}

pub fn write_image(pages: Vec<Vec<u8>>, schema_cookie: u32) -> NamedTempFile {
  let mut image: Vec<u8> = pages.concat();
  image[..100].copy_from_slice(&header(pages.len() as u32, schema_cookie));

  let mut file = NamedTempFile::new().unwrap();
  file.write_all(&image).unwrap();
  file.flush().unwrap();
  file
}

/// Creates a WAL-mode database with real SQLite, runs `sql` against it and
/// closes the connection so every change is checkpointed into the main file.
pub fn wal_database(dir: &TempDir, name: &str, sql: &str) -> PathBuf {
  let path = dir.path().join(name);
  let conn = rusqlite::Connection::open(&path).unwrap();
  let mode: String = conn
    .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
    .unwrap();
  assert_eq!(mode, "wal");
  conn.execute_batch(sql).unwrap();
  conn.close().unwrap();
  path
}

pub fn run_sql(path: &Path, sql: &str) {
  let conn = rusqlite::Connection::open(path).unwrap();
  conn.execute_batch(sql).unwrap();
  conn.close().unwrap();
}
