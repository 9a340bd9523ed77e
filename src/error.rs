use thiserror::Error;

use crate::pager::lock::LockLevel;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Header(#[from] HeaderError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Corrupt(#[from] CorruptError),

  #[error(transparent)]
  Vm(#[from] VmError),

  #[error("invalid page number: {0} (pages are 1-indexed)")]
  InvalidPageNumber(u32),

  #[error("release_page called with no pages held")]
  NoPagesHeld,

  #[error("cannot close pager: {0} page(s) still held")]
  PagesOutstanding(usize),

  #[error("cannot close pager: {0} lock still held")]
  LockStillHeld(LockLevel),

  #[error("pager is closed")]
  Closed,
}

/// Reasons a database file is rejected by the header parser. Each one is a
/// distinct variant so a caller can explain why the file is unsupported.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
  #[error("header is truncated: expected 100 bytes, found {0}")]
  Truncated(usize),

  #[error("invalid magic string: {0:?}")]
  BadMagic([u8; 16]),

  #[error("invalid page size: {0}")]
  InvalidPageSize(u32),

  #[error("legacy (rollback) journaling is unsupported (write={write}, read={read}): enable WAL instead")]
  NotWal { write: u8, read: u8 },

  #[error("non-UTF-8 text encoding is unsupported (encoding={0})")]
  UnsupportedEncoding(u32),

  #[error("database size is untrustworthy: file change counter {change_counter} != version-valid-for {version_valid_for}")]
  StalePageCount {
    change_counter: u32,
    version_valid_for: u32,
  },

  #[error("unsupported schema format ({0})")]
  UnsupportedSchemaFormat(u32),

  #[error("end-of-page reservations are unsupported ({0} bytes reserved)")]
  ReservedBytes(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
  #[error("attempting to acquire {requested} lock while holding {held}")]
  AlreadyHeld { held: LockLevel, requested: LockLevel },

  #[error("attempting to release to {requested} while holding {held}")]
  NotHeld { held: LockLevel, requested: LockLevel },

  #[error("unsupported lock transition to {0}")]
  Unsupported(LockLevel),

  #[error("database is locked by another process")]
  Busy,
}

/// Structural problems found while decoding B-tree pages. None of these are
/// recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorruptError {
  #[error("unknown b-tree page type 0x{tag:02x} on page {page}")]
  UnknownPageType { page: u32, tag: u8 },

  #[error("invalid node type on page {page}: parent={parent} child={child}")]
  ParentChildMismatch {
    page: u32,
    parent: &'static str,
    child: &'static str,
  },

  #[error("record header consumed {consumed} bytes, declared {declared}")]
  RecordHeaderLength { consumed: usize, declared: usize },

  #[error("record consumed {consumed} bytes, payload declared {declared}")]
  RecordPayloadLength { consumed: usize, declared: usize },

  #[error("text column at record offset {offset} is not valid UTF-8")]
  InvalidText { offset: usize },

  #[error("payload of {size} bytes at offset {offset} overflows page {page}")]
  PayloadOverflow { page: u32, offset: usize, size: u64 },

  #[error("cell offset {offset} is outside page {page}")]
  CellOutOfBounds { page: u32, offset: usize },

  #[error("unsupported serial type {0}")]
  ReservedSerialType(u64),

  #[error("b-tree page {page} is its own ancestor")]
  TreeCycle { page: u32 },

  #[error("malformed index record: trailing column is not a rowid")]
  MalformedIndexRecord,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
  #[error("unknown opcode at {pc}: {opcode}")]
  UnknownOpcode { pc: usize, opcode: String },

  #[error("schema has changed (program cookie {expected}, database cookie {actual}): recompile and retry")]
  SchemaMismatch { expected: i64, actual: u32 },

  #[error("cursor {0} is not open")]
  CursorNotOpen(usize),

  #[error("cursor {0} is not positioned on a record")]
  CursorNotPositioned(usize),

  #[error("only the main database is supported (requested database {0})")]
  UnsupportedDatabase(i64),

  #[error("write transactions are unsupported")]
  WriteTransaction,

  #[error("unknown register {0}")]
  UnknownRegister(usize),

  #[error("unsupported cast of register {register} from {from} to {to}")]
  UnsupportedCast {
    register: usize,
    from: &'static str,
    to: &'static str,
  },

  #[error("unknown cast affinity {0}")]
  UnknownAffinity(i64),

  #[error("jump target {target} is outside the program ({len} instructions)")]
  JumpOutOfRange { target: i64, len: usize },

  #[error("operand {operand} of {opcode} must be {expected}")]
  BadOperand {
    opcode: String,
    operand: &'static str,
    expected: &'static str,
  },

  #[error("unsupported query: '{0}'")]
  UnsupportedQuery(String),

  #[error("execution worker exited without reporting completion")]
  WorkerLost,
}
