use std::path::Path;
use std::sync::Arc;

use crate::btree::manager::TreeManager;
use crate::btree::tree::Tree;
use crate::dbheader::DatabaseHeader;
use crate::pager::Pager;
use crate::vm::program::Program;
use crate::vm::{Execution, Vm, VmConfig};

pub mod btree;
pub mod dbheader;
pub mod error;
pub mod pager;
pub mod varint;
pub mod vm;

pub use error::{Error, Result};

/// Root page of the `sqlite_schema` table.
pub const SCHEMA_ROOT_PAGE: u32 = 1;

/// One row of `sqlite_schema`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
  /// `table`, `index`, `view` or `trigger`.
  pub kind: String,
  pub name: String,
  pub table_name: String,
  /// Zero for views and triggers.
  pub root_page: u32,
  pub sql: Option<String>,
}

/// A read-only handle on one database file.
pub struct SQLite {
  trees: TreeManager,
  vm: Vm,
}

impl SQLite {
  /// Opens `path` and checks that its header describes a supported file.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::with_config(path, VmConfig::default())
  }

  pub fn with_config(path: impl AsRef<Path>, config: VmConfig) -> Result<Self> {
    let trees = TreeManager::open(path)?;
    trees.header()?;
    let vm = Vm::with_config(trees.clone(), config);
    Ok(SQLite { trees, vm })
  }

  pub fn pager(&self) -> &Arc<Pager> {
    self.trees.pager()
  }

  pub fn header(&self) -> Result<DatabaseHeader> {
    self.trees.header()
  }

  pub fn open_tree(&self, root_page: u32) -> Result<Tree> {
    self.trees.open_tree(root_page)
  }

  /// Reads every row of `sqlite_schema`.
  pub fn schema(&self) -> Result<Vec<SchemaEntry>> {
    let mut tree = self.open_tree(SCHEMA_ROOT_PAGE)?;
    let mut entries = Vec::new();
    while tree.next() {
      let Some(record) = tree.get() else {
        continue;
      };
      let text = |idx: usize| record.column(idx).value().as_text().map(str::to_string);
      entries.push(SchemaEntry {
        kind: text(0).unwrap_or_default(),
        name: text(1).unwrap_or_default(),
        table_name: text(2).unwrap_or_default(),
        root_page: record
          .column(3)
          .value()
          .as_integer()
          .and_then(|page| u32::try_from(page).ok())
          .unwrap_or(0),
        sql: text(4),
      });
    }
    if let Some(e) = tree.take_error() {
      return Err(e);
    }
    Ok(entries)
  }

  /// User tables, in schema order.
  pub fn table_names(&self) -> Result<Vec<String>> {
    Ok(
      self
        .schema()?
        .into_iter()
        .filter(|entry| entry.kind == "table" && !entry.name.starts_with("sqlite_"))
        .map(|entry| entry.name)
        .collect(),
    )
  }

  /// Counts the rows of `table` by walking its b-tree.
  pub fn count_table_rows(&self, table: &str) -> Result<Option<usize>> {
    let Some(entry) = self
      .schema()?
      .into_iter()
      .find(|entry| entry.kind == "table" && entry.name == table)
    else {
      return Ok(None);
    };

    let mut tree = self.open_tree(entry.root_page)?;
    let mut rows = 0;
    while tree.next() {
      rows += 1;
    }
    match tree.take_error() {
      Some(e) => Err(e),
      None => Ok(Some(rows)),
    }
  }

  pub fn prepare(&self, query: &str) -> Result<Program> {
    Ok(vm::catalog::prepare(query)?)
  }

  pub fn execute(&self, program: Program) -> Result<Execution> {
    self.vm.execute(program)
  }

  pub fn query(&self, query: &str) -> Result<Execution> {
    self.execute(self.prepare(query)?)
  }

  pub fn close(&self) -> Result<()> {
    self.trees.close()
  }
}
