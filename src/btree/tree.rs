use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{trace, warn};

use super::record::{Record, Value};
use super::{Node, PageType};
use crate::dbheader::DatabaseHeader;
use crate::error::{CorruptError, Error, Result};
use crate::pager::Pager;

/// A cursor over one b-tree.
///
/// Nodes live in an arena; parents and already-decoded children are referred
/// to by arena index. Only the root is decoded up front, everything below it
/// is decoded the first time the cursor walks into it.
///
/// `stack` holds one cell index per level from the root down to `current`.
/// `-1` means the cursor has not yet entered that node's first child/record.
pub struct Tree {
  pager: Arc<Pager>,
  root_page: u32,
  nodes: Vec<Node>,
  current: usize,
  stack: Vec<isize>,
  error: Option<Error>,
}

impl Tree {
  pub fn open(pager: Arc<Pager>, root_page: u32) -> Result<Tree> {
    let root = Node::decode(root_page, &pager, None)?;
    trace!(root_page, page_type = root.page_type.as_str(), "opened tree");
    Ok(Tree {
      pager,
      root_page,
      nodes: vec![root],
      current: 0,
      stack: vec![-1],
      error: None,
    })
  }

  pub fn root_page(&self) -> u32 {
    self.root_page
  }

  pub fn is_index(&self) -> bool {
    !self.nodes[0].page_type.is_table()
  }

  pub fn header(&self) -> Result<DatabaseHeader> {
    self.pager.header()
  }

  /// Number of nodes decoded so far.
  pub fn decoded_nodes(&self) -> usize {
    self.nodes.len()
  }

  /// Points the cursor before the first record.
  pub fn reset_cursor(&mut self) {
    self.current = 0;
    self.stack.clear();
    self.stack.push(-1);
  }

  /// Advances to the next record in key order. Returns `false` once the tree
  /// is exhausted or after an error; see [`Tree::error`].
  #[allow(clippy::should_implement_trait)]
  pub fn next(&mut self) -> bool {
    if self.error.is_some() {
      return false;
    }

    loop {
      let Some(&position) = self.stack.last() else {
        return false;
      };
      let next = (position + 1) as usize;

      match slot(&self.nodes[self.current], next) {
        Some(slot) => {
          if let Some(top) = self.stack.last_mut() {
            *top = next as isize;
          }
          let Slot::Child(idx) = slot else {
            return true;
          };
          match self.child(self.current, idx) {
            Ok(child) => {
              self.current = child;
              self.stack.push(-1);
            }
            Err(e) => {
              self.latch(e);
              return false;
            }
          }
        }
        None => match self.nodes[self.current].parent {
          Some(parent) => {
            self.stack.pop();
            self.current = parent;
          }
          None => {
            self.stack.clear();
            return false;
          }
        },
      }
    }
  }

  /// The record under the cursor. Only meaningful after `next` returned
  /// `true`.
  pub fn get(&self) -> Option<&Record> {
    let node = &self.nodes[self.current];
    let position = usize::try_from(*self.stack.last()?).ok()?;
    match slot(node, position)? {
      Slot::Record(idx) => node.records.get(idx),
      Slot::Child(_) => None,
    }
  }

  /// Moves to the first record whose leading columns compare greater than or
  /// equal to `key`. Returns `false` if there is none.
  pub fn seek_ge(&mut self, key: &[Value]) -> bool {
    self.reset_cursor();
    while self.next() {
      if let Some(record) = self.get() {
        if record.compare_prefix(key) != Ordering::Less {
          return true;
        }
      }
    }
    false
  }

  /// Moves to the record with `rowid`. Returns `false` if it does not exist.
  pub fn seek_rowid(&mut self, rowid: i64) -> bool {
    self.reset_cursor();
    while self.next() {
      match self.get().map(|record| record.rowid.cmp(&rowid)) {
        Some(Ordering::Equal) => return true,
        Some(Ordering::Greater) => return false,
        _ => continue,
      }
    }
    false
  }

  /// First error hit while decoding child pages.
  pub fn error(&self) -> Option<&Error> {
    self.error.as_ref()
  }

  pub fn take_error(&mut self) -> Option<Error> {
    self.error.take()
  }

  fn latch(&mut self, e: Error) {
    if let Some(first) = &self.error {
      warn!(error = %e, first = %first, root_page = self.root_page, "shadowed tree error");
      return;
    }
    self.error = Some(e);
  }

  /// Arena index of child `idx` of node `parent`, decoding it on first visit.
  fn child(&mut self, parent: usize, idx: usize) -> Result<usize> {
    let parent_node = &self.nodes[parent];
    let child = &parent_node.children[idx];
    if let Some(node) = child.node {
      return Ok(node);
    }

    let page_number = child.page_number;
    let parent_type: PageType = parent_node.page_type;

    let mut ancestor = Some(parent);
    while let Some(idx) = ancestor {
      if self.nodes[idx].page_number == page_number {
        return Err(CorruptError::TreeCycle { page: page_number }.into());
      }
      ancestor = self.nodes[idx].parent;
    }

    let node = Node::decode(page_number, &self.pager, Some((parent, parent_type)))?;
    let arena_idx = self.nodes.len();
    self.nodes.push(node);
    self.nodes[parent].children[idx].node = Some(arena_idx);
    Ok(arena_idx)
  }
}

/// What the cursor finds at one step of a node. Index interior pages
/// interleave their children and entries: child 0, record 0, child 1, ...
enum Slot {
  Child(usize),
  Record(usize),
}

fn slot(node: &Node, position: usize) -> Option<Slot> {
  match node.page_type {
    PageType::TableLeaf | PageType::IndexLeaf => {
      (position < node.records.len()).then_some(Slot::Record(position))
    }
    PageType::TableInterior => (position < node.children.len()).then_some(Slot::Child(position)),
    PageType::IndexInterior => {
      if position >= node.children.len() + node.records.len() {
        None
      } else if position % 2 == 0 {
        Some(Slot::Child(position / 2))
      } else {
        Some(Slot::Record(position / 2))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::btree::tests::{build_page, record_payload, table_leaf_cell};
  use crate::dbheader::tests::valid_header_bytes;
  use crate::varint;
  use std::io::Write;

  const PAGE_SIZE: usize = 4096;

  fn write_image(pages: Vec<Vec<u8>>) -> tempfile::NamedTempFile {
    let mut image = Vec::new();
    for page in &pages {
      image.extend_from_slice(page);
    }
    let mut header = valid_header_bytes();
    header[28..32].copy_from_slice(&(pages.len() as u32).to_be_bytes());
    image[..100].copy_from_slice(&header);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&image).unwrap();
    file.flush().unwrap();
    file
  }

  fn leaf(page_number: u32, rowids: std::ops::Range<i64>) -> Vec<u8> {
    let cells: Vec<Vec<u8>> = rowids
      .map(|rowid| table_leaf_cell(rowid, &[Value::Integer(rowid * 10)]))
      .collect();
    build_page(page_number, PAGE_SIZE, 0x0d, None, &cells).data.to_vec()
  }

  fn interior_cell(child: u32, key: i64) -> Vec<u8> {
    let mut cell = child.to_be_bytes().to_vec();
    cell.extend(varint::encode(key as u64));
    cell
  }

  fn index_payload(key: &str, rowid: i64) -> Vec<u8> {
    let payload = record_payload(&[Value::Text(key.into()), Value::Integer(rowid)]);
    let mut cell = varint::encode(payload.len() as u64);
    cell.extend(payload);
    cell
  }

  fn index_interior_cell(child: u32, key: &str, rowid: i64) -> Vec<u8> {
    let mut cell = child.to_be_bytes().to_vec();
    cell.extend(index_payload(key, rowid));
    cell
  }

  fn index_leaf(page_number: u32, key: &str, rowid: i64) -> Vec<u8> {
    build_page(page_number, PAGE_SIZE, 0x0a, None, &[index_payload(key, rowid)])
      .data
      .to_vec()
  }

  fn collect(tree: &mut Tree) -> Vec<i64> {
    let mut rowids = Vec::new();
    tree.reset_cursor();
    while tree.next() {
      rowids.push(tree.get().unwrap().rowid);
    }
    rowids
  }

  #[test]
  fn single_leaf_visits_every_record_once() {
    let schema = build_page(1, PAGE_SIZE, 0x0d, None, &[]).data.to_vec();
    let file = write_image(vec![schema, leaf(2, 1..6)]);
    let pager = Arc::new(Pager::open(file.path()).unwrap());
    let mut tree = Tree::open(pager.clone(), 2).unwrap();

    assert_eq!(collect(&mut tree), vec![1, 2, 3, 4, 5]);
    assert!(!tree.next());
    assert!(tree.error().is_none());
    assert_eq!(pager.page_refs(), 0);
  }

  #[test]
  fn empty_leaf_has_no_records() {
    let schema = build_page(1, PAGE_SIZE, 0x0d, None, &[]).data.to_vec();
    let file = write_image(vec![schema, leaf(2, 0..0)]);
    let pager = Arc::new(Pager::open(file.path()).unwrap());
    let mut tree = Tree::open(pager, 2).unwrap();
    tree.reset_cursor();
    assert!(!tree.next());
    assert!(tree.get().is_none());
  }

  #[test]
  fn walks_interior_pages_lazily() {
    let schema = build_page(1, PAGE_SIZE, 0x0d, None, &[]).data.to_vec();
    let root = build_page(
      2,
      PAGE_SIZE,
      0x05,
      Some(5),
      &[interior_cell(3, 3), interior_cell(4, 6)],
    )
    .data
    .to_vec();
    let file = write_image(vec![schema, root, leaf(3, 1..4), leaf(4, 4..7), leaf(5, 7..9)]);
    let pager = Arc::new(Pager::open(file.path()).unwrap());
    let mut tree = Tree::open(pager.clone(), 2).unwrap();
    assert_eq!(tree.decoded_nodes(), 1);

    tree.reset_cursor();
    assert!(tree.next());
    assert_eq!(tree.get().unwrap().rowid, 1);
    assert_eq!(tree.decoded_nodes(), 2);

    assert_eq!(collect(&mut tree), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(tree.decoded_nodes(), 4);
    // A second pass reuses the decoded nodes.
    assert_eq!(collect(&mut tree), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(tree.decoded_nodes(), 4);
    assert_eq!(pager.page_refs(), 0);
  }

  #[test]
  fn seeks() {
    let schema = build_page(1, PAGE_SIZE, 0x0d, None, &[]).data.to_vec();
    let root = build_page(2, PAGE_SIZE, 0x05, Some(4), &[interior_cell(3, 3)])
      .data
      .to_vec();
    let file = write_image(vec![schema, root, leaf(3, 1..4), leaf(4, 4..7)]);
    let pager = Arc::new(Pager::open(file.path()).unwrap());
    let mut tree = Tree::open(pager, 2).unwrap();

    assert!(tree.seek_rowid(5));
    assert_eq!(tree.get().unwrap().column(0).value(), Value::Integer(50));
    assert!(!tree.seek_rowid(9));

    assert!(tree.seek_ge(&[Value::Integer(35)]));
    assert_eq!(tree.get().unwrap().rowid, 4);
    assert!(!tree.seek_ge(&[Value::Integer(61)]));
  }

  #[test]
  fn decode_errors_are_latched() {
    let schema = build_page(1, PAGE_SIZE, 0x0d, None, &[]).data.to_vec();
    let root = build_page(2, PAGE_SIZE, 0x05, Some(4), &[interior_cell(3, 3)])
      .data
      .to_vec();
    // Page 3 claims to be an index leaf under a table interior page.
    let bad = build_page(3, PAGE_SIZE, 0x0a, None, &[]).data.to_vec();
    let file = write_image(vec![schema, root, bad, leaf(4, 4..7)]);
    let pager = Arc::new(Pager::open(file.path()).unwrap());
    let mut tree = Tree::open(pager.clone(), 2).unwrap();

    tree.reset_cursor();
    assert!(!tree.next());
    assert!(matches!(
      tree.error(),
      Some(Error::Corrupt(crate::error::CorruptError::ParentChildMismatch { .. }))
    ));
    assert!(!tree.next());
    assert!(tree.take_error().is_some());
    assert_eq!(pager.page_refs(), 0);
  }

  #[test]
  fn index_interior_entries_sit_between_children() {
    let schema = build_page(1, PAGE_SIZE, 0x0d, None, &[]).data.to_vec();
    let root = build_page(
      2,
      PAGE_SIZE,
      0x02,
      Some(5),
      &[index_interior_cell(3, "b", 2), index_interior_cell(4, "d", 4)],
    )
    .data
    .to_vec();
    let file = write_image(vec![
      schema,
      root,
      index_leaf(3, "a", 1),
      index_leaf(4, "c", 3),
      index_leaf(5, "e", 5),
    ]);
    let pager = Arc::new(Pager::open(file.path()).unwrap());
    let mut tree = Tree::open(pager.clone(), 2).unwrap();
    assert!(tree.is_index());

    assert_eq!(collect(&mut tree), vec![1, 2, 3, 4, 5]);
    assert!(tree.error().is_none());

    assert!(tree.seek_ge(&[Value::Text("b".into())]));
    assert_eq!(tree.get().unwrap().rowid, 2);
    assert!(tree.seek_ge(&[Value::Text("bb".into())]));
    assert_eq!(tree.get().unwrap().rowid, 3);
    assert!(tree.seek_ge(&[Value::Text("d".into())]));
    assert_eq!(tree.get().unwrap().rowid, 4);
    assert!(!tree.seek_ge(&[Value::Text("f".into())]));
    assert_eq!(pager.page_refs(), 0);
  }

  #[test]
  fn child_pointing_back_up_the_tree_is_corrupt() {
    let schema = build_page(1, PAGE_SIZE, 0x0d, None, &[]).data.to_vec();
    let root = build_page(2, PAGE_SIZE, 0x05, Some(3), &[]).data.to_vec();
    // Page 3 lists the root as its own child.
    let middle = build_page(3, PAGE_SIZE, 0x05, Some(4), &[interior_cell(2, 3)])
      .data
      .to_vec();
    let file = write_image(vec![schema, root, middle, leaf(4, 4..7)]);
    let pager = Arc::new(Pager::open(file.path()).unwrap());
    let mut tree = Tree::open(pager.clone(), 2).unwrap();

    tree.reset_cursor();
    assert!(!tree.next());
    assert!(matches!(
      tree.error(),
      Some(Error::Corrupt(CorruptError::TreeCycle { page: 2 }))
    ));
    assert_eq!(pager.page_refs(), 0);
  }
}
