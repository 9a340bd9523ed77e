pub mod cell;
pub mod manager;
pub mod record;
pub mod tree;

use bytes::Bytes;
use tracing::{trace, warn};

use crate::error::{CorruptError, Result};
use crate::pager::page::Page;
use crate::pager::Pager;
use cell::Cell;
use record::{read_columns, Record};

/// The b-tree algorithm provides key/data storage with unique and ordered keys on page-oriented storage devices.
/// For background information on b-trees, see Knuth, The Art Of Computer Programming, Volume 3 "Sorting and Searching", pages 471-479.
/// Two variants of b-trees are used by SQLite. "Table b-trees" use a 64-bit signed integer key and store all data in the leaves.
/// "Index b-trees" use arbitrary keys and store no data at all.
///
/// A b-tree page is divided into regions in the following order:
///   1. The 100-byte database file header (found on page 1 only)
///   2. The 8 or 12 byte b-tree page header
///   3. The cell pointer array
///   4. Unallocated space
///   5. The cell content area
///   6. The reserved region.
///
/// +------+----+--------------------------------------------------------------------------------------------------------------------------------------+
/// |Offset|Size|Description                                                                                                                           |
/// +------+----+--------------------------------------------------------------------------------------------------------------------------------------|
/// |0     |1   |The one-byte flag at offset 0 indicating the b-tree page type.                                                                        |
/// |1     |2   |The two-byte integer at offset 1 gives the start of the first freeblock on the page or is zero if there are no freeblocks.            |
/// |3     |2   |The two-byte integer at offset 3 gives the number of cells on the page.                                                               |
/// |5     |2   |The two-byte integer at offset 5 designates the start of the cell content area. A zero value for this integer is interpreted as 65536.|
/// |7     |1   |The one-byte integer at offset 7 gives the number of fragmented free bytes within the cell content area.                              |
/// |8     |4   |The four-byte page number at offset 8 is the right-most pointer. Interior b-tree pages only.                                          |
/// +------+----+--------------------------------------------------------------------------------------------------------------------------------------+
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
  IndexInterior,
  TableInterior,
  IndexLeaf,
  TableLeaf,
}

impl PageType {
  /// Any other value for the b-tree page type is an error.
  pub fn from_tag(tag: u8) -> Option<Self> {
    match tag {
      0x02 => Some(PageType::IndexInterior),
      0x05 => Some(PageType::TableInterior),
      0x0a => Some(PageType::IndexLeaf),
      0x0d => Some(PageType::TableLeaf),
      _ => None,
    }
  }

  pub fn is_leaf(&self) -> bool {
    matches!(self, PageType::IndexLeaf | PageType::TableLeaf)
  }

  pub fn is_table(&self) -> bool {
    matches!(self, PageType::TableInterior | PageType::TableLeaf)
  }

  fn header_size(&self) -> usize {
    if self.is_leaf() {
      8
    } else {
      12
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      PageType::IndexInterior => "IndexInterior",
      PageType::TableInterior => "TableInterior",
      PageType::IndexLeaf => "IndexLeaf",
      PageType::TableLeaf => "TableLeaf",
    }
  }
}

/// Key stored alongside a child pointer in an interior cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildKey {
  Rowid(i64),
  Index(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Child {
  pub page_number: u32,
  /// `None` for the right-most child.
  pub key: Option<ChildKey>,
  /// Arena index once the child has been decoded.
  pub node: Option<usize>,
}

/// One decoded b-tree page. Leaf pages carry records, interior pages carry
/// child pointers ordered left to right with the right-most pointer last.
/// Index interior pages carry both: `records[i]` sorts between `children[i]`
/// and `children[i + 1]`.
#[derive(Debug, Clone)]
pub struct Node {
  pub page_number: u32,
  pub page_type: PageType,
  pub first_freeblock: u16,
  pub num_cells: u16,
  pub cell_content_start: u16,
  pub fragmented_free_bytes: u8,
  pub records: Vec<Record>,
  pub children: Vec<Child>,
  /// Arena index of the parent, `None` for the root.
  pub parent: Option<usize>,
}

impl Node {
  /// Reads `page_number` through the pager and decodes it. The page is
  /// released before returning whether or not decoding succeeded.
  pub fn decode(
    page_number: u32,
    pager: &Pager,
    parent: Option<(usize, PageType)>,
  ) -> Result<Node> {
    let page = pager.get_page(page_number)?;
    let decoded = Node::from_page(&page, parent);
    drop(page);

    match (decoded, pager.release_page()) {
      (Ok(node), Ok(())) => Ok(node),
      (Ok(_), Err(e)) => Err(e),
      (Err(e), Ok(())) => Err(e),
      (Err(e), Err(release)) => {
        warn!(error = %release, page_number, "failed to release page after decode error");
        Err(e)
      }
    }
  }

  pub fn from_page(page: &Page, parent: Option<(usize, PageType)>) -> Result<Node> {
    let page_number = page.page_number;
    let base = page.btree_header_offset();
    let out_of_bounds = |offset: usize| CorruptError::CellOutOfBounds {
      page: page_number,
      offset,
    };

    let tag = page.read_u8(base).ok_or_else(|| out_of_bounds(base))?;
    let page_type =
      PageType::from_tag(tag).ok_or(CorruptError::UnknownPageType { page: page_number, tag })?;

    if let Some((_, parent_type)) = parent {
      let expected = if page_type.is_table() {
        PageType::TableInterior
      } else {
        PageType::IndexInterior
      };
      if parent_type != expected {
        return Err(
          CorruptError::ParentChildMismatch {
            page: page_number,
            parent: parent_type.as_str(),
            child: page_type.as_str(),
          }
          .into(),
        );
      }
    }

    let header_end = base + page_type.header_size();
    if header_end > page.len() {
      return Err(out_of_bounds(base).into());
    }
    let first_freeblock = page.read_u16(base + 1).ok_or_else(|| out_of_bounds(base))?;
    let num_cells = page.read_u16(base + 3).ok_or_else(|| out_of_bounds(base))?;
    let cell_content_start = page.read_u16(base + 5).ok_or_else(|| out_of_bounds(base))?;
    let fragmented_free_bytes = page.read_u8(base + 7).ok_or_else(|| out_of_bounds(base))?;
    let right_most_pointer = if page_type.is_leaf() {
      None
    } else {
      Some(page.read_u32(base + 8).ok_or_else(|| out_of_bounds(base))?)
    };

    let mut records = Vec::new();
    let mut children = Vec::new();
    for i in 0..num_cells as usize {
      let pointer_offset = header_end + i * 2;
      let cell_offset = page
        .read_u16(pointer_offset)
        .ok_or_else(|| out_of_bounds(pointer_offset))? as usize;

      match Cell::parse(page, page_type, cell_offset)? {
        Cell::TableLeaf { rowid, payload } => records.push(Record {
          rowid,
          columns: read_columns(&payload)?,
        }),
        Cell::IndexLeaf { payload } => records.push(index_record(&payload)?),
        Cell::TableInterior {
          left_child_page,
          key,
        } => children.push(Child {
          page_number: left_child_page,
          key: Some(ChildKey::Rowid(key)),
          node: None,
        }),
        Cell::IndexInterior {
          left_child_page,
          payload,
        } => {
          records.push(index_record(&payload)?);
          children.push(Child {
            page_number: left_child_page,
            key: Some(ChildKey::Index(payload)),
            node: None,
          });
        }
      }
    }

    if let Some(page_number) = right_most_pointer.filter(|&n| n > 0) {
      children.push(Child {
        page_number,
        key: None,
        node: None,
      });
    }

    trace!(
      page_number,
      page_type = page_type.as_str(),
      num_cells,
      records = records.len(),
      children = children.len(),
      "decoded node"
    );

    Ok(Node {
      page_number,
      page_type,
      first_freeblock,
      num_cells,
      cell_content_start,
      fragmented_free_bytes,
      records,
      children,
      parent: parent.map(|(idx, _)| idx),
    })
  }
}

/// Splits an index payload into its key columns and the rowid stored in the
/// trailing column. Rowids 0 and 1 are stored as the constant serial types
/// 8 and 9.
fn index_record(payload: &Bytes) -> std::result::Result<Record, CorruptError> {
  let mut columns = read_columns(payload)?;
  let rowid = columns
    .pop()
    .and_then(|column| column.value().as_integer())
    .ok_or(CorruptError::MalformedIndexRecord)?;
  Ok(Record { rowid, columns })
}
