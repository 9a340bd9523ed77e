use bytes::Bytes;

use super::PageType;
use crate::error::CorruptError;
use crate::pager::page::Page;

/// Table B-Tree Leaf Cell (header 0x0d):
///
/// ```text
///         A varint which is the total number of bytes of payload, including any overflow
///         A varint which is the integer key, a.k.a. "rowid"
///         The initial portion of the payload that does not spill to overflow pages.
/// ```
///
/// Table B-Tree Interior Cell (header 0x05):
///
/// ```text
///         A 4-byte big-endian page number which is the left child pointer.
///         A varint which is the integer key
/// ```
///
/// Index B-Tree Leaf Cell (header 0x0a):
///
/// ```text
///         A varint which is the total number of bytes of key payload, including any overflow
///         The initial portion of the payload that does not spill to overflow pages.
/// ```
///
/// Index B-Tree Interior Cell (header 0x02):
///
/// ```text
///         A 4-byte big-endian page number which is the left child pointer.
///         A varint which is the total number of bytes of key payload, including any overflow
///         The initial portion of the payload that does not spill to overflow pages.
/// ```
///
/// Payloads that spill onto overflow pages are rejected with
/// `CorruptError::PayloadOverflow`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
  TableLeaf {
    rowid: i64,
    payload: Bytes,
  },
  TableInterior {
    left_child_page: u32,
    key: i64,
  },
  IndexLeaf {
    payload: Bytes,
  },
  IndexInterior {
    left_child_page: u32,
    payload: Bytes,
  },
}

/// Largest payload kept entirely on a b-tree page of `usable` bytes.
/// <https://www.sqlite.org/fileformat2.html#b_tree_pages>
fn max_local(page_type: PageType, usable: usize) -> usize {
  if page_type.is_table() {
    usable - 35
  } else {
    ((usable - 12) * 64 / 255) - 23
  }
}

macro_rules! read_varint_and_advance {
  ($page:expr, $offset:expr, $err:expr) => {{
    let (value, len) = $page.read_varint($offset).ok_or_else($err)?;
    $offset += len;
    value
  }};
}

impl Cell {
  /// Decodes the cell that starts at `offset` on `page`.
  pub fn parse(page: &Page, page_type: PageType, offset: usize) -> Result<Self, CorruptError> {
    let out_of_bounds = || CorruptError::CellOutOfBounds {
      page: page.page_number,
      offset,
    };
    let mut cursor = offset;

    match page_type {
      PageType::TableLeaf => {
        let size = read_varint_and_advance!(page, cursor, out_of_bounds);
        let rowid = read_varint_and_advance!(page, cursor, out_of_bounds) as i64;
        let payload = Self::read_payload(page, page_type, cursor, size)?;
        Ok(Cell::TableLeaf { rowid, payload })
      }
      PageType::TableInterior => {
        let left_child_page = page.read_u32(cursor).ok_or_else(out_of_bounds)?;
        cursor += 4;
        let key = read_varint_and_advance!(page, cursor, out_of_bounds) as i64;
        Ok(Cell::TableInterior {
          left_child_page,
          key,
        })
      }
      PageType::IndexLeaf => {
        let size = read_varint_and_advance!(page, cursor, out_of_bounds);
        let payload = Self::read_payload(page, page_type, cursor, size)?;
        Ok(Cell::IndexLeaf { payload })
      }
      PageType::IndexInterior => {
        let left_child_page = page.read_u32(cursor).ok_or_else(out_of_bounds)?;
        cursor += 4;
        let size = read_varint_and_advance!(page, cursor, out_of_bounds);
        let payload = Self::read_payload(page, page_type, cursor, size)?;
        Ok(Cell::IndexInterior {
          left_child_page,
          payload,
        })
      }
    }
  }

  /// Copies the payload out of the page so the page buffer can be dropped.
  fn read_payload(
    page: &Page,
    page_type: PageType,
    offset: usize,
    size: u64,
  ) -> Result<Bytes, CorruptError> {
    let overflow = CorruptError::PayloadOverflow {
      page: page.page_number,
      offset,
      size,
    };
    if size > max_local(page_type, page.len()) as u64 {
      return Err(overflow);
    }
    let bytes = page.slice(offset..offset + size as usize).ok_or(overflow)?;
    Ok(Bytes::copy_from_slice(bytes))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::varint;

  fn page_with(cell: &[u8]) -> Page {
    let mut data = vec![0u8; 512];
    data[400..400 + cell.len()].copy_from_slice(cell);
    Page::new(2, Bytes::from(data))
  }

  #[test]
  fn table_leaf_cell() {
    let page = page_with(&[0x03, 0x05, 0x02, 0x01, 0x7b]);
    assert_eq!(
      Cell::parse(&page, PageType::TableLeaf, 400).unwrap(),
      Cell::TableLeaf {
        rowid: 5,
        payload: Bytes::from_static(&[0x02, 0x01, 0x7b]),
      }
    );
  }

  #[test]
  fn table_interior_cell() {
    let mut cell = vec![0x00, 0x00, 0x00, 0x07];
    cell.extend(varint::encode(300));
    let page = page_with(&cell);
    assert_eq!(
      Cell::parse(&page, PageType::TableInterior, 400).unwrap(),
      Cell::TableInterior {
        left_child_page: 7,
        key: 300,
      }
    );
  }

  #[test]
  fn index_cells() {
    let page = page_with(&[0x04, 0x03, 0x11, 0x01, 0x61]);
    assert_eq!(
      Cell::parse(&page, PageType::IndexLeaf, 400).unwrap(),
      Cell::IndexLeaf {
        payload: Bytes::from_static(&[0x03, 0x11, 0x01, 0x61]),
      }
    );

    let page = page_with(&[0x00, 0x00, 0x00, 0x09, 0x02, 0xaa, 0xbb]);
    assert_eq!(
      Cell::parse(&page, PageType::IndexInterior, 400).unwrap(),
      Cell::IndexInterior {
        left_child_page: 9,
        payload: Bytes::from_static(&[0xaa, 0xbb]),
      }
    );
  }

  #[test]
  fn payload_past_the_page_is_rejected() {
    let page = page_with(&[0x7f, 0x01]);
    assert!(matches!(
      Cell::parse(&page, PageType::TableLeaf, 400),
      Err(CorruptError::PayloadOverflow { page: 2, .. })
    ));
  }

  #[test]
  fn payload_larger_than_max_local_is_rejected() {
    let mut cell = varint::encode(480);
    cell.push(0x01);
    let mut data = vec![0u8; 512];
    data[4..4 + cell.len()].copy_from_slice(&cell);
    let page = Page::new(2, Bytes::from(data));
    assert!(matches!(
      Cell::parse(&page, PageType::TableLeaf, 4),
      Err(CorruptError::PayloadOverflow { .. })
    ));
  }
}
