use std::ops::Range;

use bytes::Bytes;

/// One fixed-size page of the database file, 1-indexed.
///
/// The buffer is immutable and cheap to clone. Multi-byte reads are
/// big-endian, as everything in the file format is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
  pub data: Bytes,
  pub page_number: u32,
}

impl Page {
  pub fn new(page_number: u32, data: Bytes) -> Self {
    Self { data, page_number }
  }

  /// A page past the end of the database.
  pub fn zeroed(page_number: u32, page_size: usize) -> Self {
    Self::new(page_number, Bytes::from(vec![0u8; page_size]))
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Offset of the b-tree page header. Page 1 carries the database header in
  /// front of it.
  pub fn btree_header_offset(&self) -> usize {
    if self.page_number == 1 {
      crate::dbheader::HEADER_SIZE
    } else {
      0
    }
  }

  pub fn slice(&self, range: Range<usize>) -> Option<&[u8]> {
    self.data.get(range)
  }

  pub fn read_u8(&self, offset: usize) -> Option<u8> {
    self.data.get(offset).copied()
  }

  pub fn read_u16(&self, offset: usize) -> Option<u16> {
    let b = self.slice(offset..offset + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
  }

  pub fn read_u32(&self, offset: usize) -> Option<u32> {
    let b = self.slice(offset..offset + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
  }

  pub fn read_varint(&self, offset: usize) -> Option<(u64, usize)> {
    crate::varint::decode(self.data.get(offset..)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reads_big_endian() {
    let page = Page::new(
      2,
      Bytes::from_static(&[0x0d, 0x01, 0x02, 0x00, 0x00, 0x00, 0x2a, 0x81, 0x00]),
    );
    assert_eq!(page.read_u8(0), Some(0x0d));
    assert_eq!(page.read_u16(1), Some(0x0102));
    assert_eq!(page.read_u32(3), Some(42));
    assert_eq!(page.read_varint(7), Some((128, 2)));
    assert_eq!(page.read_u32(7), None);
  }

  #[test]
  fn page_one_header_offset() {
    assert_eq!(Page::zeroed(1, 512).btree_header_offset(), 100);
    assert_eq!(Page::zeroed(3, 512).btree_header_offset(), 0);
  }
}
