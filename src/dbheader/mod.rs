use std::fmt::{self, Display, Formatter};

use crate::error::HeaderError;

pub const HEADER_SIZE: usize = 100;
pub const MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Sqlite Database Header
///
/// The first 100 bytes of the database file comprise the database file header. The database file header is divided into fields as shown by the table below.
/// All multibyte fields in the database file header are stored with the most significant byte first (big-endian).
///
/// +------+----+-----------------------------------------------------------------------------------------------------------------------------------------+
/// |Offset|Size|Description                                                                                                                              |
/// +------+----+-----------------------------------------------------------------------------------------------------------------------------------------|
/// |0     |16  |The header string: "SQLite format 3\000"                                                                                                 |
/// |16    |2   |The database page size in bytes. Must be a power of two between 512 and 32768 inclusive or the value 1 representing a page size of 65536.|
/// |18    |1   |File format write version. 1 for legacy; 2 for WAL.                                                                                      |
/// |19    |1   |File format read version. 1 for legacy; 2 for WAL.                                                                                       |
/// |20    |1   |Bytes of unused "reserved" space at the end of each page. Usually 0.                                                                     |
/// |21    |1   |Maximum embedded payload fraction. Must be 64.                                                                                           |
/// |22    |1   |Minimum embedded payload fraction. Must be 32.                                                                                           |
/// |23    |1   |Leaf payload fraction. Must be 32.                                                                                                       |
/// |24    |4   |File change counter.                                                                                                                     |
/// |28    |4   |Size of the database file in pages. The "in-header database size".                                                                       |
/// |32    |4   |Page number of the first freelist trunk page.                                                                                            |
/// |36    |4   |Total number of freelist pages.                                                                                                          |
/// |40    |4   |The schema cookie.                                                                                                                       |
/// |44    |4   |The schema format number. Supported schema formats are 1 2 3 and 4.                                                                      |
/// |48    |4   |Default page cache size.                                                                                                                 |
/// |52    |4   |The page number of the largest root b-tree page when in auto-vacuum or incremental-vacuum modes or zero otherwise.                       |
/// |56    |4   |The database text encoding. A value of 1 means UTF-8. A value of 2 means UTF-16le. A value of 3 means UTF-16be.                          |
/// |60    |4   |The "user version" as read and set by the user_version pragma.                                                                           |
/// |64    |4   |True (non-zero) for incremental-vacuum mode. False (zero) otherwise.                                                                     |
/// |68    |4   |The "Application ID" set by PRAGMA application_id.                                                                                       |
/// |72    |20  |Reserved for expansion. Must be zero.                                                                                                    |
/// |92    |4   |The version-valid-for number.                                                                                                            |
/// |96    |4   |SQLITE_VERSION_NUMBER                                                                                                                    |
/// +------+----+-----------------------------------------------------------------------------------------------------------------------------------------+
///
/// Only WAL-mode, UTF-8, schema format 4 files without end-of-page
/// reservations are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
  /// In bytes, with the stored value 1 already expanded to 65536.
  pub page_size: u32,
  pub file_format_write_version: u8,
  pub file_format_read_version: u8,
  pub reserved_space: u8,
  pub max_embedded_payload_fraction: u8,
  pub min_embedded_payload_fraction: u8,
  pub leaf_payload_fraction: u8,
  pub file_change_counter: u32,
  pub database_size: u32,
  pub first_freelist_trunk_page: u32,
  pub total_freelist_pages: u32,
  pub schema_cookie: u32,
  pub schema_format_number: u32,
  pub default_page_cache_size: u32,
  pub largest_root_b_tree_page: u32,
  pub database_text_encoding: u32,
  pub user_version: u32,
  pub incremental_vacuum_mode: u32,
  pub application_id: u32,
  pub version_valid_for_number: u32,
  pub sqlite_version_number: u32,
}

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
  u32::from_be_bytes([
    bytes[offset],
    bytes[offset + 1],
    bytes[offset + 2],
    bytes[offset + 3],
  ])
}

impl DatabaseHeader {
  pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
    if bytes.len() < HEADER_SIZE {
      return Err(HeaderError::Truncated(bytes.len()));
    }

    let mut magic = [0u8; 16];
    magic.copy_from_slice(&bytes[0..16]);
    if &magic != MAGIC {
      return Err(HeaderError::BadMagic(magic));
    }

    let raw_page_size = u16::from_be_bytes([bytes[16], bytes[17]]) as u32;
    let page_size = if raw_page_size == 1 {
      65536
    } else {
      raw_page_size
    };
    if !page_size.is_power_of_two() || !(512..=65536).contains(&page_size) {
      return Err(HeaderError::InvalidPageSize(raw_page_size));
    }

    let header = DatabaseHeader {
      page_size,
      file_format_write_version: bytes[18],
      file_format_read_version: bytes[19],
      reserved_space: bytes[20],
      max_embedded_payload_fraction: bytes[21],
      min_embedded_payload_fraction: bytes[22],
      leaf_payload_fraction: bytes[23],
      file_change_counter: be_u32(bytes, 24),
      database_size: be_u32(bytes, 28),
      first_freelist_trunk_page: be_u32(bytes, 32),
      total_freelist_pages: be_u32(bytes, 36),
      schema_cookie: be_u32(bytes, 40),
      schema_format_number: be_u32(bytes, 44),
      default_page_cache_size: be_u32(bytes, 48),
      largest_root_b_tree_page: be_u32(bytes, 52),
      database_text_encoding: be_u32(bytes, 56),
      user_version: be_u32(bytes, 60),
      incremental_vacuum_mode: be_u32(bytes, 64),
      application_id: be_u32(bytes, 68),
      version_valid_for_number: be_u32(bytes, 92),
      sqlite_version_number: be_u32(bytes, 96),
    };

    header.validate()?;
    Ok(header)
  }

  fn validate(&self) -> Result<(), HeaderError> {
    if self.file_format_write_version != 2 || self.file_format_read_version != 2 {
      return Err(HeaderError::NotWal {
        write: self.file_format_write_version,
        read: self.file_format_read_version,
      });
    }

    if self.database_text_encoding != 1 {
      return Err(HeaderError::UnsupportedEncoding(self.database_text_encoding));
    }

    // https://www.sqlite.org/fileformat2.html#in_header_database_size
    if self.file_change_counter != self.version_valid_for_number {
      return Err(HeaderError::StalePageCount {
        change_counter: self.file_change_counter,
        version_valid_for: self.version_valid_for_number,
      });
    }

    if self.schema_format_number != 4 {
      return Err(HeaderError::UnsupportedSchemaFormat(self.schema_format_number));
    }

    if self.reserved_space > 0 {
      return Err(HeaderError::ReservedBytes(self.reserved_space));
    }

    Ok(())
  }
}

impl TryFrom<&[u8]> for DatabaseHeader {
  type Error = HeaderError;

  fn try_from(bytes: &[u8]) -> Result<Self, HeaderError> {
    DatabaseHeader::parse(bytes)
  }
}

impl Display for DatabaseHeader {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    let rows: [(&str, u64, &str); 21] = [
      ("Page Size (bytes)", self.page_size as u64, ""),
      ("File Format (write)", self.file_format_write_version as u64, "2 = WAL, 1 = Rollback"),
      ("File Format (read)", self.file_format_read_version as u64, "2 = WAL, 1 = Rollback"),
      ("End of Page Reservation (bytes)", self.reserved_space as u64, ""),
      ("Max Embedded Payload (%)", self.max_embedded_payload_fraction as u64, ""),
      ("Min Embedded Payload (%)", self.min_embedded_payload_fraction as u64, ""),
      ("Min Leaf Payload (%)", self.leaf_payload_fraction as u64, ""),
      ("File Change Counter", self.file_change_counter as u64, ""),
      ("Database Size (pages)", self.database_size as u64, ""),
      ("Freelist First Page (page no)", self.first_freelist_trunk_page as u64, ""),
      ("Freelist Size (pages)", self.total_freelist_pages as u64, ""),
      ("Schema Cookie", self.schema_cookie as u64, ""),
      ("Schema Format Number", self.schema_format_number as u64, ""),
      ("Suggested Page Cache Size", self.default_page_cache_size as u64, "deprecated"),
      ("Vacuuming Next Tree (page no)", self.largest_root_b_tree_page as u64, ""),
      ("Text Encoding", self.database_text_encoding as u64, "1 = UTF-8"),
      ("User Version", self.user_version as u64, ""),
      ("Incremental Vacuuming Enabled", self.incremental_vacuum_mode as u64, ""),
      ("Application ID", self.application_id as u64, ""),
      ("Version Valid For", self.version_valid_for_number as u64, ""),
      ("SQLite Last Write Version", self.sqlite_version_number as u64, ""),
    ];

    writeln!(f, "{:<34} SQLite format 3", "Magic String:")?;
    for (label, value, note) in rows {
      let label = format!("{label}:");
      if note.is_empty() {
        writeln!(f, "{label:<34} {value}")?;
      } else {
        writeln!(f, "{label:<34} {value:<20} # {note}")?;
      }
    }
    Ok(())
  }
}
