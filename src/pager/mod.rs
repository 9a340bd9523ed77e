//! File access, advisory locking and header caching.
//!
//! Every page handed out by [`Pager::get_page`] is counted; the SHARED lock
//! taken for the first page is dropped again once the count returns to zero
//! through [`Pager::release_page`]. The header is re-read every time a fresh
//! SHARED lock is taken, because another process may have written to the file
//! in between.

pub mod lock;
pub mod page;

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::dbheader::{DatabaseHeader, HEADER_SIZE};
use crate::error::{Error, HeaderError, Result};
use lock::LockLevel;
use page::Page;

pub struct Pager {
  path: PathBuf,
  state: Mutex<PagerState>,
}

struct PagerState {
  file: Option<File>,
  lock: LockLevel,
  ref_count: usize,
  header: Option<DatabaseHeader>,
  schema_generation: u64,
}

impl PagerState {
  fn file(&self) -> Result<&File> {
    self.file.as_ref().ok_or(Error::Closed)
  }

  /// Takes the SHARED lock if it is not already held, refreshing the header
  /// when it is.
  fn ensure_shared(&mut self) -> Result<DatabaseHeader> {
    if self.lock < LockLevel::Shared {
      self.acquire_shared()?;
    }
    match &self.header {
      Some(header) => Ok(header.clone()),
      None => self.refresh_header(),
    }
  }

  fn acquire_shared(&mut self) -> Result<DatabaseHeader> {
    lock::acquire(self.file()?, self.lock, LockLevel::Shared)?;
    self.lock = LockLevel::Shared;
    match self.refresh_header() {
      Ok(header) => Ok(header),
      Err(e) => {
        self.release_after_failure();
        Err(e)
      }
    }
  }

  fn release_shared(&mut self) -> Result<()> {
    lock::release(self.file()?, self.lock, LockLevel::NoLock)?;
    self.lock = LockLevel::NoLock;
    Ok(())
  }

  /// Drops a SHARED lock nobody is using after a failed read. The first
  /// error is what the caller sees, so a second failure is only logged.
  fn release_after_failure(&mut self) {
    if self.ref_count > 0 || self.lock == LockLevel::NoLock {
      return;
    }
    if let Err(e) = self.release_shared() {
      warn!(error = %e, "failed to release shared lock after error");
    }
  }

  fn refresh_header(&mut self) -> Result<DatabaseHeader> {
    let file = self.file()?;
    let len = file.metadata()?.len();
    if len < HEADER_SIZE as u64 {
      return Err(HeaderError::Truncated(len as usize).into());
    }
    let mut bytes = [0u8; HEADER_SIZE];
    file.read_exact_at(&mut bytes, 0)?;
    let header = DatabaseHeader::parse(&bytes)?;

    if let Some(previous) = &self.header {
      if previous.schema_cookie != header.schema_cookie {
        self.schema_generation += 1;
        debug!(
          old = previous.schema_cookie,
          new = header.schema_cookie,
          generation = self.schema_generation,
          "schema cookie changed"
        );
      }
    }
    trace!(
      page_size = header.page_size,
      pages = header.database_size,
      schema_cookie = header.schema_cookie,
      "read database header"
    );
    self.header = Some(header.clone());
    Ok(header)
  }

  fn read_page(&self, page_number: u32, header: &DatabaseHeader) -> Result<Page> {
    let page_size = header.page_size as usize;
    if page_number > header.database_size {
      trace!(page_number, pages = header.database_size, "page past end of database");
      return Ok(Page::zeroed(page_number, page_size));
    }

    let mut data = vec![0u8; page_size];
    let offset = (page_number as u64 - 1) * page_size as u64;
    self.file()?.read_exact_at(&mut data, offset)?;
    trace!(page_number, offset, "read page");
    Ok(Page::new(page_number, Bytes::from(data)))
  }
}

impl Pager {
  /// Opens the file read-only. Nothing is read until the first page or
  /// header request.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    debug!(path = %path.display(), "opening database");
    let file = File::open(&path)?;
    Ok(Self {
      path,
      state: Mutex::new(PagerState {
        file: Some(file),
        lock: LockLevel::NoLock,
        ref_count: 0,
        header: None,
        schema_generation: 0,
      }),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Returns page `page_number` (1-indexed) and counts it as held. Pages past
  /// the in-header database size come back zero-filled.
  pub fn get_page(&self, page_number: u32) -> Result<Page> {
    if page_number < 1 {
      return Err(Error::InvalidPageNumber(page_number));
    }

    let mut state = self.state.lock();
    let header = state.ensure_shared()?;
    match state.read_page(page_number, &header) {
      Ok(page) => {
        state.ref_count += 1;
        Ok(page)
      }
      Err(e) => {
        state.release_after_failure();
        Err(e)
      }
    }
  }

  /// Gives back one page obtained from `get_page`. The last release drops
  /// the SHARED lock.
  pub fn release_page(&self) -> Result<()> {
    let mut state = self.state.lock();
    if state.ref_count == 0 {
      return Err(Error::NoPagesHeld);
    }
    state.ref_count -= 1;
    if state.ref_count == 0 && state.lock > LockLevel::NoLock {
      state.release_shared()?;
    }
    Ok(())
  }

  /// Reads the header under a SHARED lock. The lock is only kept if pages are
  /// outstanding or it was already held.
  pub fn header(&self) -> Result<DatabaseHeader> {
    let mut state = self.state.lock();
    let acquired = state.lock < LockLevel::Shared;
    let header = state.ensure_shared()?;
    if acquired && state.ref_count == 0 {
      state.release_shared()?;
    }
    Ok(header)
  }

  /// Explicitly takes a lock. Moving to SHARED refreshes the header.
  pub fn lock(&self, level: LockLevel) -> Result<()> {
    let mut state = self.state.lock();
    if level == LockLevel::Shared && state.lock < LockLevel::Shared {
      state.acquire_shared()?;
      return Ok(());
    }
    lock::acquire(state.file()?, state.lock, level)
  }

  /// Explicitly drops a lock. Dropping to NONE requires that no pages are
  /// held.
  pub fn unlock(&self, level: LockLevel) -> Result<()> {
    let mut state = self.state.lock();
    if level == LockLevel::NoLock && state.lock > LockLevel::NoLock {
      if state.ref_count > 0 {
        return Err(Error::PagesOutstanding(state.ref_count));
      }
      return state.release_shared();
    }
    lock::release(state.file()?, state.lock, level)
  }

  pub fn lock_level(&self) -> LockLevel {
    self.state.lock().lock
  }

  pub fn page_refs(&self) -> usize {
    self.state.lock().ref_count
  }

  /// Bumped whenever a header refresh sees a different schema cookie.
  /// Anything cached from the schema is stale once this moves.
  pub fn schema_generation(&self) -> u64 {
    self.state.lock().schema_generation
  }

  /// Closes the file. All pages must have been released (and with them the
  /// lock) first.
  pub fn close(&self) -> Result<()> {
    let mut state = self.state.lock();
    if state.ref_count > 0 {
      return Err(Error::PagesOutstanding(state.ref_count));
    }
    if state.lock > LockLevel::NoLock {
      return Err(Error::LockStillHeld(state.lock));
    }
    match state.file.take() {
      Some(_) => {
        debug!(path = %self.path.display(), "closed database");
        Ok(())
      }
      None => Err(Error::Closed),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;
  use crate::dbheader::tests::valid_header_bytes;
  use crate::error::LockError;

  fn database_file(pages: u32) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let mut image = vec![0u8; 4096 * pages as usize];
    image[..100].copy_from_slice(&valid_header_bytes());
    image[28..32].copy_from_slice(&pages.to_be_bytes());
    for page in 1..pages as usize {
      image[page * 4096] = page as u8;
    }
    file.write_all(&image).unwrap();
    file.flush().unwrap();
    file
  }

  #[test]
  fn opening_does_not_lock() {
    let file = database_file(2);
    let pager = Pager::open(file.path()).unwrap();
    assert_eq!(pager.lock_level(), LockLevel::NoLock);
    assert_eq!(pager.page_refs(), 0);
  }

  #[test]
  fn page_reads_hold_shared_until_released() {
    let file = database_file(3);
    let pager = Pager::open(file.path()).unwrap();

    let first = pager.get_page(2).unwrap();
    let second = pager.get_page(3).unwrap();
    assert_eq!(first.read_u8(0), Some(1));
    assert_eq!(second.read_u8(0), Some(2));
    assert_eq!(pager.lock_level(), LockLevel::Shared);
    assert_eq!(pager.page_refs(), 2);

    pager.release_page().unwrap();
    assert_eq!(pager.lock_level(), LockLevel::Shared);
    pager.release_page().unwrap();
    assert_eq!(pager.lock_level(), LockLevel::NoLock);
    assert!(matches!(pager.release_page(), Err(Error::NoPagesHeld)));
  }

  #[test]
  fn page_one_starts_with_the_header() {
    let file = database_file(2);
    let pager = Pager::open(file.path()).unwrap();
    let page = pager.get_page(1).unwrap();
    assert_eq!(page.slice(0..16), Some(&crate::dbheader::MAGIC[..]));
    assert_eq!(page.len(), 4096);
    pager.release_page().unwrap();
  }

  #[test]
  fn pages_past_the_end_are_zero() {
    let file = database_file(2);
    let pager = Pager::open(file.path()).unwrap();
    let page = pager.get_page(9).unwrap();
    assert_eq!(page.len(), 4096);
    assert!(page.data.iter().all(|&b| b == 0));
    pager.release_page().unwrap();
  }

  #[test]
  fn page_zero_is_invalid() {
    let file = database_file(2);
    let pager = Pager::open(file.path()).unwrap();
    assert!(matches!(pager.get_page(0), Err(Error::InvalidPageNumber(0))));
    assert_eq!(pager.lock_level(), LockLevel::NoLock);
  }

  #[test]
  fn header_does_not_keep_the_lock() {
    let file = database_file(2);
    let pager = Pager::open(file.path()).unwrap();
    let header = pager.header().unwrap();
    assert_eq!(header.page_size, 4096);
    assert_eq!(header.database_size, 2);
    assert_eq!(pager.lock_level(), LockLevel::NoLock);
  }

  #[test]
  fn explicit_lock_ordering() {
    let file = database_file(2);
    let pager = Pager::open(file.path()).unwrap();

    pager.lock(LockLevel::Shared).unwrap();
    assert!(matches!(
      pager.lock(LockLevel::Shared),
      Err(Error::Lock(LockError::AlreadyHeld { .. }))
    ));
    pager.unlock(LockLevel::NoLock).unwrap();
    assert!(matches!(
      pager.unlock(LockLevel::NoLock),
      Err(Error::Lock(LockError::NotHeld { .. }))
    ));

    // A later read takes the lock again on its own.
    pager.get_page(1).unwrap();
    assert_eq!(pager.lock_level(), LockLevel::Shared);
    pager.release_page().unwrap();
    assert_eq!(pager.lock_level(), LockLevel::NoLock);
  }

  #[test]
  fn schema_cookie_change_bumps_generation() {
    let mut file = database_file(2);
    let pager = Pager::open(file.path()).unwrap();
    pager.header().unwrap();
    assert_eq!(pager.schema_generation(), 0);

    let mut bytes = valid_header_bytes();
    bytes[28..32].copy_from_slice(&2u32.to_be_bytes());
    bytes[40..44].copy_from_slice(&99u32.to_be_bytes());
    file.as_file().write_all_at(&bytes, 0).unwrap();
    file.flush().unwrap();

    assert_eq!(pager.header().unwrap().schema_cookie, 99);
    assert_eq!(pager.schema_generation(), 1);
  }

  #[test]
  fn invalid_header_releases_the_lock() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0u8; 4096]).unwrap();
    let pager = Pager::open(file.path()).unwrap();
    assert!(matches!(
      pager.get_page(1),
      Err(Error::Header(HeaderError::BadMagic(_)))
    ));
    assert_eq!(pager.lock_level(), LockLevel::NoLock);
  }

  #[test]
  fn close_requires_released_pages() {
    let file = database_file(2);
    let pager = Pager::open(file.path()).unwrap();
    pager.get_page(1).unwrap();
    assert!(matches!(pager.close(), Err(Error::PagesOutstanding(1))));
    pager.release_page().unwrap();
    pager.close().unwrap();
    assert!(matches!(pager.get_page(1), Err(Error::Closed)));
    assert!(matches!(pager.close(), Err(Error::Closed)));
  }
}
