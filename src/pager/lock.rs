//! Byte-range advisory locks on the lock-byte page.
//!
//! Readers and writers coordinate through POSIX `fcntl` locks over three
//! regions starting at the 1 GiB boundary of the file:
//!
//! - `PENDING_BYTE` (1 byte)
//! - `RESERVED_BYTE` (1 byte)
//! - `SHARED_FIRST` (`SHARED_SIZE` bytes)
//!
//! A read lock on the whole shared range means "at least one reader holds a
//! SHARED lock". Only the `NoLock <-> Shared` transitions are implemented.

use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::os::fd::AsRawFd;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use tracing::trace;

use crate::error::{Error, LockError, Result};

pub const PENDING_BYTE: u64 = 0x4000_0000;
pub const RESERVED_BYTE: u64 = PENDING_BYTE + 8;
pub const SHARED_FIRST: u64 = PENDING_BYTE + 16;
pub const SHARED_SIZE: u64 = 510;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockLevel {
  NoLock,
  Shared,
  Reserved,
  Pending,
  Exclusive,
}

impl LockLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      LockLevel::NoLock => "NONE",
      LockLevel::Shared => "SHARED",
      LockLevel::Reserved => "RESERVED",
      LockLevel::Pending => "PENDING",
      LockLevel::Exclusive => "EXCLUSIVE",
    }
  }
}

impl Display for LockLevel {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Clone, Copy)]
enum RangeLock {
  Read,
  Unlock,
}

/// Non-blocking `F_SETLK`. Contention is reported as `LockError::Busy`.
fn set_lock(file: &File, kind: RangeLock, start: u64, len: u64) -> Result<()> {
  let l_type = match kind {
    RangeLock::Read => libc::F_RDLCK,
    RangeLock::Unlock => libc::F_UNLCK,
  };
  let flock = libc::flock {
    l_type: l_type as libc::c_short,
    l_whence: libc::SEEK_SET as libc::c_short,
    l_start: start as libc::off_t,
    l_len: len as libc::off_t,
    l_pid: 0,
  };

  match fcntl(file.as_raw_fd(), FcntlArg::F_SETLK(&flock)) {
    Ok(_) => Ok(()),
    Err(Errno::EACCES | Errno::EAGAIN) => Err(LockError::Busy.into()),
    Err(e) => Err(Error::Io(e.into())),
  }
}

/// Moves `held` up to `requested`. Only `NoLock -> Shared` is supported.
pub(crate) fn acquire(file: &File, held: LockLevel, requested: LockLevel) -> Result<()> {
  if held >= requested {
    return Err(LockError::AlreadyHeld { held, requested }.into());
  }

  match requested {
    LockLevel::Shared => {
      // Holding PENDING for read keeps a writer from completing its upgrade
      // while the shared range is taken.
      set_lock(file, RangeLock::Read, PENDING_BYTE, 1)?;
      let shared = set_lock(file, RangeLock::Read, SHARED_FIRST, SHARED_SIZE);
      let released = set_lock(file, RangeLock::Unlock, PENDING_BYTE, 1);
      shared?;
      released?;
      trace!(from = %held, to = %requested, "acquired lock");
      Ok(())
    }
    other => Err(LockError::Unsupported(other).into()),
  }
}

/// Moves `held` down to `requested`. Only `Shared -> NoLock` is supported.
pub(crate) fn release(file: &File, held: LockLevel, requested: LockLevel) -> Result<()> {
  if held <= requested {
    return Err(LockError::NotHeld { held, requested }.into());
  }

  match requested {
    LockLevel::NoLock => {
      set_lock(file, RangeLock::Unlock, SHARED_FIRST, SHARED_SIZE)?;
      trace!(from = %held, to = %requested, "released lock");
      Ok(())
    }
    other => Err(LockError::Unsupported(other).into()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn levels_are_ordered() {
    assert!(LockLevel::NoLock < LockLevel::Shared);
    assert!(LockLevel::Shared < LockLevel::Reserved);
    assert!(LockLevel::Reserved < LockLevel::Pending);
    assert!(LockLevel::Pending < LockLevel::Exclusive);
  }

  #[test]
  fn shared_round_trip() {
    let file = tempfile::tempfile().unwrap();
    acquire(&file, LockLevel::NoLock, LockLevel::Shared).unwrap();
    release(&file, LockLevel::Shared, LockLevel::NoLock).unwrap();
  }

  #[test]
  fn rejects_contract_violations() {
    let file = tempfile::tempfile().unwrap();
    assert!(matches!(
      acquire(&file, LockLevel::Shared, LockLevel::Shared),
      Err(Error::Lock(LockError::AlreadyHeld { .. }))
    ));
    assert!(matches!(
      release(&file, LockLevel::NoLock, LockLevel::NoLock),
      Err(Error::Lock(LockError::NotHeld { .. }))
    ));
    assert!(matches!(
      acquire(&file, LockLevel::Shared, LockLevel::Reserved),
      Err(Error::Lock(LockError::Unsupported(LockLevel::Reserved)))
    ));
    assert!(matches!(
      acquire(&file, LockLevel::NoLock, LockLevel::Exclusive),
      Err(Error::Lock(LockError::Unsupported(LockLevel::Exclusive)))
    ));
  }
}
