//! Thin wrappers over the OS mapping primitives.
//!
//! Everything here returns a typed [`MemoryError`]; the public operations
//! built on top collapse those into sentinels after logging them.

use std::{io, ptr, ptr::NonNull, sync::OnceLock};

use libc::{c_int, c_void};
use log::{debug, warn};

use crate::protection::PageProtection;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
  #[error("mmap of {size:#x} bytes failed: {source}")]
  Map { size: usize, source: io::Error },
  #[error("munmap of {size:#x} bytes at {address:#x} failed: {source}")]
  Unmap {
    address: usize,
    size: usize,
    source: io::Error,
  },
  #[error("mprotect of {size:#x} bytes at {address:#x} failed: {source}")]
  Protect {
    address: usize,
    size: usize,
    source: io::Error,
  },
  #[error("madvise({advice}) at {address:#x} failed: {source}")]
  Advise {
    address: usize,
    advice: c_int,
    source: io::Error,
  },
  #[error("requested a mapping at {requested:#x}, kernel placed it at {actual:#x}")]
  AddressTaken { requested: usize, actual: usize },
}

impl MemoryError {
  /// The errno behind the failure, if the OS reported one.
  pub fn raw_os_error(&self) -> Option<i32> {
    match self {
      Self::Map { source, .. }
      | Self::Unmap { source, .. }
      | Self::Protect { source, .. }
      | Self::Advise { source, .. } => source.raw_os_error(),
      Self::AddressTaken { .. } => None,
    }
  }
}

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// The OS page size. Queried once, then constant for the process lifetime.
pub fn query_page_size() -> usize {
  *PAGE_SIZE.get_or_init(|| {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
      warn!(
        "sysconf(_SC_PAGESIZE) failed ({}), assuming 4096-byte pages",
        io::Error::last_os_error()
      );
      return 4096;
    }
    size as usize
  })
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_FIXED_NOREPLACE: c_int = libc::MAP_FIXED_NOREPLACE;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_FIXED_NOREPLACE: c_int = 0;

/// Maps `size` bytes of anonymous private memory, using `address` as a hint.
pub unsafe fn map_anonymous(
  address: Option<usize>,
  size: usize,
  prot: PageProtection,
) -> Result<NonNull<u8>, MemoryError> {
  let hint = address.map_or(ptr::null_mut(), |a| a as *mut c_void);
  unsafe { map(hint, size, prot, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS) }
}

/// Maps `size` bytes at exactly `address`, or fails without disturbing
/// whatever already lives there.
///
/// Kernels without `MAP_FIXED_NOREPLACE` treat the address as a hint; the
/// placement is therefore always checked and a misplaced mapping undone.
pub unsafe fn map_fixed(
  address: usize,
  size: usize,
  prot: PageProtection,
) -> Result<NonNull<u8>, MemoryError> {
  let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | MAP_FIXED_NOREPLACE;
  let mapped = unsafe { map(address as *mut c_void, size, prot, flags)? };

  if mapped.as_ptr() as usize != address {
    let actual = mapped.as_ptr() as usize;
    if let Err(e) = unsafe { unmap(actual, size) } {
      debug!("failed to undo misplaced mapping: {e}");
    }
    return Err(MemoryError::AddressTaken {
      requested: address,
      actual,
    });
  }

  Ok(mapped)
}

unsafe fn map(
  hint: *mut c_void,
  size: usize,
  prot: PageProtection,
  flags: c_int,
) -> Result<NonNull<u8>, MemoryError> {
  let result = unsafe { libc::mmap(hint, size, prot.to_native(), flags, -1, 0) };

  if result == libc::MAP_FAILED {
    return Err(MemoryError::Map {
      size,
      source: io::Error::last_os_error(),
    });
  }

  NonNull::new(result.cast::<u8>()).ok_or_else(|| MemoryError::Map {
    size,
    source: io::Error::other("mmap returned null"),
  })
}

pub unsafe fn unmap(
  address: usize,
  size: usize,
) -> Result<(), MemoryError> {
  if unsafe { libc::munmap(address as *mut c_void, size) } != 0 {
    return Err(MemoryError::Unmap {
      address,
      size,
      source: io::Error::last_os_error(),
    });
  }
  Ok(())
}

pub unsafe fn protect(
  address: usize,
  size: usize,
  prot: PageProtection,
) -> Result<(), MemoryError> {
  if unsafe { libc::mprotect(address as *mut c_void, size, prot.to_native()) } != 0 {
    return Err(MemoryError::Protect {
      address,
      size,
      source: io::Error::last_os_error(),
    });
  }
  Ok(())
}

pub unsafe fn advise(
  address: usize,
  size: usize,
  advice: c_int,
) -> Result<(), MemoryError> {
  if unsafe { libc::madvise(address as *mut c_void, size, advice) } != 0 {
    return Err(MemoryError::Advise {
      address,
      advice,
      source: io::Error::last_os_error(),
    });
  }
  Ok(())
}
