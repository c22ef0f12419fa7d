use std::ptr::NonNull;

use log::debug;

use crate::{
  protection::PageProtection,
  range::MemoryRange,
  sys::{self, MemoryError},
};

/// Metadata page placed directly in front of every page allocation.
///
/// ```text
///   ┌──────────────────┬──────────────────────────────────────┐
///   │  header page (R) │           usable pages               │
///   │  size: total     │                                      │
///   └──────────────────┴──────────────────────────────────────┘
///   ▲                  ▲
///   base               pointer returned to the caller
/// ```
#[repr(C)]
pub struct AllocationHeader {
  /// Bytes covered by the allocation, header page included.
  pub size: usize,
}

/// The single place that turns a caller pointer into its header.
///
/// # Safety
///
/// `usable` must have been returned by one of the page allocators and not
/// yet freed.
pub(crate) unsafe fn header_of(
  usable: NonNull<u8>,
  page_size: usize,
) -> NonNull<AllocationHeader> {
  unsafe { usable.sub(page_size).cast::<AllocationHeader>() }
}

/// Full backing region of an allocation whose caller-visible part starts at
/// `usable` and spans `usable_size` bytes. Pure arithmetic: the base wraps
/// and the size saturates rather than panicking on nonsense input.
pub(crate) const fn backing_range(
  usable: usize,
  usable_size: usize,
  page_size: usize,
) -> MemoryRange {
  MemoryRange::new(usable.wrapping_sub(page_size), usable_size.saturating_add(page_size))
}

/// Records `total_size` in the header page at `base` and locks the page
/// read-only. Returns the first usable page.
///
/// Fails without writing anything if a non-writable header page cannot be
/// made writable first; the caller still owns the mapping.
///
/// # Safety
///
/// `base` must point at a fresh mapping of `total_size` bytes made with
/// `prot`.
pub(crate) unsafe fn install(
  base: NonNull<u8>,
  total_size: usize,
  prot: PageProtection,
  page_size: usize,
) -> Result<NonNull<u8>, MemoryError> {
  let address = base.as_ptr() as usize;

  unsafe {
    if !prot.contains(PageProtection::WRITE) {
      sys::protect(address, page_size, PageProtection::READ_WRITE)?;
    }

    base
      .cast::<AllocationHeader>()
      .write(AllocationHeader { size: total_size });

    if let Err(e) = sys::protect(address, page_size, PageProtection::READ) {
      debug!("locking header page failed: {e}");
    }

    Ok(base.add(page_size))
  }
}

/// Reads back the total size recorded by [`install`].
///
/// # Safety
///
/// Same contract as [`header_of`].
pub(crate) unsafe fn recorded_size(
  usable: NonNull<u8>,
  page_size: usize,
) -> usize {
  unsafe { header_of(usable, page_size).as_ref().size }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backing_range_includes_header_page() {
    let range = backing_range(0x20_1000, 3 * 0x1000, 0x1000);

    assert_eq!(range, MemoryRange::new(0x20_0000, 4 * 0x1000));
  }

  #[test]
  fn test_backing_range_never_panics() {
    let range = backing_range(0x10, 0, 0x1000);
    assert_eq!(range, MemoryRange::new(0x10usize.wrapping_sub(0x1000), 0x1000));

    let range = backing_range(0x2000, usize::MAX, 0x1000);
    assert_eq!(range.size, usize::MAX);
  }

  #[test]
  fn test_install_fails_cleanly_on_unmapped_header() {
    let page_size = sys::query_page_size();

    let base = sys::tests::reserve_far(2 * page_size);
    unsafe { sys::unmap(base, 2 * page_size) }.unwrap();

    let base = NonNull::new(base as *mut u8).unwrap();
    let err = unsafe { install(base, 2 * page_size, PageProtection::READ, page_size) }.unwrap_err();

    assert!(matches!(err, MemoryError::Protect { .. }));
    assert_eq!(err.raw_os_error(), Some(libc::ENOMEM));
  }

  #[test]
  fn test_install_records_size_and_locks_page() {
    let page_size = sys::query_page_size();
    let total = 2 * page_size;

    unsafe {
      let base = sys::map_anonymous(None, total, PageProtection::READ_EXECUTE).unwrap();
      let usable = install(base, total, PageProtection::READ_EXECUTE, page_size).unwrap();

      assert_eq!(usable.as_ptr() as usize, base.as_ptr() as usize + page_size);
      assert_eq!(header_of(usable, page_size), base.cast());
      assert_eq!(recorded_size(usable, page_size), total);

      sys::unmap(base.as_ptr() as usize, total).unwrap();
    }
  }
}
