use std::ptr::NonNull;

use log::{debug, trace};

use crate::{
  protection::PageProtection,
  sys::{self, MemoryError, query_page_size},
};

/// Maps `size` bytes, rounded up to whole pages, aligned to `alignment`.
///
/// Over-allocates by `alignment - page_size`, then hands the misaligned head
/// and the unused tail back to the OS:
///
/// ```text
///   base          aligned_base                   aligned_base + size
///   │  prefix      │            size               │   suffix   │
///   ├──────────────┼───────────────────────────────┼────────────┤
///   └─ unmapped ───┘                               └─ unmapped ─┘
/// ```
///
/// `alignment` must be a power of two; anything below the page size is
/// treated as the page size. `address` is only a hint.
///
/// # Safety
///
/// The returned region is owned by the caller and must be released with
/// [`free`] or [`release`] using the same `size`.
pub unsafe fn allocate(
  address: Option<usize>,
  size: usize,
  alignment: usize,
  prot: PageProtection,
) -> Option<NonNull<u8>> {
  if size == 0 {
    return None;
  }

  let page_size = query_page_size();
  let alignment = alignment.max(page_size);
  debug_assert!(alignment.is_power_of_two());

  let hint = address.map(|a| crate::align_down!(a, alignment));

  let size = size.checked_add(page_size - 1)? & !(page_size - 1);
  let allocation_size = size.checked_add(alignment - page_size)?;

  let base = match unsafe { sys::map_anonymous(hint, allocation_size, prot) } {
    Ok(base) => base.as_ptr() as usize,
    Err(e) => {
      debug!("allocate({size:#x}, align {alignment:#x}) failed: {e}");
      return None;
    }
  };

  let aligned_base = unsafe { trim_to_alignment(base, allocation_size, size, alignment) };

  trace!("allocated {size:#x} bytes at {aligned_base:#x} (align {alignment:#x})");

  NonNull::new(aligned_base as *mut u8)
}

/// Unmaps everything in `[base, base + allocation_size)` outside the first
/// `alignment`-aligned run of `size` bytes and returns the start of that run.
///
/// Panics if any of the slack is still mapped afterwards.
unsafe fn trim_to_alignment(
  base: usize,
  allocation_size: usize,
  size: usize,
  alignment: usize,
) -> usize {
  let aligned_base = crate::align_up!(base, alignment);
  let mut remaining = allocation_size;

  let prefix_size = aligned_base - base;
  if prefix_size != 0 && unsafe { trim(base, prefix_size) } {
    remaining -= prefix_size;
  }

  let suffix_start = aligned_base + size;
  let suffix_size = (base + allocation_size) - suffix_start;
  if suffix_size != 0 && unsafe { trim(suffix_start, suffix_size) } {
    remaining -= suffix_size;
  }

  assert_eq!(remaining, size, "aligned allocation left slack mapped");

  aligned_base
}

unsafe fn trim(
  address: usize,
  size: usize,
) -> bool {
  match unsafe { sys::unmap(address, size) } {
    Ok(()) => true,
    Err(e) => {
      debug!("trimming allocation slack failed: {e}");
      false
    }
  }
}

/// Unmaps exactly `[address, address + size)`.
///
/// # Safety
///
/// No live references into the region may remain.
pub unsafe fn free(
  address: NonNull<u8>,
  size: usize,
) -> bool {
  log_failure(unsafe { sys::unmap(address.as_ptr() as usize, size) })
}

/// Makes the region usable. Pages are backed lazily on first touch, so
/// there is nothing to do.
pub fn commit(
  _address: NonNull<u8>,
  _size: usize,
  _prot: PageProtection,
) -> bool {
  true
}

/// Tells the OS the backing of the region may be reclaimed. The address
/// range stays reserved and readable; reclaimed pages read back as zero.
///
/// # Safety
///
/// The contents of the region are lost.
pub unsafe fn decommit(
  address: NonNull<u8>,
  size: usize,
) -> bool {
  let address = address.as_ptr() as usize;

  let result = match unsafe { sys::advise(address, size, libc::MADV_FREE) } {
    Err(e) if e.raw_os_error() == Some(libc::ENOSYS) => return true,
    Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
      trace!("MADV_FREE rejected, falling back to MADV_DONTNEED: {e}");
      unsafe { sys::advise(address, size, libc::MADV_DONTNEED) }
    }
    other => other,
  };

  log_failure(result)
}

/// Gives the region's address space and backing back to the OS.
///
/// # Safety
///
/// Same as [`free`].
pub unsafe fn release(
  address: NonNull<u8>,
  size: usize,
) -> bool {
  unsafe { free(address, size) }
}

/// Changes the protection of `[address, address + size)`.
///
/// # Safety
///
/// Removing access from memory that is still referenced faults on the next
/// access.
pub unsafe fn protect(
  address: NonNull<u8>,
  size: usize,
  prot: PageProtection,
) -> bool {
  log_failure(unsafe { sys::protect(address.as_ptr() as usize, size, prot) })
}

fn log_failure(result: Result<(), MemoryError>) -> bool {
  match result {
    Ok(()) => true,
    Err(e) => {
      debug!("{e}");
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;
  use crate::sys::tests::{mapped_pages, reserve_far};

  #[test]
  fn test_page_aligned_allocation() {
    let page = query_page_size();

    unsafe {
      let ptr = allocate(None, 3 * page, page, PageProtection::READ_WRITE).unwrap();

      assert_eq!(ptr.as_ptr() as usize % page, 0);
      ptr.as_ptr().write_bytes(0x11, 3 * page);

      assert!(free(ptr, 3 * page));
    }
  }

  #[test]
  fn test_large_alignment_trims_slack() {
    let page = query_page_size();
    let alignment = 64 * page;
    let size = 2 * page;

    unsafe {
      let ptr = allocate(None, size, alignment, PageProtection::READ_WRITE).unwrap();
      let address = ptr.as_ptr() as usize;

      assert_eq!(address % alignment, 0);
      assert_eq!(mapped_pages(address, 2), 2);
      assert!(free(ptr, size));
    }
  }

  #[test]
  fn test_trim_unmaps_prefix_and_suffix() {
    let page = query_page_size();
    let alignment = 16 * page;
    let size = 3 * page;
    let allocation_size = size + alignment - page;

    // A mapping that starts three pages past a reservation boundary, so the
    // prefix is not empty whenever the reservation itself is aligned.
    let reservation = reserve_far(3 * page + allocation_size);
    let base = reservation + 3 * page;
    unsafe { sys::unmap(reservation, 3 * page) }.unwrap();

    let aligned = unsafe { trim_to_alignment(base, allocation_size, size, alignment) };

    assert_eq!(aligned % alignment, 0);
    assert!(aligned >= base && aligned + size <= base + allocation_size);
    assert_eq!(mapped_pages(aligned, 3), 3);
    assert_eq!(mapped_pages(base, allocation_size / page), 3);

    unsafe { sys::unmap(aligned, size) }.unwrap();
    assert_eq!(mapped_pages(base, allocation_size / page), 0);
  }

  #[test]
  fn test_partial_page_size_is_rounded_and_fully_trimmed() {
    let page = query_page_size();
    let alignment = 64 * page;

    // Free far-away space to aim the hint at.
    let hint = reserve_far(2 * alignment);
    unsafe { sys::unmap(hint, 2 * alignment) }.unwrap();

    unsafe {
      let ptr = allocate(Some(hint), page + 1, alignment, PageProtection::READ_WRITE).unwrap();
      let address = ptr.as_ptr() as usize;

      assert_eq!(address % alignment, 0);
      assert_eq!(mapped_pages(address, 2), 2);
      assert_eq!(mapped_pages(address + 2 * page, 62), 0);
      ptr.as_ptr().add(2 * page - 1).write(0x77);

      assert!(free(ptr, page + 1));
      assert_eq!(mapped_pages(address, 2), 0);
    }
  }

  #[test]
  fn test_zero_size_fails() {
    unsafe {
      assert!(allocate(None, 0, query_page_size(), PageProtection::READ).is_none());
    }
  }

  #[test]
  fn test_hint_is_rounded_down() {
    let page = query_page_size();

    unsafe {
      let scratch = allocate(None, 4 * page, 4 * page, PageProtection::NO_ACCESS).unwrap();
      let target = scratch.as_ptr() as usize;
      assert!(release(scratch, 4 * page));

      // The hint is advisory; only the alignment is guaranteed.
      let ptr = allocate(Some(target + 123), page, 4 * page, PageProtection::READ).unwrap();
      assert_eq!(ptr.as_ptr() as usize % (4 * page), 0);
      assert!(release(ptr, page));
    }
  }

  #[test]
  fn test_oversized_request_fails() {
    let page = query_page_size();

    unsafe {
      assert!(allocate(None, usize::MAX - page, 2 * page, PageProtection::READ).is_none());
    }
  }

  #[test]
  fn test_decommit_then_commit_keeps_region_usable() {
    let page = query_page_size();
    let size = 4 * page;

    unsafe {
      let ptr = allocate(None, size, page, PageProtection::READ_WRITE).unwrap();
      ptr.as_ptr().write_bytes(0xEE, size);

      assert!(decommit(ptr, size));
      assert!(commit(ptr, size, PageProtection::READ_WRITE));

      ptr.as_ptr().write(7);
      ptr.as_ptr().add(size - 1).write(9);
      assert_eq!(ptr.as_ptr().read(), 7);

      assert!(release(ptr, size));
    }
  }

  #[test]
  fn test_protect_changes_access() {
    let page = query_page_size();

    unsafe {
      let ptr = allocate(None, page, page, PageProtection::NO_ACCESS).unwrap();

      assert!(protect(ptr, page, PageProtection::READ_WRITE));
      ptr.as_ptr().write(42);
      assert!(protect(ptr, page, PageProtection::READ));
      assert_eq!(ptr.as_ptr().read(), 42);

      assert!(release(ptr, page));
    }
  }

  #[test]
  fn test_free_rejects_unaligned_address() {
    let page = query_page_size();
    let bogus = NonNull::new((page + 1) as *mut u8).unwrap();

    unsafe {
      assert!(!free(bogus, page));
    }
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn allocations_honour_alignment_and_size(pages in 1usize..16, shift in 0u32..8) {
      let page = query_page_size();
      let size = pages * page;
      let alignment = page << shift;

      unsafe {
        let ptr = allocate(None, size, alignment, PageProtection::READ_WRITE).unwrap();
        let address = ptr.as_ptr() as usize;

        prop_assert_eq!(address % alignment, 0);
        prop_assert_eq!(mapped_pages(address, pages), pages);
        prop_assert!(free(ptr, size));
      }
    }
  }
}
