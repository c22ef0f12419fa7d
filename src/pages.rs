use std::ptr::NonNull;

use log::{debug, trace};

use crate::{
  header,
  protection::PageProtection,
  range::{AddressSpec, MemoryRange, RangeDetails},
  raw,
  scan::{RangeEnumerator, enumerate_free_ranges},
  sys::{self, query_page_size},
};

/// Allocates `n_pages` usable pages with protection `prot`.
///
/// One extra, hidden page in front of the returned pointer records the size
/// of the whole region so [`free_pages`] needs nothing but the pointer.
///
/// # Safety
///
/// The pages belong to the caller until handed to [`free_pages`].
pub unsafe fn allocate_pages(
  n_pages: usize,
  prot: PageProtection,
) -> Option<NonNull<u8>> {
  let page_size = query_page_size();
  let size = total_size(n_pages, page_size)?;

  let base = unsafe { raw::allocate(None, size, page_size, prot)? };

  unsafe { finish(base, size, prot, page_size) }
}

/// Allocates `n_pages` usable pages near `spec.near_address`, searching the
/// gaps between the process's current mappings.
///
/// Both the backing region's base (the hidden header page) and the returned
/// pointer lie within `spec.max_distance` bytes of the target.
///
/// # Safety
///
/// Same as [`allocate_pages`].
#[cfg(any(target_os = "linux", target_os = "android"))]
pub unsafe fn allocate_pages_near(
  n_pages: usize,
  prot: PageProtection,
  spec: &AddressSpec,
) -> Option<NonNull<u8>> {
  unsafe { allocate_pages_near_with(&crate::maps::ProcMapsEnumerator, n_pages, prot, spec) }
}

/// [`allocate_pages_near`] with an explicit source of occupied ranges.
///
/// # Safety
///
/// Same as [`allocate_pages`]. The enumerator must describe this process.
pub unsafe fn allocate_pages_near_with<E>(
  enumerator: &E,
  n_pages: usize,
  prot: PageProtection,
  spec: &AddressSpec,
) -> Option<NonNull<u8>>
where
  E: RangeEnumerator + ?Sized,
{
  let page_size = query_page_size();

  let mut search = NearSearch {
    size: total_size(n_pages, page_size)?,
    page_size,
    prot,
    spec,
    result: None,
  };

  enumerate_free_ranges(enumerator, |details| search.try_range(details));

  let base = search.result?;

  unsafe { finish(base, search.size, prot, page_size) }
}

/// Writes the header of a fresh mapping, or gives the mapping back if that
/// is impossible.
unsafe fn finish(
  base: NonNull<u8>,
  size: usize,
  prot: PageProtection,
  page_size: usize,
) -> Option<NonNull<u8>> {
  match unsafe { header::install(base, size, prot, page_size) } {
    Ok(usable) => Some(usable),
    Err(e) => {
      debug!("writing allocation header failed: {e}");
      unsafe { raw::release(base, size) };
      None
    }
  }
}

/// Releases pages obtained from [`allocate_pages`] or
/// [`allocate_pages_near`], header page included.
///
/// # Safety
///
/// `mem` must come from one of those functions and must not be used again.
pub unsafe fn free_pages(mem: NonNull<u8>) -> bool {
  let page_size = query_page_size();

  let size = unsafe { header::recorded_size(mem, page_size) };
  let base = unsafe { header::header_of(mem, page_size) };

  unsafe { raw::release(base.cast(), size) }
}

/// The full backing region, header page included, of a page allocation
/// that exposes `size` usable bytes at `mem`.
pub fn query_allocation_range(
  mem: NonNull<u8>,
  size: usize,
) -> MemoryRange {
  header::backing_range(mem.as_ptr() as usize, size, query_page_size())
}

fn total_size(
  n_pages: usize,
  page_size: usize,
) -> Option<usize> {
  n_pages.checked_add(1)?.checked_mul(page_size)
}

struct NearSearch<'a> {
  size: usize,
  page_size: usize,
  prot: PageProtection,
  spec: &'a AddressSpec,
  result: Option<NonNull<u8>>,
}

impl NearSearch<'_> {
  /// Picks a base inside `range` that is close enough to the target: the
  /// start of the gap first, then the highest base that still fits.
  fn candidate_base(
    &self,
    range: &MemoryRange,
  ) -> Option<usize> {
    if range.size < self.size {
      return None;
    }

    let low = range.base_address;
    if self.in_reach(low) {
      return Some(low);
    }

    let high = range.base_address + (range.size - self.size);
    self.in_reach(high).then_some(high)
  }

  /// Header page and first usable page must both be within reach.
  fn in_reach(
    &self,
    base: usize,
  ) -> bool {
    self.spec.accepts(base) && self.spec.accepts(base.saturating_add(self.page_size))
  }

  /// Scanner callback; `false` ends the scan.
  fn try_range(
    &mut self,
    details: &RangeDetails,
  ) -> bool {
    let Some(base) = self.candidate_base(&details.range) else {
      return true;
    };

    trace!("trying {:#x} bytes at {base:#x}", self.size);

    match unsafe { sys::map_fixed(base, self.size, self.prot) } {
      Ok(mapped) => {
        self.result = Some(mapped);
        false
      }
      Err(e) => {
        // Someone else got there first; keep looking.
        debug!("near candidate {base:#x} lost: {e}");
        true
      }
    }
  }
}
