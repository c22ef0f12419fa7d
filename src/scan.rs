use log::{trace, warn};

use crate::{
  protection::PageProtection,
  range::{MemoryRange, RangeDetails},
};

/// Source of the process's occupied address ranges.
///
/// Implementations call `func` once per occupied range, in strictly
/// ascending, non-overlapping base-address order, and stop as soon as it
/// returns `false`. Only ranges whose protection includes every flag in
/// `prot` are reported, so [`PageProtection::NO_ACCESS`] asks for all of them.
pub trait RangeEnumerator {
  fn enumerate_ranges(
    &self,
    prot: PageProtection,
    func: &mut dyn FnMut(&RangeDetails) -> bool,
  );
}

impl<T: RangeEnumerator + ?Sized> RangeEnumerator for &T {
  fn enumerate_ranges(
    &self,
    prot: PageProtection,
    func: &mut dyn FnMut(&RangeDetails) -> bool,
  ) {
    (**self).enumerate_ranges(prot, func)
  }
}

/// Tracks the end of the last occupied range seen and turns each new one
/// into the gap that precedes it.
#[derive(Debug, Default)]
struct GapTracker {
  prev_end: Option<usize>,
}

impl GapTracker {
  fn next_gap(
    &mut self,
    occupied: &MemoryRange,
  ) -> Option<MemoryRange> {
    let start = occupied.base_address;
    let end = occupied.end();

    let gap = match self.prev_end {
      Some(prev_end) if start > prev_end => Some(MemoryRange::new(prev_end, start - prev_end)),
      Some(prev_end) if start < prev_end => {
        warn!(
          "range enumerator out of order: {start:#x} starts before previous end {prev_end:#x}"
        );
        self.prev_end = Some(prev_end.max(end));
        return None;
      }
      _ => None,
    };

    self.prev_end = Some(end);
    gap
  }
}

/// Reports every unoccupied gap lying between two occupied ranges.
///
/// Space below the first and above the last occupied range is never
/// reported. Returning `false` from `func` ends the scan at once.
pub fn enumerate_free_ranges<E, F>(
  enumerator: &E,
  mut func: F,
) where
  E: RangeEnumerator + ?Sized,
  F: FnMut(&RangeDetails) -> bool,
{
  let mut tracker = GapTracker::default();

  enumerator.enumerate_ranges(PageProtection::NO_ACCESS, &mut |details: &RangeDetails| {
    let Some(gap) = tracker.next_gap(&details.range) else {
      return true;
    };

    trace!(
      "free range {:#x}..{:#x} ({:#x} bytes)",
      gap.base_address,
      gap.end(),
      gap.size
    );

    func(&RangeDetails::anonymous(gap, PageProtection::NO_ACCESS))
  });
}
