use std::path::PathBuf;

use crate::protection::PageProtection;

/// A span of virtual address space.
///
/// Ranges describing OS-backed mappings are page aligned; ranges describing
/// a logical allocation need not be.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MemoryRange {
  pub base_address: usize,
  pub size: usize,
}

impl MemoryRange {
  pub const fn new(
    base_address: usize,
    size: usize,
  ) -> Self {
    Self { base_address, size }
  }

  /// One past the last address of the range, saturating at the top of the
  /// address space.
  pub const fn end(&self) -> usize {
    self.base_address.saturating_add(self.size)
  }

  pub const fn contains(
    &self,
    address: usize,
  ) -> bool {
    address >= self.base_address && address < self.end()
  }
}

/// Where a near allocation must land: its base address has to lie within
/// `max_distance` bytes of `near_address`, in either direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressSpec {
  pub near_address: usize,
  pub max_distance: usize,
}

impl AddressSpec {
  pub const fn new(
    near_address: usize,
    max_distance: usize,
  ) -> Self {
    Self {
      near_address,
      max_distance,
    }
  }

  /// Unsigned distance between `address` and the target. Never overflows.
  pub const fn distance_to(
    &self,
    address: usize,
  ) -> usize {
    self.near_address.abs_diff(address)
  }

  pub const fn accepts(
    &self,
    address: usize,
  ) -> bool {
    self.distance_to(address) <= self.max_distance
  }
}

/// File backing a mapping, as reported by the range enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
  pub path: PathBuf,
  pub offset: u64,
  pub size: u64,
}

/// One occupied (or, when synthesized by the scanner, free) range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeDetails {
  pub range: MemoryRange,
  pub protection: PageProtection,
  pub file: Option<FileMapping>,
}

impl RangeDetails {
  pub const fn anonymous(
    range: MemoryRange,
    protection: PageProtection,
  ) -> Self {
    Self {
      range,
      protection,
      file: None,
    }
  }
}
