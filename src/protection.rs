use libc::c_int;

bitflags::bitflags! {
  /// Abstract page protection.
  ///
  /// The empty set means "no access". Combinations are not validated; any
  /// subset of the three flags is translatable to a native value.
  #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
  pub struct PageProtection: u32 {
    /// Pages may be read.
    const READ    = 1 << 0;
    /// Pages may be written.
    const WRITE   = 1 << 1;
    /// Pages may be executed.
    const EXECUTE = 1 << 2;

    const NO_ACCESS = 0;
    const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    const READ_EXECUTE = Self::READ.bits() | Self::EXECUTE.bits();
    const READ_WRITE_EXECUTE = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
  }
}

impl PageProtection {
  /// Translates the flag set into the `PROT_*` value expected by `mmap(2)`
  /// and `mprotect(2)`.
  pub const fn to_native(self) -> c_int {
    let mut native = libc::PROT_NONE;

    if self.contains(Self::READ) {
      native |= libc::PROT_READ;
    }
    if self.contains(Self::WRITE) {
      native |= libc::PROT_WRITE;
    }
    if self.contains(Self::EXECUTE) {
      native |= libc::PROT_EXEC;
    }

    native
  }

  /// Inverse of [`PageProtection::to_native`]. Unknown bits are dropped.
  pub const fn from_native(native: c_int) -> Self {
    let mut prot = Self::NO_ACCESS;

    if native & libc::PROT_READ != 0 {
      prot = prot.union(Self::READ);
    }
    if native & libc::PROT_WRITE != 0 {
      prot = prot.union(Self::WRITE);
    }
    if native & libc::PROT_EXEC != 0 {
      prot = prot.union(Self::EXECUTE);
    }

    prot
  }
}
