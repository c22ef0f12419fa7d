/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two.
///
/// # Examples
///
/// ```rust
/// use rpagealloc::align_up;
///
/// assert_eq!(align_up!(13, 16), 16);
/// assert_eq!(align_up!(4096, 4096), 4096);
/// assert_eq!(align_up!(4097, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_up {
  ($value:expr, $alignment:expr) => {
    ($value + ($alignment - 1)) & !($alignment - 1)
  };
}

/// Rounds `value` down to the previous multiple of `alignment`.
///
/// `alignment` must be a power of two.
///
/// # Examples
///
/// ```rust
/// use rpagealloc::align_down;
///
/// assert_eq!(align_down!(13, 8), 8);
/// assert_eq!(align_down!(0x1fff, 0x1000), 0x1000);
/// ```
#[macro_export]
macro_rules! align_down {
  ($value:expr, $alignment:expr) => {
    $value & !($alignment - 1)
  };
}
