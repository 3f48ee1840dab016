/// Alignment of every payload handed out by the heap, and the granularity
/// of every block size.
pub const ALIGNMENT: usize = 8;

/// Rounds `value` up to the heap's [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use tagheap::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(0), 0);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
///
/// ```rust
/// use tagheap::align_to;
///
/// assert_eq!(align_to!(5, 4), 8);
/// assert_eq!(align_to!(4097, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}
