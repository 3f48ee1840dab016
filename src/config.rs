use crate::{align, block::MIN_BLOCK_SIZE};

/// Default number of bytes requested from the grower when the arena has to
/// be extended speculatively.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Tunables of a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Minimum growth step, in bytes. Always a multiple of the alignment.
  pub chunk_size: usize,
  /// When set, `release` and `reallocate` walk the block list and reject
  /// pointers that are not outstanding allocations instead of corrupting
  /// the heap. Costs a linear scan per call.
  pub validate: bool,
}

impl HeapConfig {
  pub const DEFAULT: Self = Self {
    chunk_size: CHUNK_SIZE,
    validate: false,
  };

  pub const fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    let chunk_size = align!(chunk_size);
    self.chunk_size = if chunk_size < MIN_BLOCK_SIZE {
      MIN_BLOCK_SIZE
    } else {
      chunk_size
    };
    self
  }

  pub const fn with_validation(
    mut self,
    validate: bool,
  ) -> Self {
    self.validate = validate;
    self
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}
