use thiserror::Error;

/// Errors reported by [`Heap`](crate::Heap) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("backing store exhausted while growing the arena by {requested} bytes")]
  Exhausted { requested: usize },

  #[error("arena grew non-contiguously (expected {expected:#x}, got {actual:#x})")]
  NonContiguous { expected: usize, actual: usize },

  #[error("request of {size} bytes exceeds the largest encodable block")]
  TooLarge { size: usize },

  #[error("heap is already initialized")]
  AlreadyInitialized,

  #[error("{addr:#x} is not an outstanding allocation of this heap")]
  InvalidPointer { addr: usize },

  #[error("heap corrupted at {addr:#x}: {reason}")]
  Corrupted { addr: usize, reason: &'static str },
}

pub type Result<T> = core::result::Result<T, HeapError>;
