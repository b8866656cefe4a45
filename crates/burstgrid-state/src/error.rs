//! Error types for controller state.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("group size {size} outside bounds [{min}, {max}]")]
    OutOfBounds { size: u32, min: u32, max: u32 },
}
