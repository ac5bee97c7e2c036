//! Two-variant transfer outcome for polling callers.
//!
//! Waiters inspect many attempt outcomes in a loop; a failure must not
//! unwind the calling stack, so it travels as a value until the caller
//! decides to convert it with [`Outcome::into_result`].

use crate::error::TransferError;

/// Either a success value or the failure cause, never both.
/// Immutable once constructed.
#[derive(Debug)]
pub enum Outcome<R, E = TransferError> {
    Value(R),
    Failure(E),
}

impl<R, E> Outcome<R, E> {
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// The success value, if this outcome holds one.
    pub fn value(&self) -> Option<&R> {
        match self {
            Outcome::Value(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    /// The failure cause, if this outcome holds one.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Outcome::Value(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }

    /// Transform the success value; a failure passes through unchanged.
    pub fn map<T>(self, f: impl FnOnce(R) -> T) -> Outcome<T, E> {
        match self {
            Outcome::Value(v) => Outcome::Value(f(v)),
            Outcome::Failure(e) => Outcome::Failure(e),
        }
    }

    /// Reduce to a single result by invoking exactly one side.
    pub fn either<T>(self, on_value: impl FnOnce(R) -> T, on_failure: impl FnOnce(E) -> T) -> T {
        match self {
            Outcome::Value(v) => on_value(v),
            Outcome::Failure(e) => on_failure(e),
        }
    }

    /// Invoke exactly one side-effecting callback, by reference.
    pub fn visit(&self, on_value: impl FnOnce(&R), on_failure: impl FnOnce(&E)) {
        match self {
            Outcome::Value(v) => on_value(v),
            Outcome::Failure(e) => on_failure(e),
        }
    }

    /// Convert into a plain `Result`, surfacing the failure cause to `?`.
    pub fn into_result(self) -> Result<R, E> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Failure(e) => Err(e),
        }
    }
}

impl<R, E> From<Result<R, E>> for Outcome<R, E> {
    fn from(result: Result<R, E>) -> Self {
        match result {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::Failure(e),
        }
    }
}
