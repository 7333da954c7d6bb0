//! Error types for host-side array handling.
//!
//! # Overview
//!
//! [`Error`] covers everything that can go wrong before any device is
//! involved: malformed dimension tuples, data that does not match its
//! declared shape, and element type names that cannot be parsed.
//!
//! Device-side failures live in `voxl_compute::ComputeError`, which wraps
//! this type.

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or inspecting host-side arrays.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Dimension tuple is not a valid 1-3D shape, see [`Dimensions::new`](crate::Dimensions::new).
    #[error("Invalid dimensions {dims:?}: {reason}")]
    InvalidDimensions {
        /// Offending extents.
        dims: Vec<usize>,
        /// What is wrong with them.
        reason: &'static str,
    },

    /// Data length does not match the element count of the dimensions.
    ///
    /// # Example
    ///
    /// ```rust
    /// use voxl_core::Error;
    ///
    /// let err = Error::SizeMismatch { expected: 6, actual: 4 };
    /// assert!(err.to_string().contains("expected 6"));
    /// ```
    #[error("Size mismatch: expected {expected} elements, got {actual}")]
    SizeMismatch {
        /// Elements required by the dimensions.
        expected: usize,
        /// Elements actually supplied.
        actual: usize,
    },

    /// Element type name is not one of the supported fixed-width types.
    #[error("Unsupported element type: {0}")]
    UnsupportedElementType(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidDimensions`].
    pub fn invalid_dims(dims: &[usize], reason: &'static str) -> Self {
        Self::InvalidDimensions {
            dims: dims.to_vec(),
            reason,
        }
    }
}
