//! # voxl-core
//!
//! Host-side types shared by every voxl crate.
//!
//! - [`ElementType`] - fixed-width pixel/voxel element types
//! - [`Dimensions`] - 1D to 3D extents of an array
//! - [`HostArray`] - typed, host-resident N-dimensional array
//!
//! ## Crate Structure
//!
//! ```text
//! voxl-core (this crate)
//!    ^
//!    +-- voxl-compute (device context, buffers, kernels)
//!    +-- voxl-cli
//! ```
//!
//! Device-resident counterparts of [`HostArray`] live in `voxl-compute`.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod array;
pub mod dims;
pub mod error;
pub mod format;

pub use array::{HostArray, HostData};
pub use dims::Dimensions;
pub use error::{Error, Result};
pub use format::ElementType;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::array::{HostArray, HostData};
    pub use crate::dims::Dimensions;
    pub use crate::error::{Error, Result};
    pub use crate::format::ElementType;
}
