//! Dimension tuples for 1D, 2D and 3D arrays.

use std::fmt;

use crate::{Error, Result};

/// Maximum number of axes an array may have.
pub const MAX_RANK: usize = 3;

/// Ordered extents of an array (width, height, depth).
///
/// Always 1 to 3 strictly positive extents whose product fits in `usize`.
/// Missing trailing axes read as 1, so a 2D array has `depth() == 1`.
///
/// # Example
///
/// ```rust
/// use voxl_core::Dimensions;
///
/// let dims = Dimensions::new(&[3, 2, 1]).unwrap();
/// assert_eq!(dims.element_count(), 6);
/// assert_eq!(dims.rank(), 3);
/// assert!(Dimensions::new(&[4, 0]).is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    extents: [usize; MAX_RANK],
    rank: usize,
}

impl Dimensions {
    /// Validates and builds a dimension tuple.
    pub fn new(extents: &[usize]) -> Result<Self> {
        if extents.is_empty() || extents.len() > MAX_RANK {
            return Err(Error::invalid_dims(extents, "rank must be 1, 2 or 3"));
        }
        if extents.contains(&0) {
            return Err(Error::invalid_dims(extents, "extents must be positive"));
        }
        if extents.iter().try_fold(1usize, |acc, &e| acc.checked_mul(e)).is_none() {
            return Err(Error::invalid_dims(extents, "element count overflows usize"));
        }
        let mut out = [1usize; MAX_RANK];
        out[..extents.len()].copy_from_slice(extents);
        Ok(Self {
            extents: out,
            rank: extents.len(),
        })
    }

    /// 2D shorthand.
    pub fn d2(width: usize, height: usize) -> Result<Self> {
        Self::new(&[width, height])
    }

    /// 3D shorthand.
    pub fn d3(width: usize, height: usize, depth: usize) -> Result<Self> {
        Self::new(&[width, height, depth])
    }

    /// Number of axes (1..=3).
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Extents as given at construction.
    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.extents[..self.rank]
    }

    /// Extents padded to three axes.
    #[inline]
    pub fn padded(&self) -> [usize; MAX_RANK] {
        self.extents
    }

    /// Extent of the first axis.
    #[inline]
    pub fn width(&self) -> usize {
        self.extents[0]
    }

    /// Extent of the second axis, 1 for 1D arrays.
    #[inline]
    pub fn height(&self) -> usize {
        self.extents[1]
    }

    /// Extent of the third axis, 1 for 1D/2D arrays.
    #[inline]
    pub fn depth(&self) -> usize {
        self.extents[2]
    }

    /// Total number of elements. Never overflows, construction rejects
    /// extents whose product does not fit.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.extents.iter().product()
    }

    /// Linear index of `(x, y, z)` in row-major (x fastest) order.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.extents[1] + y) * self.extents[0] + x
    }
}

impl fmt::Debug for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_slice())
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.as_slice().iter().map(|e| e.to_string()).collect();
        f.write_str(&parts.join("x"))
    }
}

impl TryFrom<&[usize]> for Dimensions {
    type Error = Error;

    fn try_from(value: &[usize]) -> Result<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding() {
        let d = Dimensions::new(&[5]).unwrap();
        assert_eq!(d.padded(), [5, 1, 1]);
        assert_eq!(d.as_slice(), &[5]);
        assert_eq!(d.height(), 1);
    }

    #[test]
    fn test_rejects_bad_rank() {
        assert!(Dimensions::new(&[]).is_err());
        assert!(Dimensions::new(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_rejects_overflowing_extents() {
        let err = Dimensions::d3(1 << 22, 1 << 22, 1 << 21).unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions { .. }));
        assert!(Dimensions::new(&[usize::MAX, 2]).is_err());
        assert_eq!(Dimensions::new(&[usize::MAX]).unwrap().element_count(), usize::MAX);
    }

    #[test]
    fn test_index_and_display() {
        let d = Dimensions::d3(4, 3, 2).unwrap();
        assert_eq!(d.index(0, 0, 0), 0);
        assert_eq!(d.index(1, 0, 0), 1);
        assert_eq!(d.index(0, 1, 0), 4);
        assert_eq!(d.index(0, 0, 1), 12);
        assert_eq!(d.to_string(), "4x3x2");
    }

    #[test]
    fn test_rank_is_part_of_identity() {
        let a = Dimensions::new(&[2, 2]).unwrap();
        let b = Dimensions::new(&[2, 2, 1]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.element_count(), b.element_count());
    }
}
