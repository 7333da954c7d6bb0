//! Host-resident N-dimensional arrays.
//!
//! [`HostArray`] is the host-side counterpart of device buffers and images:
//! typed storage plus [`Dimensions`], with optional channel/frame structure
//! carried along for the host application.
//!
//! # Example
//!
//! ```rust
//! use voxl_core::{Dimensions, ElementType, HostArray};
//!
//! let dims = Dimensions::d2(3, 2).unwrap();
//! let arr = HostArray::from_vec(vec![1u16, 2, 3, 4, 5, 6], dims).unwrap();
//! assert_eq!(arr.element_type(), ElementType::U16);
//! assert_eq!(arr.as_bytes().len(), 12);
//! ```

use bytemuck::Pod;
use half::f16;

use crate::{Dimensions, ElementType, Error, Result};

/// Typed element storage, one variant per [`ElementType`].
#[derive(Clone, PartialEq)]
pub enum HostData {
    /// 8-bit unsigned.
    U8(Vec<u8>),
    /// 8-bit signed.
    I8(Vec<i8>),
    /// 16-bit unsigned.
    U16(Vec<u16>),
    /// 16-bit signed.
    I16(Vec<i16>),
    /// 32-bit unsigned.
    U32(Vec<u32>),
    /// 32-bit signed.
    I32(Vec<i32>),
    /// 16-bit float.
    F16(Vec<f16>),
    /// 32-bit float.
    F32(Vec<f32>),
}

macro_rules! dispatch {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            HostData::U8($v) => $body,
            HostData::I8($v) => $body,
            HostData::U16($v) => $body,
            HostData::I16($v) => $body,
            HostData::U32($v) => $body,
            HostData::I32($v) => $body,
            HostData::F16($v) => $body,
            HostData::F32($v) => $body,
        }
    };
}

impl HostData {
    /// Element type of the storage.
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::U8(_) => ElementType::U8,
            Self::I8(_) => ElementType::I8,
            Self::U16(_) => ElementType::U16,
            Self::I16(_) => ElementType::I16,
            Self::U32(_) => ElementType::U32,
            Self::I32(_) => ElementType::I32,
            Self::F16(_) => ElementType::F16,
            Self::F32(_) => ElementType::F32,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        dispatch!(self, v => v.len())
    }

    /// Whether the storage holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes in native (little-endian) order.
    pub fn as_bytes(&self) -> &[u8] {
        dispatch!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    fn zeros(element_type: ElementType, len: usize) -> Self {
        match element_type {
            ElementType::U8 => Self::U8(vec![0; len]),
            ElementType::I8 => Self::I8(vec![0; len]),
            ElementType::U16 => Self::U16(vec![0; len]),
            ElementType::I16 => Self::I16(vec![0; len]),
            ElementType::U32 => Self::U32(vec![0; len]),
            ElementType::I32 => Self::I32(vec![0; len]),
            ElementType::F16 => Self::F16(vec![f16::ZERO; len]),
            ElementType::F32 => Self::F32(vec![0.0; len]),
        }
    }

    fn from_bytes(element_type: ElementType, bytes: &[u8]) -> Self {
        match element_type {
            ElementType::U8 => Self::U8(bytes.to_vec()),
            ElementType::I8 => Self::I8(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::U16 => Self::U16(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::I16 => Self::I16(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::U32 => Self::U32(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::I32 => Self::I32(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::F16 => Self::F16(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::F32 => Self::F32(bytemuck::pod_collect_to_vec(bytes)),
        }
    }
}

impl std::fmt::Debug for HostData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostData::{}({} elements)", self.element_type(), self.len())
    }
}

/// Rust element types that can back a [`HostArray`].
pub trait HostElement: Pod {
    /// Matching element type tag.
    const TYPE: ElementType;

    /// Wraps a typed vector.
    fn wrap(data: Vec<Self>) -> HostData;

    /// Borrows typed storage if the variant matches.
    fn slice(data: &HostData) -> Option<&[Self]>;
}

macro_rules! host_element {
    ($t:ty, $variant:ident) => {
        impl HostElement for $t {
            const TYPE: ElementType = ElementType::$variant;

            fn wrap(data: Vec<Self>) -> HostData {
                HostData::$variant(data)
            }

            fn slice(data: &HostData) -> Option<&[Self]> {
                match data {
                    HostData::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

host_element!(u8, U8);
host_element!(i8, I8);
host_element!(u16, U16);
host_element!(i16, I16);
host_element!(u32, U32);
host_element!(i32, I32);
host_element!(f16, F16);
host_element!(f32, F32);

/// Typed N-dimensional array in host memory.
///
/// `channels` and `frames` describe how the host application interprets the
/// array (e.g. a multi-channel time-lapse stack). They do not change the
/// storage layout; their product must divide the depth extent.
#[derive(Clone, PartialEq)]
pub struct HostArray {
    data: HostData,
    dims: Dimensions,
    channels: usize,
    frames: usize,
}

impl HostArray {
    /// Wraps existing storage, checking its length against `dims`.
    pub fn new(data: HostData, dims: Dimensions) -> Result<Self> {
        let expected = dims.element_count();
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            dims,
            channels: 1,
            frames: 1,
        })
    }

    /// Builds an array from a typed vector.
    pub fn from_vec<T: HostElement>(data: Vec<T>, dims: Dimensions) -> Result<Self> {
        Self::new(T::wrap(data), dims)
    }

    /// Zero-filled array.
    pub fn zeros(dims: Dimensions, element_type: ElementType) -> Self {
        Self {
            data: HostData::zeros(element_type, dims.element_count()),
            dims,
            channels: 1,
            frames: 1,
        }
    }

    /// Reinterprets raw native-order bytes as an array of `element_type`.
    pub fn from_bytes(dims: Dimensions, element_type: ElementType, bytes: &[u8]) -> Result<Self> {
        let expected = dims.element_count().checked_mul(element_type.size_bytes());
        if expected != Some(bytes.len()) {
            return Err(Error::SizeMismatch {
                expected: dims.element_count(),
                actual: bytes.len() / element_type.size_bytes(),
            });
        }
        Self::new(HostData::from_bytes(element_type, bytes), dims)
    }

    /// Sets channel/frame structure.
    pub fn with_structure(mut self, channels: usize, frames: usize) -> Result<Self> {
        let planes = channels * frames;
        if planes == 0 || self.dims.depth() % planes != 0 {
            return Err(Error::invalid_dims(
                self.dims.as_slice(),
                "channels * frames must divide depth",
            ));
        }
        self.channels = channels;
        self.frames = frames;
        Ok(self)
    }

    /// Dimensions.
    #[inline]
    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    /// Element type.
    #[inline]
    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    /// Channel count (1 unless set via [`with_structure`](Self::with_structure)).
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frame count (1 unless set via [`with_structure`](Self::with_structure)).
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for a constructed array; present for API symmetry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Typed storage.
    pub fn data(&self) -> &HostData {
        &self.data
    }

    /// Typed slice if `T` matches the element type.
    pub fn as_slice<T: HostElement>(&self) -> Option<&[T]> {
        T::slice(&self.data)
    }

    /// Raw bytes in native order.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Element at linear index as `f64`.
    pub fn get(&self, index: usize) -> Option<f64> {
        let size = self.element_type().size_bytes();
        let bytes = self.as_bytes().get(index * size..(index + 1) * size)?;
        Some(self.element_type().decode(bytes))
    }

    /// All elements widened to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        let t = self.element_type();
        self.as_bytes()
            .chunks_exact(t.size_bytes())
            .map(|b| t.decode(b))
            .collect()
    }
}

impl std::fmt::Debug for HostArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostArray")
            .field("dims", &self.dims)
            .field("element_type", &self.element_type())
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .finish()
    }
}
