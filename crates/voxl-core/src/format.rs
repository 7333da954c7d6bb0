//! Element types for host and device arrays.
//!
//! Every array in voxl, whether it lives in host memory or on a compute
//! device, stores one fixed-width numeric type per element.
//!
//! # Usage
//!
//! ```rust
//! use voxl_core::ElementType;
//!
//! let t: ElementType = "u16".parse().unwrap();
//! assert_eq!(t.size_bytes(), 2);
//! assert!(!t.is_float());
//! ```

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Fixed-width element type of an array.
///
/// Integer formats:
/// - `U8`, `I8` - 8-bit unsigned / signed
/// - `U16`, `I16` - 16-bit unsigned / signed
/// - `U32`, `I32` - 32-bit unsigned / signed
///
/// Floating-point formats:
/// - `F16` - 16-bit half-precision IEEE 754
/// - `F32` - 32-bit single-precision IEEE 754
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ElementType {
    /// 8-bit unsigned integer.
    U8,
    /// 8-bit signed integer.
    I8,
    /// 16-bit unsigned integer.
    U16,
    /// 16-bit signed integer.
    I16,
    /// 32-bit unsigned integer.
    U32,
    /// 32-bit signed integer.
    I32,
    /// 16-bit half-precision float.
    F16,
    /// 32-bit single-precision float.
    #[default]
    F32,
}

impl ElementType {
    /// All supported element types.
    pub const ALL: [ElementType; 8] = [
        Self::U8,
        Self::I8,
        Self::U16,
        Self::I16,
        Self::U32,
        Self::I32,
        Self::F16,
        Self::F32,
    ];

    /// Bytes per element.
    #[inline]
    pub const fn size_bytes(&self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 | Self::F16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
        }
    }

    /// Whether this is a floating-point type.
    #[inline]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F16 | Self::F32)
    }

    /// Whether this type can hold negative values.
    #[inline]
    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::F16 | Self::F32)
    }

    /// Smallest and largest representable value.
    pub fn range(&self) -> (f64, f64) {
        match self {
            Self::U8 => (0.0, u8::MAX as f64),
            Self::I8 => (i8::MIN as f64, i8::MAX as f64),
            Self::U16 => (0.0, u16::MAX as f64),
            Self::I16 => (i16::MIN as f64, i16::MAX as f64),
            Self::U32 => (0.0, u32::MAX as f64),
            Self::I32 => (i32::MIN as f64, i32::MAX as f64),
            Self::F16 => (half::f16::MIN.to_f64(), half::f16::MAX.to_f64()),
            Self::F32 => (f32::MIN as f64, f32::MAX as f64),
        }
    }

    /// Short lowercase name ("u8", "f32", ...).
    pub const fn name(&self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::F16 => "f16",
            Self::F32 => "f32",
        }
    }

    /// Decode one element from little-endian bytes into `f64`.
    ///
    /// `bytes` must hold at least [`size_bytes`](Self::size_bytes) bytes.
    pub fn decode(&self, bytes: &[u8]) -> f64 {
        match self {
            Self::U8 => bytes[0] as f64,
            Self::I8 => bytes[0] as i8 as f64,
            Self::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::F16 => half::f16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
            Self::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        }
    }

    /// Encode `value` as one little-endian element into `out`.
    ///
    /// Integer types round to nearest and saturate at the type's range.
    pub fn encode(&self, value: f64, out: &mut [u8]) {
        let (lo, hi) = self.range();
        let int = |v: f64| v.round().clamp(lo, hi);
        match self {
            Self::U8 => out[0] = int(value) as u8,
            Self::I8 => out[0] = (int(value) as i8) as u8,
            Self::U16 => out[..2].copy_from_slice(&(int(value) as u16).to_le_bytes()),
            Self::I16 => out[..2].copy_from_slice(&(int(value) as i16).to_le_bytes()),
            Self::U32 => out[..4].copy_from_slice(&(int(value) as u32).to_le_bytes()),
            Self::I32 => out[..4].copy_from_slice(&(int(value) as i32).to_le_bytes()),
            Self::F16 => out[..2].copy_from_slice(&half::f16::from_f64(value).to_le_bytes()),
            Self::F32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u8" | "uint8" | "byte" => Ok(Self::U8),
            "i8" | "int8" => Ok(Self::I8),
            "u16" | "uint16" => Ok(Self::U16),
            "i16" | "int16" => Ok(Self::I16),
            "u32" | "uint32" => Ok(Self::U32),
            "i32" | "int32" => Ok(Self::I32),
            "f16" | "half" => Ok(Self::F16),
            "f32" | "float" => Ok(Self::F32),
            _ => Err(Error::UnsupportedElementType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(ElementType::U8.size_bytes(), 1);
        assert_eq!(ElementType::I16.size_bytes(), 2);
        assert_eq!(ElementType::F16.size_bytes(), 2);
        assert_eq!(ElementType::F32.size_bytes(), 4);
    }

    #[test]
    fn test_parse() {
        assert_eq!("F32".parse::<ElementType>().unwrap(), ElementType::F32);
        assert_eq!("half".parse::<ElementType>().unwrap(), ElementType::F16);
        assert!("u64".parse::<ElementType>().is_err());
    }

    #[test]
    fn test_encode_saturates() {
        let mut out = [0u8; 1];
        ElementType::U8.encode(300.0, &mut out);
        assert_eq!(out[0], 255);
        ElementType::U8.encode(-4.0, &mut out);
        assert_eq!(out[0], 0);
        ElementType::I8.encode(-200.0, &mut out);
        assert_eq!(out[0] as i8, -128);
    }

    #[test]
    fn test_encode_decode_values() {
        let mut buf = [0u8; 4];
        for t in ElementType::ALL {
            t.encode(42.0, &mut buf);
            assert_eq!(t.decode(&buf), 42.0, "type {t}");
        }
        ElementType::I32.encode(-7.0, &mut buf);
        assert_eq!(ElementType::I32.decode(&buf), -7.0);
    }
}
