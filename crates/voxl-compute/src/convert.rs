//! Conversions between host arrays and device memory.
//!
//! [`ConversionRegistry`] is a table of converters keyed by the exact
//! `(source, target)` [`TypeTag`] pair. It holds no conversion logic of its
//! own; the default converters live in [`host_bridge`](crate::host_bridge).

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use tracing::trace;
use voxl_core::HostArray;

use crate::context::ComputeContext;
use crate::memory::{Buffer, Image};
use crate::{ComputeError, ComputeResult};

/// Kind of a convertible value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Host,
    Buffer,
    Image,
    /// Application-defined kind.
    Custom(&'static str),
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host array"),
            Self::Buffer => f.write_str("buffer"),
            Self::Image => f.write_str("image"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// A value tagged with its [`TypeTag`].
pub enum Value {
    Host(HostArray),
    Buffer(Buffer),
    Image(Image),
    Custom(&'static str, Box<dyn Any + Send>),
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::Host(_) => TypeTag::Host,
            Self::Buffer(_) => TypeTag::Buffer,
            Self::Image(_) => TypeTag::Image,
            Self::Custom(name, _) => TypeTag::Custom(name),
        }
    }

    pub fn into_host(self) -> Option<HostArray> {
        match self {
            Self::Host(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_buffer(self) -> Option<Buffer> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<Image> {
        match self {
            Self::Image(i) => Some(i),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(a) => f.debug_tuple("Host").field(a).finish(),
            Self::Buffer(b) => f.debug_tuple("Buffer").field(b).finish(),
            Self::Image(i) => f.debug_tuple("Image").field(i).finish(),
            Self::Custom(name, _) => f.debug_tuple("Custom").field(name).finish(),
        }
    }
}

impl From<HostArray> for Value {
    fn from(a: HostArray) -> Self {
        Self::Host(a)
    }
}

impl From<Buffer> for Value {
    fn from(b: Buffer) -> Self {
        Self::Buffer(b)
    }
}

impl From<Image> for Value {
    fn from(i: Image) -> Self {
        Self::Image(i)
    }
}

/// Produces a value of one kind from a value of another.
///
/// The source is borrowed; it stays owned by the caller.
pub trait Converter: Send + Sync {
    fn convert(&self, ctx: &ComputeContext, value: &Value) -> ComputeResult<Value>;
}

impl<F> Converter for F
where
    F: Fn(&ComputeContext, &Value) -> ComputeResult<Value> + Send + Sync,
{
    fn convert(&self, ctx: &ComputeContext, value: &Value) -> ComputeResult<Value> {
        self(ctx, value)
    }
}

/// Converters keyed by `(source, target)`.
#[derive(Default)]
pub struct ConversionRegistry {
    converters: HashMap<(TypeTag, TypeTag), Box<dyn Converter>>,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the host/buffer/image converters.
    pub fn with_host_bridge() -> Self {
        let mut registry = Self::new();
        crate::host_bridge::register(&mut registry);
        registry
    }

    /// Register (or replace) the converter for `from -> to`.
    pub fn register(&mut self, from: TypeTag, to: TypeTag, converter: impl Converter + 'static) {
        self.converters.insert((from, to), Box::new(converter));
    }

    pub fn contains(&self, from: TypeTag, to: TypeTag) -> bool {
        self.converters.contains_key(&(from, to))
    }

    /// Convert `value` to `target`.
    ///
    /// A value already of kind `target` is returned unchanged. Otherwise the
    /// converter registered for exactly `(value.tag(), target)` runs; there is
    /// no chaining through intermediate kinds.
    pub fn convert(&self, ctx: &ComputeContext, value: Value, target: TypeTag) -> ComputeResult<Value> {
        let from = value.tag();
        if from == target {
            return Ok(value);
        }
        let converter = self
            .converters
            .get(&(from, target))
            .ok_or_else(|| ComputeError::NoConverterRegistered {
                from: from.to_string(),
                to: target.to_string(),
            })?;

        trace!(%from, to = %target, "convert");
        let converted = converter.convert(ctx, &value)?;
        if converted.tag() != target {
            return Err(ComputeError::OperationFailed(format!(
                "converter {from} -> {target} produced {}",
                converted.tag()
            )));
        }
        Ok(converted)
    }

    /// Upload a host array into a new buffer.
    pub fn to_buffer(&self, ctx: &ComputeContext, array: HostArray) -> ComputeResult<Buffer> {
        self.convert(ctx, Value::Host(array), TypeTag::Buffer)?
            .into_buffer()
            .ok_or_else(|| ComputeError::OperationFailed("expected a buffer".into()))
    }

    /// Download a buffer or image into a host array.
    pub fn to_host(&self, ctx: &ComputeContext, value: Value) -> ComputeResult<HostArray> {
        self.convert(ctx, value, TypeTag::Host)?
            .into_host()
            .ok_or_else(|| ComputeError::OperationFailed("expected a host array".into()))
    }
}

impl fmt::Debug for ConversionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<String> = self.converters.keys().map(|(a, b)| format!("{a} -> {b}")).collect();
        pairs.sort();
        f.debug_struct("ConversionRegistry").field("converters", &pairs).finish()
    }
}
