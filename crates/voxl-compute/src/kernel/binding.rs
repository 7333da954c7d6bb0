//! Named kernel parameters.

use super::Scalar;
use crate::memory::{Buffer, Image, MemoryObject};

/// Value bound to one kernel parameter.
#[derive(Clone, Copy)]
pub enum KernelArg<'a> {
    Buffer(&'a Buffer),
    Image(&'a Image),
    Scalar(Scalar),
}

impl<'a> KernelArg<'a> {
    pub(crate) fn memory(&self) -> Option<&'a MemoryObject> {
        match *self {
            Self::Buffer(b) => Some(b.object()),
            Self::Image(i) => Some(i.object()),
            Self::Scalar(_) => None,
        }
    }

    /// Short description for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::Buffer(b) => format!("buffer {}", b.dims()),
            Self::Image(i) => format!("image {}", i.dims()),
            Self::Scalar(s) => format!("scalar {s:?}"),
        }
    }
}

impl<'a> From<&'a Buffer> for KernelArg<'a> {
    fn from(b: &'a Buffer) -> Self {
        Self::Buffer(b)
    }
}

impl<'a> From<&'a Image> for KernelArg<'a> {
    fn from(i: &'a Image) -> Self {
        Self::Image(i)
    }
}

impl From<Scalar> for KernelArg<'_> {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}

macro_rules! scalar_from {
    ($($t:ty => $variant:ident as $cast:ty),* $(,)?) => {
        $(
            impl From<$t> for KernelArg<'_> {
                fn from(v: $t) -> Self {
                    Self::Scalar(Scalar::$variant(v as $cast))
                }
            }
        )*
    };
}

scalar_from!(
    i32 => Int as i64,
    i64 => Int as i64,
    u32 => Int as i64,
    usize => Int as i64,
    f32 => Float as f64,
    f64 => Float as f64,
);

impl From<bool> for KernelArg<'_> {
    fn from(v: bool) -> Self {
        Self::Scalar(Scalar::Bool(v))
    }
}

/// Complete set of named arguments for one dispatch.
///
/// Insertion order is kept; binding a name twice replaces the earlier value.
///
/// ```ignore
/// let binding = ParameterBinding::new()
///     .with("src", &input)
///     .with("dst", &output)
///     .with("value", 1.5f32);
/// ```
#[derive(Clone, Default)]
pub struct ParameterBinding<'a> {
    entries: Vec<(String, KernelArg<'a>)>,
}

impl<'a> ParameterBinding<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, name: &str, arg: impl Into<KernelArg<'a>>) -> Self {
        self.set(name, arg);
        self
    }

    pub fn set(&mut self, name: &str, arg: impl Into<KernelArg<'a>>) {
        let arg = arg.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = arg,
            None => self.entries.push((name.to_string(), arg)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&KernelArg<'a>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ParameterBinding<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (name, arg) in &self.entries {
            map.entry(name, &arg.describe());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces() {
        let mut b = ParameterBinding::new().with("a", 1i32).with("b", 2.0f32);
        b.set("a", true);
        assert_eq!(b.len(), 2);
        assert!(matches!(b.get("a"), Some(KernelArg::Scalar(Scalar::Bool(true)))));
        assert_eq!(b.names().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn test_scalar_from() {
        assert!(matches!(KernelArg::from(3u32), KernelArg::Scalar(Scalar::Int(3))));
        assert!(matches!(KernelArg::from(0.5f64), KernelArg::Scalar(Scalar::Float(v)) if v == 0.5));
    }
}
