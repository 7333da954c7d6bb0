//! Kernels: identities, declared parameters, program library and executor.
//!
//! A kernel is addressed by `(anchor, program file, kernel name)`. The
//! [`ProgramLibrary`] resolves that identity to a [`Program`]: the ordered
//! parameter declarations plus a body for each backend (WGSL text for wgpu,
//! a native function for the host backend).

mod binding;
pub(crate) mod builtins;
mod executor;
mod library;

use std::fmt;
use std::sync::Arc;

use crate::device::HostKernelFn;

pub use binding::{KernelArg, ParameterBinding};
pub use executor::KernelExecutor;
pub use library::ProgramLibrary;

/// Anchor namespace of the built-in kernels.
pub const BUILTIN_ANCHOR: &str = "voxl";

/// Identity of one kernel: anchor namespace, program file and kernel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelId {
    pub anchor: String,
    pub program: String,
    pub kernel: String,
}

impl KernelId {
    pub fn new(anchor: impl Into<String>, program: impl Into<String>, kernel: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
            program: program.into(),
            kernel: kernel.into(),
        }
    }

    /// Kernel shipped with this crate.
    pub fn builtin(program: &str, kernel: &str) -> Self {
        Self::new(BUILTIN_ANCHOR, program, kernel)
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}::{}", self.anchor, self.program, self.kernel)
    }
}

/// Scalar kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
            Self::Bool(v) => v as u8 as f64,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            Self::Int(v) => v,
            Self::Float(v) => v as i64,
            Self::Bool(v) => v as i64,
        }
    }
}

/// What a declared parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Buffer storage only.
    Buffer,
    /// Image storage only.
    Image,
    /// Buffer or image.
    Memory,
    /// Numeric or boolean scalar.
    Scalar,
}

impl ParamKind {
    pub fn is_memory(&self) -> bool {
        !matches!(self, Self::Scalar)
    }
}

/// One declared kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    pub kind: ParamKind,
}

impl ParamDecl {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// Declared parameters of a kernel, in binding order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelSignature {
    params: Vec<ParamDecl>,
}

impl KernelSignature {
    pub fn new(params: Vec<ParamDecl>) -> Self {
        Self { params }
    }

    /// Builder: append a parameter.
    pub fn param(mut self, name: &str, kind: ParamKind) -> Self {
        self.params.push(ParamDecl::new(name, kind));
        self
    }

    pub fn params(&self) -> &[ParamDecl] {
        &self.params
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// Number of memory parameters (they come first in wgpu bind groups).
    pub fn memory_count(&self) -> usize {
        self.params.iter().filter(|p| p.kind.is_memory()).count()
    }
}

/// Resolved program for one kernel identity.
#[derive(Clone)]
pub struct Program {
    pub signature: KernelSignature,
    /// WGSL source; entry point is the kernel name.
    pub wgsl: Option<Arc<str>>,
    /// Native body for the host backend.
    pub host: Option<HostKernelFn>,
}

impl Program {
    pub fn new(signature: KernelSignature) -> Self {
        Self {
            signature,
            wgsl: None,
            host: None,
        }
    }

    pub fn with_wgsl(mut self, source: impl Into<Arc<str>>) -> Self {
        self.wgsl = Some(source.into());
        self
    }

    pub fn with_host(mut self, body: HostKernelFn) -> Self {
        self.host = Some(body);
        self
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("signature", &self.signature)
            .field("wgsl", &self.wgsl.is_some())
            .field("host", &self.host.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_id_display() {
        let id = KernelId::builtin("copy.cl", "copy");
        assert_eq!(id.to_string(), "voxl/copy.cl::copy");
    }

    #[test]
    fn test_signature_positions() {
        let sig = KernelSignature::default()
            .param("src", ParamKind::Memory)
            .param("value", ParamKind::Scalar)
            .param("dst", ParamKind::Buffer);
        assert_eq!(sig.position("dst"), Some(2));
        assert_eq!(sig.position("nope"), None);
        assert_eq!(sig.memory_count(), 2);
    }

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(Scalar::Bool(true).as_f64(), 1.0);
        assert_eq!(Scalar::Float(2.9).as_i64(), 2);
        assert_eq!(Scalar::Int(-3).as_f64(), -3.0);
    }
}
