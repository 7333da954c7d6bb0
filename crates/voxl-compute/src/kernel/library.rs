//! Registry of kernel programs by identity.

use std::collections::HashMap;

use super::{KernelId, Program, builtins};
use crate::{ComputeError, ComputeResult};

/// Maps kernel identities to programs.
///
/// Applications register their own kernels next to the built-ins under
/// their own anchor namespace.
#[derive(Debug, Default, Clone)]
pub struct ProgramLibrary {
    programs: HashMap<KernelId, Program>,
}

impl ProgramLibrary {
    /// Empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Library with the built-in kernels registered.
    pub fn with_builtins() -> Self {
        let mut lib = Self::new();
        builtins::register(&mut lib);
        lib
    }

    /// Register (or replace) a program.
    pub fn register(&mut self, id: KernelId, program: Program) {
        self.programs.insert(id, program);
    }

    /// Look up the program for `id`.
    pub fn resolve(&self, id: &KernelId) -> ComputeResult<&Program> {
        self.programs.get(id).ok_or_else(|| ComputeError::KernelBuildFailed {
            kernel: id.to_string(),
            reason: "program not found".into(),
        })
    }

    pub fn contains(&self, id: &KernelId) -> bool {
        self.programs.contains_key(id)
    }

    /// Registered identities, sorted for stable output.
    pub fn ids(&self) -> Vec<&KernelId> {
        let mut ids: Vec<_> = self.programs.keys().collect();
        ids.sort_by_key(|id| id.to_string());
        ids
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}
