//! Get-or-build kernel execution.
//!
//! ```text
//! KernelExecutor
//!     ├── configure(id, global)  ── target kernel + optional global size
//!     ├── kernel(ctx)            ── reuse cached build or build via library
//!     └── enqueue(ctx, binding)  ── validate binding ─> dispatch ─> (finish)
//! ```
//!
//! A compiled kernel is reused as long as the target identity and the
//! context stay the same. Changing either discards it and the next enqueue
//! builds again.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};
use voxl_core::Dimensions;

use super::{KernelArg, KernelId, ParamKind, ParameterBinding, ProgramLibrary};
use crate::context::ComputeContext;
use crate::device::{CompiledKernel, DispatchArg};
use crate::{ComputeError, ComputeResult};

struct CachedKernel {
    id: KernelId,
    context: u64,
    kernel: Arc<dyn CompiledKernel>,
}

/// Runs named kernels against named parameters on a context.
pub struct KernelExecutor {
    library: Arc<ProgramLibrary>,
    target: Option<KernelId>,
    global: Option<Dimensions>,
    cached: Option<CachedKernel>,
    builds: u64,
    last_failure: Option<String>,
}

impl KernelExecutor {
    pub fn new(library: Arc<ProgramLibrary>) -> Self {
        Self {
            library,
            target: None,
            global: None,
            cached: None,
            builds: 0,
            last_failure: None,
        }
    }

    /// Executor over a fresh library of the built-in kernels.
    pub fn with_builtins() -> Self {
        Self::new(Arc::new(ProgramLibrary::with_builtins()))
    }

    pub fn library(&self) -> &ProgramLibrary {
        &self.library
    }

    /// Select the kernel to run and, optionally, an explicit global size.
    ///
    /// Without a global size the first memory parameter's dimensions are
    /// used at enqueue time.
    pub fn configure(&mut self, id: KernelId, global: Option<Dimensions>) {
        if self.cached.as_ref().is_some_and(|c| c.id != id) {
            self.cached = None;
        }
        self.target = Some(id);
        self.global = global;
    }

    pub fn target(&self) -> Option<&KernelId> {
        self.target.as_ref()
    }

    /// Identity of the compiled kernel currently held, if any.
    pub fn cached_kernel(&self) -> Option<&KernelId> {
        self.cached.as_ref().map(|c| &c.id)
    }

    /// Number of kernel builds performed by this executor.
    pub fn build_count(&self) -> u64 {
        self.builds
    }

    /// Diagnostic of the most recent failed enqueue, cleared on success.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Compiled kernel for the configured target, built on first use.
    pub fn kernel(&mut self, ctx: &ComputeContext) -> ComputeResult<Arc<dyn CompiledKernel>> {
        let target = self
            .target
            .clone()
            .ok_or_else(|| ComputeError::OperationFailed("no kernel configured".into()))?;

        if let Some(c) = &self.cached {
            if c.id == target && c.context == ctx.id() {
                return Ok(Arc::clone(&c.kernel));
            }
        }
        self.cached = None;

        let queue = ctx.shared().queue()?;
        let program = self.library.resolve(&target)?;
        let start = Instant::now();
        let kernel = queue.build(&target, program)?;
        self.builds += 1;
        debug!(
            kernel = %target,
            device = %ctx.device_name(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "built kernel"
        );

        self.cached = Some(CachedKernel {
            id: target,
            context: ctx.id(),
            kernel: Arc::clone(&kernel),
        });
        Ok(kernel)
    }

    /// Bind `binding` and run the configured kernel.
    ///
    /// With `blocking` the call returns after the device finished. Failures
    /// are returned and also kept as [`last_failure`](Self::last_failure).
    pub fn enqueue(&mut self, ctx: &ComputeContext, binding: &ParameterBinding<'_>, blocking: bool) -> ComputeResult<()> {
        let start = Instant::now();
        let result = self.enqueue_inner(ctx, binding, blocking);
        match &result {
            Ok(()) => {
                self.last_failure = None;
                debug!(
                    kernel = %self.target.as_ref().map(ToString::to_string).unwrap_or_default(),
                    elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "enqueued"
                );
            }
            Err(e) => {
                warn!(error = %e, "kernel enqueue failed");
                self.last_failure = Some(e.to_string());
            }
        }
        result
    }

    /// `configure` followed by a blocking `enqueue`.
    pub fn execute(
        &mut self,
        ctx: &ComputeContext,
        id: KernelId,
        global: Option<Dimensions>,
        binding: &ParameterBinding<'_>,
    ) -> ComputeResult<()> {
        self.configure(id, global);
        self.enqueue(ctx, binding, true)
    }

    fn enqueue_inner(&mut self, ctx: &ComputeContext, binding: &ParameterBinding<'_>, blocking: bool) -> ComputeResult<()> {
        ctx.ensure_open()?;
        let kernel = self.kernel(ctx)?;
        let args = bind(ctx, &*kernel, binding)?;

        let global = match self.global {
            Some(g) => g.padded(),
            None => first_memory_dims(&*kernel, binding)
                .ok_or_else(|| invalid(kernel.id(), "no global size and no memory parameter".into()))?
                .padded(),
        };

        let queue = ctx.shared().queue()?;
        queue.dispatch(&*kernel, &args, global, blocking)?;
        if blocking {
            queue.finish()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for KernelExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelExecutor")
            .field("target", &self.target)
            .field("global", &self.global)
            .field("cached", &self.cached_kernel())
            .field("builds", &self.builds)
            .finish()
    }
}

fn invalid(kernel: &KernelId, reason: String) -> ComputeError {
    ComputeError::InvalidParameterBinding {
        kernel: kernel.to_string(),
        reason,
    }
}

/// Arguments in declared order, checked against the signature and context.
fn bind<'a>(
    ctx: &ComputeContext,
    kernel: &dyn CompiledKernel,
    binding: &ParameterBinding<'a>,
) -> ComputeResult<Vec<DispatchArg<'a>>> {
    let id = kernel.id();
    let signature = kernel.signature();

    if let Some(unknown) = binding.names().find(|n| signature.position(n).is_none()) {
        return Err(invalid(id, format!("unknown parameter '{unknown}'")));
    }

    let mut args = Vec::with_capacity(signature.params().len());
    for decl in signature.params() {
        let arg = binding
            .get(&decl.name)
            .ok_or_else(|| invalid(id, format!("missing parameter '{}'", decl.name)))?;

        let accepted = match (decl.kind, arg) {
            (ParamKind::Scalar, KernelArg::Scalar(_)) => true,
            (ParamKind::Memory, KernelArg::Buffer(_) | KernelArg::Image(_)) => true,
            (ParamKind::Buffer, KernelArg::Buffer(_)) => true,
            (ParamKind::Image, KernelArg::Image(_)) => true,
            _ => false,
        };
        if !accepted {
            return Err(invalid(
                id,
                format!("'{}' expects {:?}, got {}", decl.name, decl.kind, arg.describe()),
            ));
        }

        match (arg, arg.memory()) {
            (KernelArg::Scalar(s), _) => args.push(DispatchArg::Scalar(*s)),
            (_, Some(obj)) => {
                obj.ensure_open()?;
                if obj.context_id() != ctx.id() {
                    return Err(invalid(
                        id,
                        format!("'{}' was allocated in another context", decl.name),
                    ));
                }
                args.push(DispatchArg::Memory(obj.storage()));
            }
            (_, None) => return Err(invalid(id, format!("'{}' has no storage", decl.name))),
        }
    }
    Ok(args)
}

fn first_memory_dims(kernel: &dyn CompiledKernel, binding: &ParameterBinding<'_>) -> Option<Dimensions> {
    kernel
        .signature()
        .params()
        .iter()
        .filter(|p| p.kind.is_memory())
        .find_map(|p| binding.get(&p.name).and_then(|a| a.memory()).map(|m| m.layout().dims))
}
