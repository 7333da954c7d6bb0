//! CLI command implementations

pub mod bench;
pub mod devices;
pub mod info;

use anyhow::{Context, Result};
use voxl_compute::{ComputeContext, ContextManager};

/// Open a context on the device matching `hint` (or the default device).
pub fn open_context(manager: &mut ContextManager, hint: Option<&str>) -> Result<ComputeContext> {
    manager.get_or_create(hint).with_context(|| match hint {
        Some(h) => format!("Failed to open device matching '{h}'"),
        None => "Failed to open default device".to_string(),
    })
}
