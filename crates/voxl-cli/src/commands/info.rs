//! Info command - open a device and show its capabilities

use anyhow::Result;
use voxl_compute::config::format_bytes;
use voxl_compute::{ContextManager, OperationClass, ProgramLibrary};

use super::open_context;
use crate::InfoArgs;

pub fn run(args: InfoArgs, verbose: bool) -> Result<()> {
    let mut manager = ContextManager::detect();
    let ctx = open_context(&mut manager, args.device.as_deref())?;
    let device = ctx.device();
    let config = ctx.config();

    println!("Device:        {}", device.name);
    println!("Backend:       {}", device.backend);
    println!("Kind:          {}", if device.is_cpu() { "cpu" } else { "accelerator" });
    println!("Version:       {}", device.capability_version());
    println!("Images:        {}", if device.supports_images() { "yes" } else { "no" });
    println!("Global memory: {}", format_bytes(device.global_memory_bytes));
    println!("Max alloc:     {}", format_bytes(device.max_alloc_bytes));
    println!();
    println!("Image routing: {:?} (min version {})", config.image_routing, config.image_min_version);
    println!(
        "Transforms:    {}",
        if ctx.prefers_image_path(OperationClass::GeometricTransform) {
            "image path"
        } else {
            "buffer path"
        }
    );
    if let Some(cap) = config.max_alloc_bytes {
        println!("Alloc cap:     {}", format_bytes(cap));
    }

    if verbose {
        println!();
        println!("Built-in kernels:");
        for id in ProgramLibrary::with_builtins().ids() {
            println!("  {id}");
        }
    }

    manager.close();
    Ok(())
}
