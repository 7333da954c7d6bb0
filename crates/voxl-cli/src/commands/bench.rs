//! Bench command - time a pipeline of built-in kernels

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use voxl_compute::{
    ComputeContext, ContextManager, ConversionRegistry, EquivalenceCache, KernelExecutor, OperationClass, Value, ops,
};
use voxl_core::{Dimensions, HostArray};

use super::open_context;
use crate::BenchArgs;

struct Step {
    name: &'static str,
    total: Duration,
}

pub fn run(args: BenchArgs, verbose: bool) -> Result<()> {
    if args.iterations == 0 {
        bail!("--iterations must be at least 1");
    }
    let dims = Dimensions::d3(args.width, args.height, args.depth).context("Invalid benchmark size")?;

    let mut manager = ContextManager::detect();
    let ctx = open_context(&mut manager, args.device.as_deref())?;
    println!("Device: {}", ctx.device());
    println!("Size:   {dims} f32, {} iterations", args.iterations);
    if verbose {
        println!(
            "Rotate: {}",
            if ctx.prefers_image_path(OperationClass::GeometricTransform) {
                "image path"
            } else {
                "buffer path"
            }
        );
    }

    let steps = pipeline(&ctx, dims, args.iterations)?;

    println!();
    println!("{:<10} {:>12} {:>12}", "step", "total ms", "avg ms");
    for step in &steps {
        let total = step.total.as_secs_f64() * 1000.0;
        println!("{:<10} {:>12.3} {:>12.3}", step.name, total, total / args.iterations as f64);
    }

    let stats = ctx.stats();
    if verbose {
        println!();
        println!(
            "Allocations: {} buffers, {} images, {} released",
            stats.buffers_allocated, stats.images_allocated, stats.released
        );
    }

    manager.close();
    Ok(())
}

fn ramp(dims: Dimensions) -> Result<HostArray> {
    let data: Vec<f32> = (0..dims.element_count()).map(|i| (i % 256) as f32).collect();
    Ok(HostArray::from_vec(data, dims)?)
}

fn pipeline(ctx: &ComputeContext, dims: Dimensions, iterations: usize) -> Result<Vec<Step>> {
    let conversions = ConversionRegistry::with_host_bridge();
    let mut exec = KernelExecutor::with_builtins();
    let mut cache = EquivalenceCache::new();

    let mut steps = vec![
        Step { name: "upload", total: Duration::ZERO },
        Step { name: "fill", total: Duration::ZERO },
        Step { name: "add", total: Duration::ZERO },
        Step { name: "copy", total: Duration::ZERO },
        Step { name: "rotate", total: Duration::ZERO },
        Step { name: "mean", total: Duration::ZERO },
        Step { name: "download", total: Duration::ZERO },
    ];
    let host = ramp(dims)?;

    for _ in 0..iterations {
        let start = Instant::now();
        let input = conversions.to_buffer(ctx, host.clone()).context("Upload failed")?;
        steps[0].total += start.elapsed();

        let offset = ctx.create_buffer_like(&input)?;
        let sum = ctx.create_buffer_like(&input)?;
        let copied = ctx.create_buffer_like(&input)?;
        let rotated = ctx.create_buffer_like(&input)?;

        let start = Instant::now();
        ops::fill(&mut exec, ctx, &offset, 1.0).context("fill failed")?;
        steps[1].total += start.elapsed();

        let start = Instant::now();
        ops::add_images(&mut exec, ctx, &input, &offset, &sum).context("add failed")?;
        steps[2].total += start.elapsed();

        let start = Instant::now();
        ops::copy(&mut exec, ctx, &sum, &copied).context("copy failed")?;
        steps[3].total += start.elapsed();

        let start = Instant::now();
        ops::rotate_2d(&mut exec, &mut cache, ctx, &copied, &rotated, 15.0, true).context("rotate failed")?;
        steps[4].total += start.elapsed();

        let start = Instant::now();
        let mean = ops::mean_of_all_pixels(&mut exec, ctx, &rotated).context("mean failed")?;
        steps[5].total += start.elapsed();
        tracing::debug!(mean, "iteration done");

        let start = Instant::now();
        conversions.to_host(ctx, Value::Buffer(rotated)).context("Download failed")?;
        steps[6].total += start.elapsed();

        for buffer in [input, offset, sum, copied] {
            cache.release(buffer);
        }
    }
    cache.clear();
    ctx.finish()?;
    Ok(steps)
}
