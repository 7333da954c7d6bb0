//! voxl - compute device inspection and benchmarking
//!
//! Lists compute devices, reports the capabilities of a selected device and
//! runs a small benchmark pipeline over the built-in kernels.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "voxl")]
#[command(author, version, about = "Compute device inspection and benchmarks")]
#[command(long_about = "
Inspect compute devices and benchmark the built-in kernels.

Examples:
  voxl devices                          # Describe every device
  voxl devices --names                  # Device names only
  voxl info --device RTX                # Capabilities of a matching device
  voxl bench -W 2048 -H 2048 -n 20      # Benchmark pipeline

Environment:
  VOXL_DEVICE, VOXL_IMAGE_TRANSFORMS, VOXL_IMAGE_MIN_VERSION,
  VOXL_MAX_ALLOC_MB, RUST_LOG
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// List compute devices
    #[command(visible_alias = "d")]
    Devices(DevicesArgs),

    /// Open a device and show its capabilities
    #[command(visible_alias = "i")]
    Info(InfoArgs),

    /// Run the benchmark pipeline
    #[command(visible_alias = "b")]
    Bench(BenchArgs),
}

#[derive(Args)]
struct DevicesArgs {
    /// Print names only
    #[arg(long)]
    names: bool,
}

#[derive(Args)]
struct InfoArgs {
    /// Device name substring (case-sensitive)
    #[arg(short, long)]
    device: Option<String>,
}

#[derive(Args)]
struct BenchArgs {
    /// Device name substring (case-sensitive)
    #[arg(short, long)]
    device: Option<String>,

    /// Width in elements
    #[arg(short = 'W', long, default_value = "1024")]
    width: usize,

    /// Height in elements
    #[arg(short = 'H', long, default_value = "1024")]
    height: usize,

    /// Depth in slices
    #[arg(short = 'D', long, default_value = "1")]
    depth: usize,

    /// Iterations per step
    #[arg(short = 'n', long, default_value = "10")]
    iterations: usize,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Configure thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::Devices(args) => commands::devices::run(args, cli.verbose),
        Commands::Info(args) => commands::info::run(args, cli.verbose),
        Commands::Bench(args) => commands::bench::run(args, cli.verbose),
    }
}
