//! Devices command - list compute devices

use anyhow::{Context, Result};
use voxl_compute::{DeviceRegistry, available_device_names, describe_devices};

use crate::DevicesArgs;

pub fn run(args: DevicesArgs, verbose: bool) -> Result<()> {
    if args.names {
        let names = available_device_names();
        if names.is_empty() {
            println!("No compute devices found");
        }
        for name in names {
            println!("{name}");
        }
        return Ok(());
    }

    let registry = DeviceRegistry::detect();
    let desc = describe_devices(&registry).context("Failed to probe devices")?;
    if desc.is_empty() {
        println!("No compute devices found");
    } else {
        print!("{desc}");
    }

    if verbose {
        let selected = registry.select_device(None).context("Failed to select default device")?;
        println!("Default selection: {selected}");
    }
    Ok(())
}
