//! Device enumeration and selection.

use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use super::{Device, DeviceBackend, DeviceQueue, HostBackend};
use crate::config::format_bytes;
use crate::{ComputeError, ComputeResult};

/// Process-wide cache of discovered device names.
static DEVICE_NAMES: OnceLock<Vec<String>> = OnceLock::new();

/// Enumerates devices over a set of backends and picks one by name.
///
/// The device list is probed lazily and cached after the first successful
/// probe. Accelerators are listed before CPU-like devices.
pub struct DeviceRegistry {
    backends: Vec<Arc<dyn DeviceBackend>>,
    devices: Mutex<Option<Vec<Device>>>,
}

impl DeviceRegistry {
    /// Registry over explicit backends.
    pub fn new(backends: Vec<Arc<dyn DeviceBackend>>) -> Self {
        Self {
            backends,
            devices: Mutex::new(None),
        }
    }

    /// Registry over a single backend.
    pub fn with_backend(backend: impl DeviceBackend + 'static) -> Self {
        Self::new(vec![Arc::new(backend)])
    }

    /// Registry over every backend compiled into this build.
    pub fn detect() -> Self {
        #[allow(unused_mut)]
        let mut backends: Vec<Arc<dyn DeviceBackend>> = Vec::new();

        #[cfg(feature = "wgpu")]
        backends.push(Arc::new(super::WgpuBackend::new()));

        backends.push(Arc::new(HostBackend::new()));
        Self::new(backends)
    }

    /// Ordered device list, accelerators first.
    pub fn list_devices(&self) -> ComputeResult<Vec<Device>> {
        let mut cache = self
            .devices
            .lock()
            .map_err(|_| ComputeError::OperationFailed("device cache lock poisoned".into()))?;
        if let Some(devices) = cache.as_ref() {
            return Ok(devices.clone());
        }

        let mut devices = Vec::new();
        let mut probed = false;
        for backend in &self.backends {
            match backend.probe() {
                Ok(found) => {
                    debug!(backend = backend.name(), count = found.len(), "probed devices");
                    probed = true;
                    devices.extend(found);
                }
                Err(e) => warn!(backend = backend.name(), error = %e, "device probe failed"),
            }
        }
        // Stable: keeps backend order within each category.
        devices.sort_by_key(|d| d.is_cpu());

        if probed {
            *cache = Some(devices.clone());
        }
        Ok(devices)
    }

    /// Picks a device.
    ///
    /// A non-empty `hint` selects the first device whose name contains it
    /// (case-sensitive) or fails with [`ComputeError::NoMatchingDevice`].
    /// Without a hint the first accelerator wins, then the first device of
    /// any kind.
    pub fn select_device(&self, hint: Option<&str>) -> ComputeResult<Device> {
        let devices = self.list_devices()?;
        let hint = hint.filter(|h| !h.is_empty());

        let selected = match hint {
            Some(h) => devices
                .iter()
                .find(|d| d.name.contains(h))
                .cloned()
                .ok_or_else(|| ComputeError::NoMatchingDevice(h.to_string()))?,
            None => devices
                .iter()
                .find(|d| !d.is_cpu())
                .or_else(|| devices.first())
                .cloned()
                .ok_or(ComputeError::NoDeviceFound)?,
        };
        debug!(device = %selected, hint = ?hint, "selected device");
        Ok(selected)
    }

    /// Opens a queue on `device` through the backend that enumerated it.
    pub fn open(&self, device: &Device) -> ComputeResult<Box<dyn DeviceQueue>> {
        let backend = self
            .backends
            .iter()
            .find(|b| b.name() == device.backend)
            .ok_or_else(|| {
                ComputeError::OperationFailed(format!("backend '{}' is not registered", device.backend))
            })?;
        backend.open(device)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::detect()
    }
}

/// Names of all devices in this build, probed once per process.
pub fn available_device_names() -> Vec<String> {
    DEVICE_NAMES
        .get_or_init(|| {
            DeviceRegistry::detect()
                .list_devices()
                .map(|devices| devices.into_iter().map(|d| d.name).collect())
                .unwrap_or_default()
        })
        .clone()
}

/// Human-readable summary of every device in `registry`.
pub fn describe_devices(registry: &DeviceRegistry) -> ComputeResult<String> {
    let devices = registry.list_devices()?;
    let mut desc = String::new();

    for (i, d) in devices.iter().enumerate() {
        let kind = if d.is_cpu() { "cpu" } else { "accelerator" };
        desc.push_str(&format!("[{i}] {}\n", d.name));
        desc.push_str(&format!("    backend:      {}\n", d.backend));
        desc.push_str(&format!("    kind:         {kind}\n"));
        desc.push_str(&format!("    version:      {}\n", d.version));
        desc.push_str(&format!("    images:       {}\n", if d.image_support { "yes" } else { "no" }));
        desc.push_str(&format!("    global mem:   {}\n", format_bytes(d.global_memory_bytes)));
        desc.push_str(&format!("    max alloc:    {}\n", format_bytes(d.max_alloc_bytes)));
    }

    Ok(desc)
}
