//! Runtime configuration.
//!
//! # Environment Variables
//!
//! - `VOXL_DEVICE` - Default device-name hint when the caller passes none
//! - `VOXL_IMAGE_TRANSFORMS` - `auto`, `always` or `never`: route geometric
//!   transforms through image storage
//! - `VOXL_IMAGE_MIN_VERSION` - Capability version at which `auto` switches
//!   to the image path (e.g. `1.2`)
//! - `VOXL_MAX_ALLOC_MB` - Cap on a single allocation in megabytes

use std::env;
use std::str::FromStr;

use tracing::warn;

use crate::device::CapabilityVersion;

/// Capability version at/above which `auto` routing prefers images.
pub const DEFAULT_IMAGE_MIN_VERSION: CapabilityVersion = CapabilityVersion::new(1, 2);

/// How transform-class operations pick between buffer and image storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageRouting {
    /// Use images when the device supports them and its capability version
    /// reaches [`ComputeConfig::image_min_version`].
    #[default]
    Auto,
    /// Always use images (when the device supports them at all).
    Always,
    /// Never use images.
    Never,
}

impl ImageRouting {
    /// Parse from "auto" / "always" / "never" (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "always" | "1" | "true" => Some(Self::Always),
            "never" | "0" | "false" => Some(Self::Never),
            _ => None,
        }
    }
}

/// Compute core configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeConfig {
    /// Device-name hint used when `get_or_create` is called without one.
    pub default_device: Option<String>,
    /// Image routing policy for geometric transforms.
    pub image_routing: ImageRouting,
    /// Threshold for [`ImageRouting::Auto`].
    pub image_min_version: CapabilityVersion,
    /// Optional cap on a single allocation, below the device's own limit.
    pub max_alloc_bytes: Option<u64>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            default_device: None,
            image_routing: ImageRouting::Auto,
            image_min_version: DEFAULT_IMAGE_MIN_VERSION,
            max_alloc_bytes: None,
        }
    }
}

impl ComputeConfig {
    /// Reads configuration from `VOXL_*` environment variables.
    ///
    /// Unset or unparsable variables fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_device: env_device(),
            image_routing: env_var("VOXL_IMAGE_TRANSFORMS", ImageRouting::parse)
                .unwrap_or(defaults.image_routing),
            image_min_version: env_var("VOXL_IMAGE_MIN_VERSION", |v| CapabilityVersion::from_str(v).ok())
                .unwrap_or(defaults.image_min_version),
            max_alloc_bytes: env_var("VOXL_MAX_ALLOC_MB", parse_megabytes),
        }
    }

    /// Builder: set default device hint.
    pub fn with_default_device(mut self, hint: impl Into<String>) -> Self {
        self.default_device = Some(hint.into());
        self
    }

    /// Builder: set image routing.
    pub fn with_image_routing(mut self, routing: ImageRouting) -> Self {
        self.image_routing = routing;
        self
    }

    /// Builder: cap single allocations.
    pub fn with_max_alloc_bytes(mut self, bytes: u64) -> Self {
        self.max_alloc_bytes = Some(bytes);
        self
    }
}

/// Parsed value of `name`, warning when it is set but invalid.
fn env_var<T>(name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    let raw = env::var(name).ok()?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!(var = name, value = %raw, "ignoring invalid environment value");
    }
    parsed
}

/// Megabytes to bytes, `None` if unparsable or too large for `u64`.
fn parse_megabytes(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()?.checked_mul(1024 * 1024)
}

fn env_device() -> Option<String> {
    env::var("VOXL_DEVICE")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_megabytes() {
        assert_eq!(parse_megabytes(" 64 "), Some(64 * 1024 * 1024));
        assert_eq!(parse_megabytes("lots"), None);
        assert_eq!(parse_megabytes(&u64::MAX.to_string()), None);
        let largest = u64::MAX / (1024 * 1024);
        assert_eq!(parse_megabytes(&largest.to_string()), Some(largest * 1024 * 1024));
    }

    #[test]
    fn test_routing_parse() {
        assert_eq!(ImageRouting::parse("AUTO"), Some(ImageRouting::Auto));
        assert_eq!(ImageRouting::parse(" never "), Some(ImageRouting::Never));
        assert_eq!(ImageRouting::parse("sometimes"), None);
    }

    #[test]
    fn test_defaults() {
        let cfg = ComputeConfig::default();
        assert_eq!(cfg.image_min_version, CapabilityVersion::new(1, 2));
        assert!(cfg.default_device.is_none());
    }

    #[test]
    fn test_builders() {
        let cfg = ComputeConfig::default()
            .with_default_device("gpu")
            .with_image_routing(ImageRouting::Always)
            .with_max_alloc_bytes(64);
        assert_eq!(cfg.default_device.as_deref(), Some("gpu"));
        assert_eq!(cfg.image_routing, ImageRouting::Always);
        assert_eq!(cfg.max_alloc_bytes, Some(64));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1500), "1 KB");
        assert_eq!(format_bytes(1_500_000), "1.4 MB");
        assert_eq!(format_bytes(1_500_000_000), "1.40 GB");
    }
}
