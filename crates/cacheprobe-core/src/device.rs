//! Compute device selection.
//!
//! The device a session moves batches to is an explicit configuration value,
//! resolved once when the session is constructed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Compute device that batches and tensors are placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// CUDA accelerator with device ID.
    Cuda { device_id: usize },
}

impl Device {
    /// Auto-detect the preferred device.
    ///
    /// Selects CUDA device 0 when `CUDA_VISIBLE_DEVICES` is set or
    /// `nvidia-smi` answers, otherwise the host.
    #[must_use]
    pub fn auto_detect() -> Self {
        if Self::cuda_available() {
            Device::Cuda { device_id: 0 }
        } else {
            Device::Cpu
        }
    }

    /// Check if CUDA is available.
    #[must_use]
    pub fn cuda_available() -> bool {
        if std::env::var("CUDA_VISIBLE_DEVICES").is_ok_and(|v| !v.is_empty()) {
            return true;
        }

        std::process::Command::new("nvidia-smi")
            .arg("--query-gpu=name")
            .arg("--format=csv,noheader")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Resolve an optional setting, auto-detecting when unset.
    #[must_use]
    pub fn resolve(setting: Option<Device>) -> Self {
        setting.unwrap_or_else(Self::auto_detect)
    }

    /// Check if this device is host memory.
    #[must_use]
    pub const fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda { device_id } => write!(f, "cuda:{device_id}"),
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda { device_id: 0 }),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .map(|device_id| Device::Cuda { device_id })
                .ok_or_else(|| Error::Config(format!("unknown device '{other}'"))),
        }
    }
}
