//! Compute device selection.
//!
//! Accelerator classes are probed once, in a fixed priority order
//! (CUDA, then Metal, then CPU), and the first available one is cached for
//! the rest of the process. Providers read the cached [`Device`] from their
//! [`ProviderContext`](crate::provider::ProviderContext) instead of probing
//! themselves.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

const TRACING_TARGET: &str = "plotline_pipeline::device";

/// Environment variable that pins the device (`cuda`, `metal`, `cpu`),
/// bypassing the probes.
pub const DEVICE_OVERRIDE_ENV: &str = "PLOTLINE_DEVICE";

/// A compute device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// NVIDIA GPU.
    Cuda,
    /// Apple GPU.
    Metal,
    Cpu,
}

impl Device {
    /// Probe order, highest priority first.
    pub const PRIORITY: [Self; 3] = [Self::Cuda, Self::Metal, Self::Cpu];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Metal => "metal",
            Self::Cpu => "cpu",
        }
    }

    /// `true` for any accelerator class.
    #[must_use]
    pub const fn is_accelerator(self) -> bool {
        !matches!(self, Self::Cpu)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cuda" | "gpu" => Some(Self::Cuda),
            "metal" | "mps" => Some(Self::Metal),
            "cpu" => Some(Self::Cpu),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reports whether one device class is usable.
pub trait DeviceProbe: Send + Sync {
    fn device(&self) -> Device;
    fn is_available(&self) -> bool;
}

/// Detects an NVIDIA driver through its control device node.
#[derive(Debug, Default, Clone, Copy)]
pub struct CudaProbe;

impl DeviceProbe for CudaProbe {
    fn device(&self) -> Device {
        Device::Cuda
    }

    fn is_available(&self) -> bool {
        let hidden = std::env::var("CUDA_VISIBLE_DEVICES")
            .is_ok_and(|v| v.trim().is_empty() || v.trim() == "-1");
        !hidden && Path::new("/dev/nvidiactl").exists()
    }
}

/// Apple silicon always carries a Metal-capable GPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetalProbe;

impl DeviceProbe for MetalProbe {
    fn device(&self) -> Device {
        Device::Metal
    }

    fn is_available(&self) -> bool {
        cfg!(all(target_os = "macos", target_arch = "aarch64"))
    }
}

/// Chooses a device from an ordered probe list.
pub struct DeviceSelector {
    probes: Vec<Box<dyn DeviceProbe>>,
}

impl fmt::Debug for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order: Vec<Device> = self.probes.iter().map(|p| p.device()).collect();
        f.debug_struct("DeviceSelector").field("order", &order).finish()
    }
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::new(vec![Box::new(CudaProbe), Box::new(MetalProbe)])
    }
}

impl DeviceSelector {
    /// A selector over `probes`, sorted into [`Device::PRIORITY`] order.
    /// CPU is the implicit fallback and needs no probe.
    #[must_use]
    pub fn new(mut probes: Vec<Box<dyn DeviceProbe>>) -> Self {
        probes.sort_by_key(|p| Device::PRIORITY.iter().position(|d| *d == p.device()));
        Self { probes }
    }

    /// Run the probes and return the first available device.
    #[must_use]
    pub fn select(&self) -> Device {
        self.probes
            .iter()
            .find(|p| p.is_available())
            .map_or(Device::Cpu, |p| p.device())
    }

    /// Process-wide device, probed on first use and cached.
    ///
    /// [`DEVICE_OVERRIDE_ENV`] pins the choice when set to a known name.
    #[must_use]
    pub fn global() -> Device {
        static SELECTED: OnceLock<Device> = OnceLock::new();
        *SELECTED.get_or_init(|| {
            let pinned = std::env::var(DEVICE_OVERRIDE_ENV)
                .ok()
                .and_then(|v| Device::parse(&v));
            let device = pinned.unwrap_or_else(|| Self::default().select());
            tracing::info!(
                target: TRACING_TARGET,
                device = %device,
                pinned = pinned.is_some(),
                "Selected compute device"
            );
            device
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Device, bool);

    impl DeviceProbe for Fixed {
        fn device(&self) -> Device {
            self.0
        }

        fn is_available(&self) -> bool {
            self.1
        }
    }

    #[test]
    fn prefers_cuda_over_metal() {
        let selector = DeviceSelector::new(vec![
            Box::new(Fixed(Device::Metal, true)),
            Box::new(Fixed(Device::Cuda, true)),
        ]);
        assert_eq!(selector.select(), Device::Cuda);
    }

    #[test]
    fn falls_through_unavailable_accelerators() {
        let selector = DeviceSelector::new(vec![
            Box::new(Fixed(Device::Cuda, false)),
            Box::new(Fixed(Device::Metal, true)),
        ]);
        assert_eq!(selector.select(), Device::Metal);
    }

    #[test]
    fn cpu_when_nothing_probes_available() {
        let selector = DeviceSelector::new(vec![
            Box::new(Fixed(Device::Cuda, false)),
            Box::new(Fixed(Device::Metal, false)),
        ]);
        assert_eq!(selector.select(), Device::Cpu);
        assert_eq!(DeviceSelector::new(Vec::new()).select(), Device::Cpu);
    }

    #[test]
    fn global_selection_is_stable() {
        assert_eq!(DeviceSelector::global(), DeviceSelector::global());
    }

    #[test]
    fn parses_aliases() {
        assert_eq!(Device::parse("MPS"), Some(Device::Metal));
        assert_eq!(Device::parse(" cpu "), Some(Device::Cpu));
        assert_eq!(Device::parse("tpu"), None);
    }
}
