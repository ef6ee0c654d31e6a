//! Host accelerator detection and the defaults derived from it.
//!
//! Environment variables:
//! * `GPTGRAM_FORCE_CPU` - `1`/`true` hides any accelerator.
//! * `GPTGRAM_FORCE_CUDA` - `1`/`true` reports an accelerator even without a
//!   device node (containers that mount the driver elsewhere).
//! * `GPTGRAM_NO_BF16` - `1`/`true` reports an accelerator without bfloat16
//!   support, selecting `float16`.

use std::env;
use std::path::Path;

use tracing::debug;

use crate::config::{DeviceKind, Precision, SystemConfig};

const NVIDIA_DEVICE_NODE: &str = "/dev/nvidia0";

pub trait AcceleratorProbe {
    fn cuda_available(&self) -> bool;
    fn bf16_supported(&self) -> bool;
}

/// Probes the running host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl AcceleratorProbe for HostProbe {
    fn cuda_available(&self) -> bool {
        if env_flag("GPTGRAM_FORCE_CPU") {
            return false;
        }
        env_flag("GPTGRAM_FORCE_CUDA") || Path::new(NVIDIA_DEVICE_NODE).exists()
    }

    fn bf16_supported(&self) -> bool {
        self.cuda_available() && !env_flag("GPTGRAM_NO_BF16")
    }
}

/// Fixed answers, for tests and for callers that already know the host.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    pub cuda: bool,
    pub bf16: bool,
}

impl AcceleratorProbe for StaticProbe {
    fn cuda_available(&self) -> bool {
        self.cuda
    }

    fn bf16_supported(&self) -> bool {
        self.cuda && self.bf16
    }
}

impl SystemConfig {
    pub fn detect(probe: &dyn AcceleratorProbe) -> Self {
        let use_cuda = probe.cuda_available();
        let device = if use_cuda {
            DeviceKind::Cuda(0)
        } else {
            DeviceKind::Cpu
        };
        let dtype = select_precision(probe);
        debug!("system defaults: device={device}, dtype={dtype}");

        Self {
            use_cuda,
            device,
            dtype,
            compile: true,
            num_workers: 0,
        }
    }

    /// Reduced precision only makes sense on an accelerator.
    pub fn effective_dtype(&self) -> Precision {
        if self.device.is_accelerator() {
            self.dtype
        } else {
            Precision::Float32
        }
    }
}

pub fn select_precision(probe: &dyn AcceleratorProbe) -> Precision {
    if !probe.cuda_available() {
        Precision::Float32
    } else if probe.bf16_supported() {
        Precision::BFloat16
    } else {
        Precision::Float16
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
