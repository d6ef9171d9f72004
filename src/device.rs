//! # Device Detection and Selection
//!
//! Resolves the compute device a job runs on (CUDA GPU with CPU fallback)
//! and provides the memory-reclaim hint issued before a model swap. Also
//! picks a sensible default model tier based on what hardware is available.

use crate::model::tier::ModelTier;
use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Cached CUDA probe result; device detection is not free and the answer
/// does not change during the life of the process.
static CUDA_DEVICE: OnceLock<Option<Device>> = OnceLock::new();

fn probe_cuda() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => {
            debug!("CUDA device 0 available");
            Some(device)
        }
        Err(e) => {
            debug!("CUDA not available: {}", e);
            None
        }
    }
}

/// Whether a CUDA device is available on this machine.
pub fn cuda_available() -> bool {
    CUDA_DEVICE.get_or_init(probe_cuda).is_some()
}

/// Resolve the device for a job: CUDA when requested and available,
/// otherwise CPU. A GPU request on a CPU-only machine logs the fallback
/// instead of failing the job.
pub fn resolve(use_gpu: bool) -> Device {
    if use_gpu {
        if let Some(device) = CUDA_DEVICE.get_or_init(probe_cuda) {
            return device.clone();
        }
        warn!("GPU requested but CUDA is not available, falling back to CPU");
    }
    Device::Cpu
}

/// Whether a device is an accelerator (as opposed to general-purpose compute).
pub fn is_accelerator(device: &Device) -> bool {
    !matches!(device, Device::Cpu)
}

/// Best-effort memory-reclaim hint, issued after the cached model has been
/// dropped and before the next one is loaded. On CUDA this drains pending
/// work so freed allocations are actually returned before the new weights
/// arrive; on CPU it is a no-op.
pub fn reclaim_hint(device: &Device) {
    if is_accelerator(device) {
        info!("reclaiming device memory before model load");
        if let Err(e) = device.synchronize() {
            debug!("device synchronize failed during reclaim: {}", e);
        }
    }
}

/// Suggested default model tier for this machine. With an accelerator
/// present a mid-size model is comfortable; on CPU the small tier keeps
/// turnaround reasonable.
pub fn suggested_tier() -> ModelTier {
    if cuda_available() {
        ModelTier::Medium
    } else {
        ModelTier::Small
    }
}

/// Device availability summary for the system-info endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceSummary {
    pub cuda_available: bool,
    pub device: String,
    pub suggested_model: ModelTier,
}

pub fn summary() -> DeviceSummary {
    let cuda = cuda_available();
    DeviceSummary {
        cuda_available: cuda,
        device: if cuda { "cuda:0" } else { "cpu" }.to_string(),
        suggested_model: suggested_tier(),
    }
}
