use candle_core::Device;
use log::{info, warn};

pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub device: Device,
    pub verbose: bool,
    pub show_progress: bool,
}

/// Pick a compute device
///
/// * `use_gpu` - try CUDA first and then Metal before falling back to CPU
pub fn select_device(use_gpu: bool) -> candle_core::Result<Device> {
    if !use_gpu {
        return Ok(Device::Cpu);
    }

    if candle_core::utils::cuda_is_available() {
        info!("using CUDA device 0");
        return Device::new_cuda(0);
    }

    if candle_core::utils::metal_is_available() {
        info!("using Metal device 0");
        return Device::new_metal(0);
    }

    warn!("no GPU device available; falling back to CPU");
    Ok(Device::Cpu)
}
