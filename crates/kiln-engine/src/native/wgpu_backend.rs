use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::caps::{
    Architecture, Capabilities, FeatureOptions, HardwareIds, MemoryInfo, ShaderModel,
};
use crate::time::TimestampCalibration;

use super::{AdapterDesc, FenceValue, NativeAdapter, NativeError, NativeQueue};

/// Initialization parameters for the wgpu backend.
///
/// Keep this structure stable and minimal. Add configuration flags only when a
/// concrete platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct WgpuAdapterConfig {
    /// Backends the instance may pick an adapter from.
    pub backends: wgpu::Backends,

    /// Adapter selection preference.
    ///
    /// Compute workloads usually want the discrete GPU.
    pub power_preference: wgpu::PowerPreference,

    /// Required wgpu features for every device created on the adapter.
    ///
    /// Favor an empty set for portability unless a feature is strictly necessary.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Select a software adapter instead of hardware.
    pub force_fallback_adapter: bool,
}

impl Default for WgpuAdapterConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            force_fallback_adapter: false,
        }
    }
}

/// Physical adapter selected through wgpu.
pub struct WgpuAdapter {
    adapter: wgpu::Adapter,
    config: WgpuAdapterConfig,
}

impl WgpuAdapter {
    /// Selects an adapter. Blocks on wgpu's asynchronous adapter request.
    pub fn request(config: WgpuAdapterConfig) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: config.power_preference,
            compatible_surface: None,
            force_fallback_adapter: config.force_fallback_adapter,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        log::info!("selected adapter '{}' ({:?}, {:?})", info.name, info.device_type, info.backend);

        Ok(Self { adapter, config })
    }

    pub fn info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn raw(&self) -> &wgpu::Adapter {
        &self.adapter
    }
}

/// Logical wgpu device plus what capability queries need from its queue.
pub struct WgpuDevice {
    pub device: wgpu::Device,
    /// Nanoseconds per timestamp tick, sampled from the queue at creation.
    pub timestamp_period: f32,
}

/// Recording state for one batch.
///
/// Task work records compute passes into `encoder`; `device` is there for
/// creating transient objects while recording.
pub struct WgpuEncoder {
    pub device: wgpu::Device,
    pub encoder: wgpu::CommandEncoder,
}

#[derive(Default)]
struct InFlight {
    last_fence: FenceValue,
    /// Submitted and not yet known to be complete, oldest first.
    pending: VecDeque<(FenceValue, wgpu::SubmissionIndex)>,
}

/// wgpu queue with fence bookkeeping.
///
/// wgpu hands out opaque submission indices; they are mapped to increasing
/// fence values here.
pub struct WgpuQueue {
    device: wgpu::Device,
    queue: wgpu::Queue,
    in_flight: Mutex<InFlight>,
}

impl WgpuQueue {
    /// Wraps an existing device/queue pair, e.g. one shared with a renderer.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue, in_flight: Mutex::new(InFlight::default()) }
    }

    pub fn raw(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NativeAdapter for WgpuAdapter {
    type Device = WgpuDevice;
    type Queue = WgpuQueue;

    fn describe(&self) -> AdapterDesc {
        let info = self.adapter.get_info();
        AdapterDesc {
            // wgpu has no LUID; vendor/device ids identify the adapter instead.
            luid: (u64::from(info.vendor) << 32) | u64::from(info.device),
            name: info.name,
            is_valid: true,
        }
    }

    fn create_device(&self) -> Result<(Arc<WgpuDevice>, Arc<WgpuQueue>), NativeError> {
        let (device, queue) = pollster::block_on(self.adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("kiln-engine device"),
            required_features: self.config.required_features,
            required_limits: self.config.required_limits.clone(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| NativeError::DeviceCreation(e.to_string()))?;

        let timestamp_period = queue.get_timestamp_period();
        let native_queue = WgpuQueue::new(device.clone(), queue);
        Ok((Arc::new(WgpuDevice { device, timestamp_period }), Arc::new(native_queue)))
    }

    fn query_caps(&self, device: &WgpuDevice) -> Result<Capabilities, NativeError> {
        let info = self.adapter.get_info();
        let features = self.adapter.features();
        let limits = self.adapter.limits();
        let downlevel = self.adapter.get_downlevel_capabilities();

        if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(NativeError::CapsQuery(format!(
                "'{}' does not support compute shaders",
                info.name
            )));
        }

        let uma = matches!(info.device_type, wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::Cpu);
        let memory = if uma {
            MemoryInfo { dedicated: 0, shared: limits.max_buffer_size }
        } else {
            MemoryInfo { dedicated: limits.max_buffer_size, shared: 0 }
        };

        Ok(Capabilities {
            hardware_ids: HardwareIds {
                vendor_id: info.vendor,
                device_id: info.device,
                subsys_id: 0,
                revision: 0,
            },
            is_mcdm: false,
            options: FeatureOptions {
                typed_uav_load_additional_formats: features
                    .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES),
                native_16bit_ops: features.contains(wgpu::Features::SHADER_I16),
                wave_ops: None,
            },
            shader_model: shader_model(downlevel.shader_model),
            architecture: Architecture {
                uma,
                cache_coherent_uma: info.device_type == wgpu::DeviceType::Cpu,
                tile_based_renderer: false,
            },
            memory,
            timestamps: TimestampCalibration::from_period_ns(device.timestamp_period),
            name: info.name,
        })
    }
}

fn shader_model(model: wgpu::ShaderModel) -> ShaderModel {
    match model {
        wgpu::ShaderModel::Sm5 => ShaderModel::new(5, 0),
        wgpu::ShaderModel::Sm4 => ShaderModel::new(4, 0),
        _ => ShaderModel::new(2, 0),
    }
}

impl NativeQueue for WgpuQueue {
    type Encoder = WgpuEncoder;

    fn begin(&self, label: &str) -> Result<WgpuEncoder, NativeError> {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Ok(WgpuEncoder { device: self.device.clone(), encoder })
    }

    fn submit(&self, encoder: WgpuEncoder) -> Result<FenceValue, NativeError> {
        let WgpuEncoder { encoder, .. } = encoder;

        // Held across submit so fence order matches submission order.
        let mut in_flight = self.in_flight();
        let index = self.queue.submit(std::iter::once(encoder.finish()));
        in_flight.last_fence += 1;
        let fence = in_flight.last_fence;
        in_flight.pending.push_back((fence, index));
        Ok(fence)
    }

    fn wait(&self, fence: FenceValue, timeout: Duration) -> Result<bool, NativeError> {
        let index = {
            let in_flight = self.in_flight();
            match in_flight.pending.iter().find(|(f, _)| *f == fence) {
                Some((_, index)) => index.clone(),
                // Retired by an earlier wait.
                None => return Ok(fence <= in_flight.last_fence),
            }
        };

        match self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(index),
            timeout: Some(timeout),
        }) {
            Ok(_) => {
                // Submissions on one queue finish in order.
                self.in_flight().pending.retain(|(f, _)| *f > fence);
                Ok(true)
            }
            Err(wgpu::PollError::Timeout) => Ok(false),
            Err(err) => Err(NativeError::Wait(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_model_maps_downlevel_tiers() {
        assert_eq!(shader_model(wgpu::ShaderModel::Sm5), ShaderModel::new(5, 0));
        assert_eq!(shader_model(wgpu::ShaderModel::Sm4), ShaderModel::new(4, 0));
        assert_eq!(shader_model(wgpu::ShaderModel::Sm2), ShaderModel::new(2, 0));
    }

    #[test]
    fn default_config_is_portable() {
        let config = WgpuAdapterConfig::default();
        assert!(config.required_features.is_empty());
        assert!(!config.force_fallback_adapter);
    }
}
