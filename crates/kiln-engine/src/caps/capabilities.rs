use crate::time::TimestampCalibration;

/// PCI identity of an adapter.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct HardwareIds {
    pub vendor_id: u32,
    pub device_id: u32,
    pub subsys_id: u32,
    pub revision: u32,
}

/// Device class reported to the API layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeviceType {
    Gpu,
    /// Compute-only adapter (no display or graphics engine).
    Accelerator,
}

/// Highest shader model supported by the adapter.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ShaderModel {
    pub major: u8,
    pub minor: u8,
}

impl ShaderModel {
    pub const SM_6_0: ShaderModel = ShaderModel { major: 6, minor: 0 };

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl Default for ShaderModel {
    fn default() -> Self {
        Self::SM_6_0
    }
}

/// Subgroup ("wave") lane counts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WaveLanes {
    pub min: u32,
    pub max: u32,
}

/// Optional features that change what the API layer advertises.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FeatureOptions {
    /// Typed loads from read/write resources beyond the always-supported formats.
    pub typed_uav_load_additional_formats: bool,
    /// Native 16-bit integer/float shader operations.
    pub native_16bit_ops: bool,
    /// `None` when wave operations are unsupported.
    pub wave_ops: Option<WaveLanes>,
}

/// Memory architecture of the adapter.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Architecture {
    pub uma: bool,
    pub cache_coherent_uma: bool,
    pub tile_based_renderer: bool,
}

/// Memory budget in bytes.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct MemoryInfo {
    pub dedicated: u64,
    pub shared: u64,
}

/// Immutable snapshot of an adapter's feature set.
///
/// Produced once per logical device by the native capability query and
/// shared read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub name: String,
    pub hardware_ids: HardwareIds,
    /// Microsoft Compute Driver Model style compute-only adapter.
    pub is_mcdm: bool,
    pub options: FeatureOptions,
    pub shader_model: ShaderModel,
    pub architecture: Architecture,
    pub memory: MemoryInfo,
    pub timestamps: TimestampCalibration,
}

impl Capabilities {
    pub fn device_type(&self) -> DeviceType {
        if self.is_mcdm {
            DeviceType::Accelerator
        } else {
            DeviceType::Gpu
        }
    }

    /// Memory the API layer reports as global memory.
    ///
    /// UMA adapters have little or no dedicated memory; they report the shared
    /// system budget instead.
    pub fn global_mem_size(&self) -> u64 {
        if self.architecture.uma {
            self.memory.shared.max(self.memory.dedicated)
        } else {
            self.memory.dedicated
        }
    }

    /// Returns `(min, max)` wave lane counts, `(32, 64)` without wave ops.
    pub fn wave_sizes(&self) -> (u32, u32) {
        match self.options.wave_ops {
            Some(lanes) => (lanes.min, lanes.max),
            None => (32, 64),
        }
    }
}
