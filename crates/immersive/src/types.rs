use std::fmt;
use std::time::Duration;

/// Which rendering path is currently serving the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Hardware adapter.
    Accelerated,
    /// Software rasterizer adapter; frame rate is capped.
    Fallback,
    /// Nothing is rendering; the host should draw its own static background.
    Disabled,
}

/// Why the renderer is not active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// `init` has not run yet, or `destroy` has.
    Uninitialized,
    /// Built without the `accelerated` feature.
    BuildDisabled,
    /// The user switched the background off (`immersive.enabled = false`).
    RuntimeDisabled,
    /// No GPU adapter could be obtained.
    NoAcceleration,
    /// The device was revoked and has not been restored yet.
    ContextLost,
    /// Device, shader or geometry creation failed.
    InitFailed,
}

impl UnavailableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnavailableReason::Uninitialized => "uninitialized",
            UnavailableReason::BuildDisabled => "build-disabled",
            UnavailableReason::RuntimeDisabled => "runtime-disabled",
            UnavailableReason::NoAcceleration => "no-acceleration",
            UnavailableReason::ContextLost => "context-lost",
            UnavailableReason::InitFailed => "init-failed",
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-frame and per-load measurements; only reported while active.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub fps: f32,
    pub last_frame: Duration,
    pub adapter: String,
    pub resident_textures: usize,
    pub gpu_memory_bytes: u64,
}

/// Read-only snapshot handed to the host.
///
/// `unavailable_reason` is present iff `active` is false, `metrics` iff it is
/// true. Snapshots are rebuilt wholesale on every query.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmersiveState {
    pub active: bool,
    pub backend: Backend,
    pub unavailable_reason: Option<UnavailableReason>,
    pub metrics: Option<Metrics>,
}

impl ImmersiveState {
    pub fn active(backend: Backend, metrics: Metrics) -> Self {
        Self {
            active: true,
            backend,
            unavailable_reason: None,
            metrics: Some(metrics),
        }
    }

    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self {
            active: false,
            backend: Backend::Disabled,
            unavailable_reason: Some(reason),
            metrics: None,
        }
    }
}

impl Default for ImmersiveState {
    fn default() -> Self {
        Self::unavailable(UnavailableReason::Uninitialized)
    }
}

/// Summary of the adapter a device was created on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: String,
    pub software: bool,
    pub max_texture_dimension: u32,
}

impl AdapterProfile {
    pub(crate) fn from_wgpu(info: &wgpu::AdapterInfo, limits: &wgpu::Limits) -> Self {
        let lowered = info.name.to_ascii_lowercase();
        let software = matches!(info.device_type, wgpu::DeviceType::Cpu)
            || ["llvmpipe", "softpipe", "swiftshader", "basic render"]
                .iter()
                .any(|needle| lowered.contains(needle));
        Self {
            name: info.name.clone(),
            backend: format!("{:?}", info.backend),
            software,
            max_texture_dimension: limits.max_texture_dimension_2d,
        }
    }

    pub fn is_software(&self) -> bool {
        self.software
    }

    pub fn description(&self) -> String {
        format!("{} ({})", self.name, self.backend)
    }
}
