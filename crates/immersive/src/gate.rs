//! Decides whether the accelerated background may run at all.

use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use immersive_config::{load_enabled, PreferenceStore};

use crate::types::UnavailableReason;

/// Whether this build was compiled with the `accelerated` feature.
pub const BUILD_ENABLED: bool = cfg!(feature = "accelerated");

/// Outcome of [`CapabilityGate::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateVerdict {
    pub available: bool,
    /// Set iff `available` is false.
    pub reason: Option<UnavailableReason>,
}

impl GateVerdict {
    fn pass() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    fn fail(reason: UnavailableReason) -> Self {
        Self {
            available: false,
            reason: Some(reason),
        }
    }
}

/// Answers whether a GPU adapter can be obtained on this machine.
pub trait HardwareProbe {
    fn has_adapter(&self) -> bool;
}

/// Probes wgpu for any adapter once per process lifetime of the probe.
#[derive(Debug, Default)]
pub struct WgpuProbe {
    cached: OnceLock<bool>,
}

impl HardwareProbe for WgpuProbe {
    fn has_adapter(&self) -> bool {
        *self.cached.get_or_init(|| {
            // Some backends panic instead of failing when no display is present.
            match panic::catch_unwind(AssertUnwindSafe(probe_wgpu_adapter)) {
                Ok(found) => found,
                Err(_) => {
                    tracing::warn!("GPU probe panicked; treating acceleration as unavailable");
                    false
                }
            }
        })
    }
}

fn probe_wgpu_adapter() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    });
    match pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::LowPower,
        compatible_surface: None,
        force_fallback_adapter: false,
    })) {
        Ok(adapter) => {
            let info = adapter.get_info();
            tracing::debug!(adapter = %info.name, backend = ?info.backend, "GPU probe found adapter");
            true
        }
        Err(err) => {
            tracing::debug!(error = %err, "GPU probe found no adapter");
            false
        }
    }
}

/// Build flag, then the persisted preference, then the hardware probe.
pub struct CapabilityGate {
    build_enabled: bool,
    probe: Box<dyn HardwareProbe>,
}

impl Default for CapabilityGate {
    fn default() -> Self {
        Self::with_probe(BUILD_ENABLED, Box::new(WgpuProbe::default()))
    }
}

impl CapabilityGate {
    pub fn with_probe(build_enabled: bool, probe: Box<dyn HardwareProbe>) -> Self {
        Self {
            build_enabled,
            probe,
        }
    }

    /// Evaluates the three checks in order; the first failing one wins and
    /// later checks are not run.
    pub fn evaluate(&self, store: &dyn PreferenceStore) -> GateVerdict {
        if !self.build_enabled {
            return GateVerdict::fail(UnavailableReason::BuildDisabled);
        }
        if !load_enabled(store) {
            return GateVerdict::fail(UnavailableReason::RuntimeDisabled);
        }
        if !self.probe.has_adapter() {
            return GateVerdict::fail(UnavailableReason::NoAcceleration);
        }
        GateVerdict::pass()
    }
}
