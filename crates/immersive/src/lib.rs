//! Ambient GPU background renderer.
//!
//! Renders a blurred, slowly drifting copy of the current artwork behind a
//! host UI, and steps aside cleanly whenever acceleration is unavailable or
//! the GPU context is revoked. The host drives everything from its UI thread
//! through [`Immersive`]:
//!
//! 1. `init(surface)` consults the [`CapabilityGate`] (build flag, persisted
//!    `immersive.enabled`, hardware probe) before the surface is touched.
//! 2. `set_source_image(id)` starts a cancellable fetch + decode + blur on a
//!    worker thread; only the most recent request is ever uploaded.
//! 3. `poll_loads()` swaps finished textures in, `render_frame(now)` draws
//!    when the frame scheduler says a frame is due.
//! 4. `on_context_lost()` / `on_context_restored(surface)` bracket a loss;
//!    `destroy()` releases everything and may be called any number of times.
//!
//! [`Immersive::state`] projects the whole lifecycle onto a small read-only
//! [`ImmersiveState`]; wgpu types never cross the public API.

mod decode;
mod facade;
mod gate;
mod gpu;
mod loader;
mod manager;
mod scheduler;
mod types;

#[cfg(test)]
mod test_support;

pub use facade::Immersive;
pub use gate::{CapabilityGate, GateVerdict, HardwareProbe, WgpuProbe, BUILD_ENABLED};
pub use gpu::{RenderSurface, WindowSurface};
pub use immersive_config::{ConfigPatch, ImmersiveConfig};
pub use loader::{FetchError, FileFetcher, ImageFetcher};
pub use scheduler::SOFTWARE_FPS_CAP;
pub use types::{Backend, ImmersiveState, Metrics, UnavailableReason};
