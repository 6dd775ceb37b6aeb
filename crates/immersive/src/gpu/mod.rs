//! GPU plumbing behind a handle-based device trait.
//!
//! The manager and the facade only ever talk to [`RenderSurface`] and
//! [`GpuDevice`]; wgpu types stay inside this module tree. Only
//! `RenderSurface` and `WindowSurface` leave the crate, and the device side
//! of a surface lives in [`DeviceFactory`], which outside code cannot name,
//! so hosts can neither implement a surface nor reach a device.
//! - `context` owns the wgpu instance/adapter/device/surface wiring and the
//!   device-lost flag.
//! - `compile` builds the WGSL stages inside validation error scopes so
//!   compile and link failures come back as values instead of panics.
//! - `pipeline` holds the quad geometry and the single render pipeline.
//! - `uniforms` mirrors the WGSL uniform block.
//! - `timeline` drives the optional crossfade between two textures.
//! - `device` implements [`GpuDevice`] on top of the context.
//! - `surface` adapts a winit window into a [`RenderSurface`].

mod compile;
mod context;
mod device;
mod pipeline;
mod surface;
pub(crate) mod timeline;
mod uniforms;

use std::fmt;

use crate::decode::TextureImage;
use crate::types::AdapterProfile;

pub use surface::WindowSurface;

/// Colour the surface is cleared to before the artwork is drawn.
pub const CLEAR_COLOR: [f64; 4] = [0.02, 0.02, 0.03, 1.0];

macro_rules! handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

handle!(ProgramId);
handle!(GeometryId);
handle!(TextureId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Link,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Link => "link",
        })
    }
}

/// Failure while building the device or the objects every frame needs.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("no rendering context could be obtained: {0}")]
    NoContext(String),
    #[error("{0} shader failed to compile: {1}")]
    ShaderCompile(ShaderStage, String),
    #[error("failed to allocate {0}")]
    Allocation(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("texture {width}x{height} exceeds the device limit of {limit}")]
    TooLarge { width: u32, height: u32, limit: u32 },
    #[error("texture data is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("texture upload rejected: {0}")]
    Upload(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The device is gone; nothing more can be drawn until a restore.
    #[error("rendering context lost")]
    Lost,
    /// This frame could not be produced but the device is healthy.
    #[error("frame skipped")]
    Skipped,
}

/// One full-surface draw of a texture at the given opacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawLayer {
    pub texture: TextureId,
    pub texture_size: [u32; 2],
    pub opacity: f32,
}

/// Everything a device needs to produce one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePass {
    pub program: ProgramId,
    pub geometry: GeometryId,
    pub clear_color: [f64; 4],
    pub layers: Vec<DrawLayer>,
    pub time: f32,
    pub motion_intensity: f32,
    /// Fill of the frame-rate bar in `0..=1`; `None` hides it.
    pub overlay: Option<f32>,
}

/// Host-owned drawing surface the background renders into.
pub trait RenderSurface: DeviceFactory {
    /// Current size of the backing store in physical pixels.
    fn physical_size(&self) -> (u32, u32);
}

/// Produces the device behind a [`RenderSurface`].
pub trait DeviceFactory {
    fn create_device(&self) -> Result<Box<dyn GpuDevice>, InitError>;
}

/// Handle-based view of a GPU device.
///
/// Release calls on unknown handles are ignored.
pub trait GpuDevice {
    fn adapter(&self) -> &AdapterProfile;
    fn surface_size(&self) -> (u32, u32);
    fn resize(&mut self, width: u32, height: u32);
    fn create_program(&mut self) -> Result<ProgramId, InitError>;
    fn create_quad(&mut self) -> Result<GeometryId, InitError>;
    fn create_texture(
        &mut self,
        image: &TextureImage,
        label: &str,
    ) -> Result<TextureId, TextureError>;
    fn release_texture(&mut self, id: TextureId);
    fn release_geometry(&mut self, id: GeometryId);
    fn release_program(&mut self, id: ProgramId);
    fn draw(&mut self, pass: &FramePass) -> Result<(), FrameError>;
    fn is_lost(&self) -> bool;
}
