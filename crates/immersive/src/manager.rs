//! Owns the device and every GPU object the background draws with.
//!
//! `Uninitialized --create--> Ready --lose--> Lost --restore--> Ready`, and
//! `destroy` returns to `Uninitialized` from anywhere. Calls that make no
//! sense in the current phase are logged at debug level and ignored.

use std::time::{Duration, Instant};

use crate::decode::TextureImage;
use crate::gpu::timeline::FadeEnvelope;
use crate::gpu::{
    DeviceFactory, DrawLayer, FrameError, FramePass, GeometryId, GpuDevice, InitError, ProgramId,
    RenderSurface, TextureError, TextureId, CLEAR_COLOR,
};
use crate::types::AdapterProfile;

const PLACEHOLDER_LABEL: &str = "placeholder";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Uninitialized,
    Ready,
    Lost,
}

#[derive(Debug)]
struct TextureRecord {
    id: TextureId,
    size: [u32; 2],
    bytes: u64,
    label: String,
}

impl TextureRecord {
    fn new(id: TextureId, image: &TextureImage, label: &str) -> Self {
        Self {
            id,
            size: [image.width, image.height],
            bytes: image.byte_len() as u64,
            label: label.to_string(),
        }
    }

    fn layer(&self, opacity: f32) -> DrawLayer {
        DrawLayer {
            texture: self.id,
            texture_size: self.size,
            opacity,
        }
    }
}

#[derive(Debug)]
struct Outgoing {
    record: TextureRecord,
    fade: FadeEnvelope,
}

/// GPU objects that exist together or not at all.
#[derive(Debug)]
struct RenderResources {
    program: ProgramId,
    geometry: GeometryId,
    placeholder: TextureRecord,
    current: Option<TextureRecord>,
    outgoing: Option<Outgoing>,
}

impl RenderResources {
    fn textures(&self) -> impl Iterator<Item = &TextureRecord> {
        std::iter::once(&self.placeholder)
            .chain(self.current.as_ref())
            .chain(self.outgoing.as_ref().map(|outgoing| &outgoing.record))
    }
}

struct Live {
    device: Box<dyn GpuDevice>,
    resources: RenderResources,
}

impl Live {
    fn build(surface: &dyn RenderSurface) -> Result<Self, InitError> {
        let mut device = surface.create_device()?;
        let program = device.create_program()?;
        let geometry = match device.create_quad() {
            Ok(geometry) => geometry,
            Err(err) => {
                device.release_program(program);
                return Err(err);
            }
        };
        let image = TextureImage::placeholder();
        let placeholder = match device.create_texture(&image, PLACEHOLDER_LABEL) {
            Ok(id) => TextureRecord::new(id, &image, PLACEHOLDER_LABEL),
            Err(err) => {
                device.release_geometry(geometry);
                device.release_program(program);
                return Err(InitError::Allocation(format!("placeholder texture: {err}")));
            }
        };
        tracing::debug!(
            adapter = %device.adapter().description(),
            "render resources created"
        );
        Ok(Self {
            device,
            resources: RenderResources {
                program,
                geometry,
                placeholder,
                current: None,
                outgoing: None,
            },
        })
    }

    fn release_all(mut self) {
        let resources = self.resources;
        if let Some(outgoing) = resources.outgoing {
            self.device.release_texture(outgoing.record.id);
        }
        if let Some(current) = resources.current {
            self.device.release_texture(current.id);
        }
        self.device.release_texture(resources.placeholder.id);
        self.device.release_geometry(resources.geometry);
        self.device.release_program(resources.program);
    }
}

enum Lifecycle {
    Uninitialized,
    Ready(Live),
    Lost,
}

/// Per-frame values supplied by the facade.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameInputs {
    pub now: Instant,
    pub time: f32,
    pub motion_intensity: f32,
    pub overlay: Option<f32>,
}

pub(crate) struct ContextManager {
    lifecycle: Lifecycle,
    crossfade: Duration,
}

impl ContextManager {
    pub fn new(crossfade: Duration) -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            crossfade,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.lifecycle {
            Lifecycle::Uninitialized => Phase::Uninitialized,
            Lifecycle::Ready(_) => Phase::Ready,
            Lifecycle::Lost => Phase::Lost,
        }
    }

    pub fn set_crossfade(&mut self, crossfade: Duration) {
        self.crossfade = crossfade;
    }

    /// Builds the device and resources. Anything created before a failure is
    /// released again, so an error leaves nothing behind.
    pub fn create(&mut self, surface: &dyn RenderSurface) -> Result<(), InitError> {
        match self.lifecycle {
            Lifecycle::Uninitialized => {
                self.lifecycle = Lifecycle::Ready(Live::build(surface)?);
                Ok(())
            }
            Lifecycle::Ready(_) => {
                tracing::debug!("create ignored: resources already exist");
                Ok(())
            }
            Lifecycle::Lost => {
                tracing::debug!("create ignored: context is lost, waiting for restore");
                Ok(())
            }
        }
    }

    /// Releases textures, geometry and program, then drops the device.
    pub fn destroy(&mut self) {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Uninitialized) {
            Lifecycle::Ready(live) => {
                live.release_all();
                tracing::debug!("render resources destroyed");
            }
            Lifecycle::Lost => tracing::debug!("discarded lost context"),
            Lifecycle::Uninitialized => tracing::trace!("destroy on uninitialised manager"),
        }
    }

    /// Drops the device without issuing any further GPU calls.
    pub fn lose(&mut self) -> bool {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Lost) {
            Lifecycle::Ready(live) => {
                drop(live);
                true
            }
            Lifecycle::Lost => false,
            Lifecycle::Uninitialized => {
                self.lifecycle = Lifecycle::Uninitialized;
                tracing::debug!("context loss ignored: nothing was created");
                false
            }
        }
    }

    /// Rebuilds after a loss. A failed rebuild stays `Lost` so the host may try again.
    pub fn restore(&mut self, surface: &dyn RenderSurface) -> Result<bool, InitError> {
        if !matches!(self.lifecycle, Lifecycle::Lost) {
            tracing::debug!(phase = ?self.phase(), "restore ignored: context is not lost");
            return Ok(false);
        }
        self.lifecycle = Lifecycle::Ready(Live::build(surface)?);
        Ok(true)
    }

    /// Uploads `image` and makes it the current texture.
    ///
    /// The previous texture is released, or kept as the outgoing layer of a
    /// crossfade when one is configured. Returns `Ok(false)` when not ready.
    pub fn swap_texture(
        &mut self,
        image: &TextureImage,
        label: &str,
        now: Instant,
    ) -> Result<bool, TextureError> {
        let Lifecycle::Ready(live) = &mut self.lifecycle else {
            tracing::debug!(source = label, "texture swap ignored: no live context");
            return Ok(false);
        };
        let id = live.device.create_texture(image, label)?;
        let incoming = TextureRecord::new(id, image, label);
        let resources = &mut live.resources;
        if let Some(previous) = resources.current.replace(incoming) {
            match FadeEnvelope::new(self.crossfade, now) {
                Some(fade) => {
                    if let Some(older) = resources.outgoing.take() {
                        live.device.release_texture(older.record.id);
                    }
                    resources.outgoing = Some(Outgoing {
                        record: previous,
                        fade,
                    });
                }
                None => live.device.release_texture(previous.id),
            }
        }
        tracing::debug!(
            source = label,
            width = image.width,
            height = image.height,
            "swapped background texture"
        );
        Ok(true)
    }

    pub fn render(
        &mut self,
        surface: &dyn RenderSurface,
        inputs: FrameInputs,
    ) -> Result<(), FrameError> {
        let Lifecycle::Ready(live) = &mut self.lifecycle else {
            return Err(FrameError::Skipped);
        };
        if live.device.is_lost() {
            return Err(FrameError::Lost);
        }
        let (width, height) = surface.physical_size();
        if width == 0 || height == 0 {
            return Err(FrameError::Skipped);
        }
        if live.device.surface_size() != (width, height) {
            live.device.resize(width, height);
        }

        let resources = &mut live.resources;
        let fade = resources
            .outgoing
            .as_ref()
            .map(|outgoing| outgoing.fade.progress(inputs.now));
        if let Some((_, true)) = fade {
            if let Some(finished) = resources.outgoing.take() {
                live.device.release_texture(finished.record.id);
                tracing::trace!(source = %finished.record.label, "crossfade finished");
            }
        }

        let base = resources.current.as_ref().unwrap_or(&resources.placeholder);
        let layers = match (&resources.outgoing, fade) {
            (Some(outgoing), Some((opacity, false))) => {
                vec![outgoing.record.layer(1.0), base.layer(opacity)]
            }
            _ => vec![base.layer(1.0)],
        };
        let pass = FramePass {
            program: resources.program,
            geometry: resources.geometry,
            clear_color: CLEAR_COLOR,
            layers,
            time: inputs.time,
            motion_intensity: inputs.motion_intensity,
            overlay: inputs.overlay,
        };
        live.device.draw(&pass)
    }

    pub fn adapter(&self) -> Option<&AdapterProfile> {
        match &self.lifecycle {
            Lifecycle::Ready(live) => Some(live.device.adapter()),
            _ => None,
        }
    }

    pub fn current_source(&self) -> Option<&str> {
        match &self.lifecycle {
            Lifecycle::Ready(live) => live
                .resources
                .current
                .as_ref()
                .map(|record| record.label.as_str()),
            _ => None,
        }
    }

    pub fn resident_textures(&self) -> usize {
        match &self.lifecycle {
            Lifecycle::Ready(live) => live.resources.textures().count(),
            _ => 0,
        }
    }

    /// Texture bytes held on the device; geometry and uniforms are negligible.
    pub fn gpu_memory_bytes(&self) -> u64 {
        match &self.lifecycle {
            Lifecycle::Ready(live) => live.resources.textures().map(|record| record.bytes).sum(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSurface;

    fn image(size: u32) -> TextureImage {
        TextureImage {
            width: size,
            height: size,
            pixels: vec![128; (size * size * 4) as usize],
        }
    }

    fn inputs(now: Instant) -> FrameInputs {
        FrameInputs {
            now,
            time: 0.0,
            motion_intensity: 0.5,
            overlay: None,
        }
    }

    #[test]
    fn create_then_destroy_leaves_nothing_allocated() {
        let surface = FakeSurface::new();
        let mut manager = ContextManager::new(Duration::ZERO);
        manager.create(&surface).expect("create");
        assert_eq!(manager.phase(), Phase::Ready);
        assert_eq!(manager.resident_textures(), 1);
        assert_eq!(surface.log().live_textures.len(), 1);

        manager.swap_texture(&image(4), "a", Instant::now()).unwrap();
        manager.destroy();
        manager.destroy();
        let log = surface.log();
        assert_eq!(
            log.releases,
            ["texture:a", "texture:placeholder", "geometry", "program", "device"]
        );
        assert_eq!(log.abandoned, 0);
        assert!(log.live_textures.is_empty());
        assert!(log.live_programs.is_empty());
        assert!(log.live_geometries.is_empty());
        assert_eq!(manager.phase(), Phase::Uninitialized);
    }

    #[test]
    fn destroy_without_create_is_a_no_op() {
        let mut manager = ContextManager::new(Duration::ZERO);
        manager.destroy();
        assert_eq!(manager.phase(), Phase::Uninitialized);
        assert_eq!(manager.gpu_memory_bytes(), 0);
    }

    #[test]
    fn failed_shader_compile_rolls_back() {
        let surface = FakeSurface::new();
        surface.fail_program(true);
        let mut manager = ContextManager::new(Duration::ZERO);
        let err = manager.create(&surface).unwrap_err();
        assert!(matches!(err, InitError::ShaderCompile(..)));
        assert_eq!(manager.phase(), Phase::Uninitialized);
        let log = surface.log();
        assert!(log.live_programs.is_empty());
        assert!(log.live_textures.is_empty());
        assert_eq!(log.releases, ["device"]);
    }

    #[test]
    fn failed_geometry_releases_program() {
        let surface = FakeSurface::new();
        surface.fail_quad(true);
        let mut manager = ContextManager::new(Duration::ZERO);
        assert!(manager.create(&surface).is_err());
        let log = surface.log();
        assert_eq!(log.releases, ["program", "device"]);
        assert_eq!(log.abandoned, 0);
        assert!(log.live_programs.is_empty());
        assert!(log.live_geometries.is_empty());
    }

    #[test]
    fn missing_context_reports_no_context() {
        let surface = FakeSurface::new();
        surface.fail_context(true);
        let mut manager = ContextManager::new(Duration::ZERO);
        assert!(matches!(
            manager.create(&surface),
            Err(InitError::NoContext(_))
        ));
        assert_eq!(surface.log().devices_created, 0);
    }

    #[test]
    fn swap_keeps_a_single_current_texture() {
        let surface = FakeSurface::new();
        let mut manager = ContextManager::new(Duration::ZERO);
        manager.create(&surface).unwrap();
        for label in ["a", "b", "c"] {
            manager.swap_texture(&image(8), label, Instant::now()).unwrap();
            assert_eq!(manager.resident_textures(), 2);
        }
        assert_eq!(manager.current_source(), Some("c"));
        assert_eq!(manager.gpu_memory_bytes(), 4 + 8 * 8 * 4);
        assert_eq!(surface.log().released_textures, ["a", "b"]);
    }

    #[test]
    fn crossfade_keeps_outgoing_until_finished() {
        let surface = FakeSurface::new();
        let mut manager = ContextManager::new(Duration::from_millis(200));
        manager.create(&surface).unwrap();
        let start = Instant::now();
        manager.swap_texture(&image(4), "a", start).unwrap();
        manager.swap_texture(&image(4), "b", start).unwrap();
        assert_eq!(manager.resident_textures(), 3);

        manager
            .render(&surface, inputs(start + Duration::from_millis(100)))
            .unwrap();
        let layers = surface.log().draws.last().cloned().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].0, "a");
        assert_eq!(layers[1].0, "b");
        assert!(layers[1].1 > 0.0 && layers[1].1 < 1.0);

        manager.swap_texture(&image(4), "c", start).unwrap();
        assert_eq!(manager.resident_textures(), 3);
        assert_eq!(surface.log().released_textures, ["a"]);

        manager
            .render(&surface, inputs(start + Duration::from_millis(500)))
            .unwrap();
        assert_eq!(manager.resident_textures(), 2);
        let layers = surface.log().draws.last().cloned().unwrap();
        assert_eq!(layers, vec![("c".to_string(), 1.0)]);
    }

    #[test]
    fn loss_drops_objects_without_gpu_calls() {
        let surface = FakeSurface::new();
        let mut manager = ContextManager::new(Duration::ZERO);
        manager.create(&surface).unwrap();
        manager.swap_texture(&image(4), "a", Instant::now()).unwrap();
        let released_before = surface.log().released_textures.len();

        assert!(manager.lose());
        assert_eq!(manager.phase(), Phase::Lost);
        assert_eq!(surface.log().released_textures.len(), released_before);
        assert_eq!(surface.log().releases, ["device"]);
        assert_eq!(surface.log().abandoned, 4);
        assert_eq!(
            manager.render(&surface, inputs(Instant::now())),
            Err(FrameError::Skipped)
        );
        assert!(!manager.swap_texture(&image(4), "b", Instant::now()).unwrap());
        assert!(surface.log().draws.is_empty());

        assert!(manager.restore(&surface).unwrap());
        assert_eq!(manager.phase(), Phase::Ready);
        assert_eq!(surface.log().devices_created, 2);
        assert_eq!(manager.current_source(), None);
    }

    #[test]
    fn restore_outside_loss_is_ignored() {
        let surface = FakeSurface::new();
        let mut manager = ContextManager::new(Duration::ZERO);
        assert!(!manager.restore(&surface).unwrap());
        manager.create(&surface).unwrap();
        assert!(!manager.restore(&surface).unwrap());
        assert_eq!(surface.log().devices_created, 1);
    }

    #[test]
    fn failed_restore_stays_lost() {
        let surface = FakeSurface::new();
        let mut manager = ContextManager::new(Duration::ZERO);
        manager.create(&surface).unwrap();
        manager.lose();
        surface.fail_context(true);
        assert!(manager.restore(&surface).is_err());
        assert_eq!(manager.phase(), Phase::Lost);
    }

    #[test]
    fn render_resizes_and_draws_placeholder_first() {
        let surface = FakeSurface::new();
        let mut manager = ContextManager::new(Duration::ZERO);
        manager.create(&surface).unwrap();
        surface.set_size(1280, 720);
        manager.render(&surface, inputs(Instant::now())).unwrap();
        let log = surface.log();
        assert_eq!(log.resizes, [(1280, 720)]);
        assert_eq!(log.draws, [vec![(PLACEHOLDER_LABEL.to_string(), 1.0)]]);
    }

    #[test]
    fn device_reported_loss_surfaces_from_render() {
        let surface = FakeSurface::new();
        let mut manager = ContextManager::new(Duration::ZERO);
        manager.create(&surface).unwrap();
        surface.lose_device();
        assert_eq!(
            manager.render(&surface, inputs(Instant::now())),
            Err(FrameError::Lost)
        );
    }
}
