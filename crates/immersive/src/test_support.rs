//! Recording fakes for the device, surface, fetcher and hardware probe.

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::rc::Rc;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use image::{ImageBuffer, ImageFormat, Rgba};

use crate::decode::TextureImage;
use crate::gate::{CapabilityGate, HardwareProbe};
use crate::gpu::{
    DeviceFactory, FrameError, FramePass, GeometryId, GpuDevice, InitError, ProgramId,
    RenderSurface,
    ShaderStage, TextureError, TextureId,
};
use crate::loader::{FetchError, ImageFetcher};
use crate::types::AdapterProfile;

pub(crate) fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let buffer = ImageBuffer::from_pixel(width, height, Rgba(rgba));
    let mut bytes = Vec::new();
    buffer
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// Everything the fake devices did, shared with the test.
#[derive(Debug, Default)]
pub(crate) struct DeviceLog {
    pub devices_created: usize,
    pub devices_dropped: usize,
    /// texture handle -> (device serial, label)
    pub live_textures: BTreeMap<u64, (usize, String)>,
    pub created_textures: Vec<String>,
    pub released_textures: Vec<String>,
    /// handle -> device serial
    pub live_programs: BTreeMap<u64, usize>,
    pub live_geometries: BTreeMap<u64, usize>,
    /// Every release call in order: `texture:<label>`, `geometry`, `program`,
    /// and `device` when a device is dropped.
    pub releases: Vec<String>,
    /// Objects a device still owned when it was dropped.
    pub abandoned: usize,
    /// One entry per draw: (label, opacity) per layer.
    pub draws: Vec<Vec<(String, f32)>>,
    pub resizes: Vec<(u32, u32)>,
    pub device_lost: bool,
    next_handle: u64,
}

impl DeviceLog {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Label of the topmost layer of every draw, in order.
    pub fn bound_sources(&self) -> Vec<String> {
        self.draws
            .iter()
            .filter_map(|layers| layers.last().map(|(label, _)| label.clone()))
            .collect()
    }
}

pub(crate) struct FakeSurface {
    log: Rc<RefCell<DeviceLog>>,
    size: Cell<(u32, u32)>,
    fail_context: Cell<bool>,
    fail_program: Cell<bool>,
    fail_quad: Cell<bool>,
    software: Cell<bool>,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(DeviceLog::default())),
            size: Cell::new((800, 600)),
            fail_context: Cell::new(false),
            fail_program: Cell::new(false),
            fail_quad: Cell::new(false),
            software: Cell::new(false),
        }
    }

    pub fn log(&self) -> Ref<'_, DeviceLog> {
        self.log.borrow()
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.size.set((width, height));
    }

    pub fn fail_context(&self, fail: bool) {
        self.fail_context.set(fail);
    }

    pub fn fail_program(&self, fail: bool) {
        self.fail_program.set(fail);
    }

    pub fn fail_quad(&self, fail: bool) {
        self.fail_quad.set(fail);
    }

    pub fn software(&self, software: bool) {
        self.software.set(software);
    }

    /// Makes the live device report loss from now on.
    pub fn lose_device(&self) {
        self.log.borrow_mut().device_lost = true;
    }
}

impl RenderSurface for FakeSurface {
    fn physical_size(&self) -> (u32, u32) {
        self.size.get()
    }
}

impl DeviceFactory for FakeSurface {
    fn create_device(&self) -> Result<Box<dyn GpuDevice>, InitError> {
        if self.fail_context.get() {
            return Err(InitError::NoContext("fake surface refused".into()));
        }
        let serial = {
            let mut log = self.log.borrow_mut();
            log.devices_created += 1;
            log.device_lost = false;
            log.devices_created
        };
        let software = self.software.get();
        Ok(Box::new(FakeDevice {
            log: Rc::clone(&self.log),
            serial,
            size: self.size.get(),
            adapter: AdapterProfile {
                name: if software { "llvmpipe" } else { "Fake GPU" }.to_string(),
                backend: "Fake".to_string(),
                software,
                max_texture_dimension: 4096,
            },
            fail_program: self.fail_program.get(),
            fail_quad: self.fail_quad.get(),
        }))
    }
}

struct FakeDevice {
    log: Rc<RefCell<DeviceLog>>,
    serial: usize,
    size: (u32, u32),
    adapter: AdapterProfile,
    fail_program: bool,
    fail_quad: bool,
}

impl GpuDevice for FakeDevice {
    fn adapter(&self) -> &AdapterProfile {
        &self.adapter
    }

    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.log.borrow_mut().resizes.push((width, height));
    }

    fn create_program(&mut self) -> Result<ProgramId, InitError> {
        if self.fail_program {
            return Err(InitError::ShaderCompile(
                ShaderStage::Fragment,
                "fake compile error".into(),
            ));
        }
        let mut log = self.log.borrow_mut();
        let handle = log.handle();
        log.live_programs.insert(handle, self.serial);
        Ok(ProgramId(handle))
    }

    fn create_quad(&mut self) -> Result<GeometryId, InitError> {
        if self.fail_quad {
            return Err(InitError::Allocation("fake quad".into()));
        }
        let mut log = self.log.borrow_mut();
        let handle = log.handle();
        log.live_geometries.insert(handle, self.serial);
        Ok(GeometryId(handle))
    }

    fn create_texture(
        &mut self,
        image: &TextureImage,
        label: &str,
    ) -> Result<TextureId, TextureError> {
        if image.pixels.len() != image.byte_len() {
            return Err(TextureError::SizeMismatch {
                expected: image.byte_len(),
                actual: image.pixels.len(),
            });
        }
        let mut log = self.log.borrow_mut();
        let handle = log.handle();
        log.live_textures
            .insert(handle, (self.serial, label.to_string()));
        log.created_textures.push(label.to_string());
        Ok(TextureId(handle))
    }

    fn release_texture(&mut self, id: TextureId) {
        let mut log = self.log.borrow_mut();
        if let Some((_, label)) = log.live_textures.remove(&id.raw()) {
            log.releases.push(format!("texture:{label}"));
            log.released_textures.push(label);
        }
    }

    fn release_geometry(&mut self, id: GeometryId) {
        let mut log = self.log.borrow_mut();
        if log.live_geometries.remove(&id.raw()).is_some() {
            log.releases.push("geometry".to_string());
        }
    }

    fn release_program(&mut self, id: ProgramId) {
        let mut log = self.log.borrow_mut();
        if log.live_programs.remove(&id.raw()).is_some() {
            log.releases.push("program".to_string());
        }
    }

    fn draw(&mut self, pass: &FramePass) -> Result<(), FrameError> {
        let mut log = self.log.borrow_mut();
        if log.device_lost {
            return Err(FrameError::Lost);
        }
        let layers = pass
            .layers
            .iter()
            .map(|layer| {
                let label = log
                    .live_textures
                    .get(&layer.texture.raw())
                    .map(|(_, label)| label.clone())
                    .unwrap_or_else(|| "<released>".to_string());
                (label, layer.opacity)
            })
            .collect();
        log.draws.push(layers);
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.log.borrow().device_lost
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        // Whatever the device still owned goes with it; no release calls are
        // recorded for those objects.
        let mut log = self.log.borrow_mut();
        let serial = self.serial;
        let before =
            log.live_textures.len() + log.live_programs.len() + log.live_geometries.len();
        log.live_textures.retain(|_, (owner, _)| *owner != serial);
        log.live_programs.retain(|_, owner| *owner != serial);
        log.live_geometries.retain(|_, owner| *owner != serial);
        let after =
            log.live_textures.len() + log.live_programs.len() + log.live_geometries.len();
        log.abandoned += before - after;
        log.devices_dropped += 1;
        log.releases.push("device".to_string());
    }
}

/// A fetch parked inside [`FakeFetcher::fetch`] until released or dropped.
pub(crate) struct HeldFetch {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl HeldFetch {
    /// Blocks until the worker is inside the fetch for this id.
    pub fn wait_until_fetching(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("fetch never started");
    }

    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Serves solid-colour PNGs; selected ids can be held until released.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    gates: Mutex<HashMap<String, Gate>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub const MISSING: &'static str = "missing";
    pub const CORRUPT: &'static str = "corrupt";

    pub fn new() -> Self {
        Self::default()
    }

    /// Parks the next fetch of `id` until the returned handle releases it.
    pub fn hold(&self, id: &str) -> HeldFetch {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        self.gates.lock().expect("gates lock").insert(
            id.to_string(),
            Gate {
                entered: entered_tx,
                release: release_rx,
            },
        );
        HeldFetch {
            entered: entered_rx,
            release: release_tx,
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().expect("fetched lock").clone()
    }
}

impl ImageFetcher for FakeFetcher {
    fn fetch(&self, id: &str) -> Result<Vec<u8>, FetchError> {
        let gate = self.gates.lock().expect("gates lock").remove(id);
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        self.fetched
            .lock()
            .expect("fetched lock")
            .push(id.to_string());
        match id {
            Self::MISSING => Err(FetchError::NotFound(id.to_string())),
            Self::CORRUPT => Ok(b"not an image".to_vec()),
            _ => {
                let shade = id.bytes().fold(0u8, |acc, byte| acc.wrapping_add(byte));
                Ok(png_bytes(8, 8, [shade, 64, 128, 255]))
            }
        }
    }
}

pub(crate) struct StaticProbe {
    available: bool,
    calls: Rc<Cell<usize>>,
}

impl StaticProbe {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            calls: Rc::new(Cell::new(0)),
        }
    }

    pub fn calls(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.calls)
    }
}

impl HardwareProbe for StaticProbe {
    fn has_adapter(&self) -> bool {
        self.calls.set(self.calls.get() + 1);
        self.available
    }
}

pub(crate) fn open_gate() -> CapabilityGate {
    CapabilityGate::with_probe(true, Box::new(StaticProbe::new(true)))
}
