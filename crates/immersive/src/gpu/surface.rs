use std::sync::Arc;

use winit::window::Window;

use super::context::GpuContext;
use super::device::WgpuDevice;
use super::{DeviceFactory, GpuDevice, InitError, RenderSurface};

/// A winit window the background renders into.
#[derive(Clone)]
pub struct WindowSurface {
    window: Arc<Window>,
}

impl WindowSurface {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }
}

impl RenderSurface for WindowSurface {
    fn physical_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }
}

impl DeviceFactory for WindowSurface {
    fn create_device(&self) -> Result<Box<dyn GpuDevice>, InitError> {
        let context = GpuContext::new(Arc::clone(&self.window))
            .map_err(|err| InitError::NoContext(format!("{err:#}")))?;
        Ok(Box::new(WgpuDevice::new(context)))
    }
}
