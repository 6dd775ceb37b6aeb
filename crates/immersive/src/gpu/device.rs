use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::decode::TextureImage;
use crate::types::AdapterProfile;

use super::context::GpuContext;
use super::pipeline::{create_pipeline, create_quad_buffer, PipelineLayouts, QUAD_VERTICES};
use super::uniforms::AmbientUniforms;
use super::{
    FrameError, FramePass, GeometryId, GpuDevice, InitError, ProgramId, TextureError, TextureId,
};

struct GpuTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

/// [`GpuDevice`] backed by a wgpu device rendering into a window surface.
pub(crate) struct WgpuDevice {
    context: GpuContext,
    layouts: PipelineLayouts,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    programs: HashMap<ProgramId, wgpu::RenderPipeline>,
    geometries: HashMap<GeometryId, wgpu::Buffer>,
    textures: HashMap<TextureId, GpuTexture>,
    next_handle: u64,
}

impl WgpuDevice {
    pub(crate) fn new(context: GpuContext) -> Self {
        let layouts = PipelineLayouts::new(&context.device);
        let sampler = context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("artwork sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let uniform_buffer = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("ambient uniforms"),
                contents: bytemuck::bytes_of(&AmbientUniforms::default()),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        let uniform_bind_group = context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("ambient uniform bind group"),
                layout: &layouts.uniform_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                }],
            });
        Self {
            context,
            layouts,
            sampler,
            uniform_buffer,
            uniform_bind_group,
            programs: HashMap::new(),
            geometries: HashMap::new(),
            textures: HashMap::new(),
            next_handle: 1,
        }
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn acquire_frame(&mut self) -> Result<wgpu::SurfaceTexture, FrameError> {
        match self.context.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!("surface outdated; reconfiguring");
                self.context.reconfigure();
                Err(FrameError::Skipped)
            }
            Err(wgpu::SurfaceError::Timeout) => {
                tracing::trace!("surface acquire timed out");
                Err(FrameError::Skipped)
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                tracing::warn!("surface out of memory; treating device as lost");
                self.context.mark_lost();
                Err(FrameError::Lost)
            }
            Err(wgpu::SurfaceError::Other) => {
                tracing::warn!("surface reported an unspecified error; skipping frame");
                Err(FrameError::Skipped)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_layer(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        pipeline: &wgpu::RenderPipeline,
        quad: &wgpu::Buffer,
        texture: Option<&GpuTexture>,
        uniforms: &AmbientUniforms,
        load: wgpu::LoadOp<wgpu::Color>,
    ) {
        // Each layer gets its own uniform values through a staging copy so the
        // second pass of a crossfade does not overwrite the first.
        if texture.is_some() {
            let staging = self
                .context
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("ambient uniform staging"),
                    contents: bytemuck::bytes_of(uniforms),
                    usage: wgpu::BufferUsages::COPY_SRC,
                });
            encoder.copy_buffer_to_buffer(
                &staging,
                0,
                &self.uniform_buffer,
                0,
                std::mem::size_of::<AmbientUniforms>() as u64,
            );
        }
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ambient pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        if let Some(texture) = texture {
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            render_pass.set_bind_group(1, &texture.bind_group, &[]);
            render_pass.set_vertex_buffer(0, quad.slice(..));
            render_pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
        }
    }
}

impl GpuDevice for WgpuDevice {
    fn adapter(&self) -> &AdapterProfile {
        &self.context.adapter_profile
    }

    fn surface_size(&self) -> (u32, u32) {
        self.context.size()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.context.resize(width, height);
        tracing::debug!(width, height, "resized surface");
    }

    fn create_program(&mut self) -> Result<ProgramId, InitError> {
        let pipeline = create_pipeline(
            &self.context.device,
            &self.layouts,
            self.context.config.format,
        )?;
        let id = ProgramId(self.next_handle());
        self.programs.insert(id, pipeline);
        Ok(id)
    }

    fn create_quad(&mut self) -> Result<GeometryId, InitError> {
        let buffer = create_quad_buffer(&self.context.device);
        let id = GeometryId(self.next_handle());
        self.geometries.insert(id, buffer);
        Ok(id)
    }

    fn create_texture(
        &mut self,
        image: &TextureImage,
        label: &str,
    ) -> Result<TextureId, TextureError> {
        let limit = self.context.adapter_profile.max_texture_dimension;
        if image.width > limit || image.height > limit {
            return Err(TextureError::TooLarge {
                width: image.width,
                height: image.height,
                limit,
            });
        }
        let expected = image.byte_len();
        if image.pixels.len() != expected {
            return Err(TextureError::SizeMismatch {
                expected,
                actual: image.pixels.len(),
            });
        }

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = device.create_texture_with_data(
            &self.context.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: image.width.max(1),
                    height: image.height.max(1),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &image.pixels,
        );
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(error) = validation.or(out_of_memory) {
            return Err(TextureError::Upload(error.to_string()));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.layouts.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let id = TextureId(self.next_handle());
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                bind_group,
            },
        );
        Ok(id)
    }

    fn release_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(&id) {
            texture.texture.destroy();
        }
    }

    fn release_geometry(&mut self, id: GeometryId) {
        if let Some(buffer) = self.geometries.remove(&id) {
            buffer.destroy();
        }
    }

    fn release_program(&mut self, id: ProgramId) {
        self.programs.remove(&id);
    }

    fn draw(&mut self, pass: &FramePass) -> Result<(), FrameError> {
        if self.context.is_lost() {
            return Err(FrameError::Lost);
        }
        let (Some(pipeline), Some(quad)) = (
            self.programs.get(&pass.program).cloned(),
            self.geometries.get(&pass.geometry).cloned(),
        ) else {
            tracing::debug!(?pass.program, ?pass.geometry, "draw with released objects skipped");
            return Err(FrameError::Skipped);
        };

        let frame = self.acquire_frame()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("ambient encoder"),
                });

        let [r, g, b, a] = pass.clear_color;
        let mut load = wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a });
        let surface = self.context.size();
        let mut drawn = false;
        for layer in &pass.layers {
            let Some(texture) = self.textures.get(&layer.texture) else {
                tracing::debug!(texture = layer.texture.raw(), "layer texture missing; skipped");
                continue;
            };
            let uniforms = AmbientUniforms::for_layer(pass, layer, surface);
            self.encode_layer(
                &mut encoder,
                &view,
                &pipeline,
                &quad,
                Some(texture),
                &uniforms,
                load,
            );
            load = wgpu::LoadOp::Load;
            drawn = true;
        }
        if !drawn {
            self.encode_layer(
                &mut encoder,
                &view,
                &pipeline,
                &quad,
                None,
                &AmbientUniforms::default(),
                load,
            );
        }

        self.context.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        if self.context.is_lost() {
            return Err(FrameError::Lost);
        }
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.context.is_lost()
    }
}
