use bytemuck::{Pod, Zeroable};

use super::{DrawLayer, FramePass};

/// Mirror of the `Ambient` block in the WGSL prelude.
///
/// Trailing padding keeps the struct a multiple of 16 bytes; WGSL declares it
/// as three scalar floats because a `vec3` would be 16-byte aligned.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub(crate) struct AmbientUniforms {
    pub resolution: [f32; 2],
    pub texture_size: [f32; 2],
    pub time: f32,
    pub intensity: f32,
    pub opacity: f32,
    pub overlay: f32,
    pub overlay_fill: f32,
    pub _pad0: f32,
    pub _pad1: f32,
    pub _pad2: f32,
}

impl AmbientUniforms {
    pub fn for_layer(pass: &FramePass, layer: &DrawLayer, surface: (u32, u32)) -> Self {
        let (overlay, overlay_fill) = match pass.overlay {
            Some(fill) => (1.0, fill.clamp(0.0, 1.0)),
            None => (0.0, 0.0),
        };
        Self {
            resolution: [surface.0.max(1) as f32, surface.1.max(1) as f32],
            texture_size: [
                layer.texture_size[0].max(1) as f32,
                layer.texture_size[1].max(1) as f32,
            ],
            time: pass.time,
            intensity: pass.motion_intensity.clamp(0.0, 1.0),
            opacity: layer.opacity.clamp(0.0, 1.0),
            overlay,
            overlay_fill,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GeometryId, ProgramId, TextureId, CLEAR_COLOR};

    #[test]
    fn layout_matches_wgsl_block() {
        assert_eq!(std::mem::size_of::<AmbientUniforms>(), 48);
        assert_eq!(std::mem::size_of::<AmbientUniforms>() % 16, 0);
    }

    #[test]
    fn hidden_overlay_zeroes_fill() {
        let layer = DrawLayer {
            texture: TextureId(3),
            texture_size: [0, 256],
            opacity: 1.4,
        };
        let pass = FramePass {
            program: ProgramId(1),
            geometry: GeometryId(2),
            clear_color: CLEAR_COLOR,
            layers: vec![layer],
            time: 2.5,
            motion_intensity: 0.5,
            overlay: None,
        };
        let uniforms = AmbientUniforms::for_layer(&pass, &layer, (1920, 1080));
        assert_eq!(uniforms.overlay, 0.0);
        assert_eq!(uniforms.overlay_fill, 0.0);
        assert_eq!(uniforms.opacity, 1.0);
        assert_eq!(uniforms.texture_size, [1.0, 256.0]);
        assert_eq!(uniforms.resolution, [1920.0, 1080.0]);
    }
}
