use std::borrow::Cow;

use super::{InitError, ShaderStage};

/// Compiles the quad vertex stage.
pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> Result<wgpu::ShaderModule, InitError> {
    compile_stage(device, ShaderStage::Vertex, "ambient vertex", wrap(VERTEX_BODY))
}

/// Compiles the artwork fragment stage (cover fit, drift, vignette, dither, overlay).
pub(crate) fn compile_fragment_shader(
    device: &wgpu::Device,
) -> Result<wgpu::ShaderModule, InitError> {
    compile_stage(device, ShaderStage::Fragment, "ambient fragment", wrap(FRAGMENT_BODY))
}

/// Runs `build` inside a validation scope and reports any error against `stage`.
pub(crate) fn scoped<T>(
    device: &wgpu::Device,
    stage: ShaderStage,
    build: impl FnOnce() -> T,
) -> Result<T, InitError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(value),
        Some(error) => Err(InitError::ShaderCompile(stage, error.to_string())),
    }
}

fn compile_stage(
    device: &wgpu::Device,
    stage: ShaderStage,
    label: &str,
    source: String,
) -> Result<wgpu::ShaderModule, InitError> {
    let module = scoped(device, stage, || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        })
    })?;
    tracing::debug!(%stage, "compiled shader stage");
    Ok(module)
}

fn wrap(body: &str) -> String {
    format!("{PRELUDE}\n{body}")
}

/// Declarations shared by both stages. The uniform block must match
/// `AmbientUniforms`.
const PRELUDE: &str = r"
struct Ambient {
    resolution: vec2<f32>,
    texture_size: vec2<f32>,
    time: f32,
    intensity: f32,
    opacity: f32,
    overlay: f32,
    overlay_fill: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var<uniform> ambient: Ambient;
@group(1) @binding(0) var artwork: texture_2d<f32>;
@group(1) @binding(1) var artwork_sampler: sampler;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};
";

const VERTEX_BODY: &str = r"
@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}
";

const FRAGMENT_BODY: &str = r"
fn cover_uv(uv: vec2<f32>) -> vec2<f32> {
    let surface_aspect = ambient.resolution.x / max(ambient.resolution.y, 1.0);
    let texture_aspect = ambient.texture_size.x / max(ambient.texture_size.y, 1.0);
    var scale = vec2<f32>(1.0, 1.0);
    if (surface_aspect > texture_aspect) {
        scale.y = texture_aspect / surface_aspect;
    } else {
        scale.x = surface_aspect / texture_aspect;
    }
    return (uv - vec2<f32>(0.5, 0.5)) * scale;
}

fn noise(p: vec2<f32>) -> f32 {
    return fract(sin(dot(p, vec2<f32>(12.9898, 78.233))) * 43758.5453);
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let drift = ambient.intensity;
    let angle = sin(ambient.time * 0.05) * 0.08 * drift;
    let zoom = 1.0 + 0.06 * drift + 0.03 * drift * sin(ambient.time * 0.11);
    let centered = cover_uv(in.uv);
    let c = cos(angle);
    let s = sin(angle);
    let rotated = vec2<f32>(c * centered.x - s * centered.y, s * centered.x + c * centered.y);
    let uv = clamp(rotated / zoom + vec2<f32>(0.5, 0.5), vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 1.0));
    var color = textureSample(artwork, artwork_sampler, uv).rgb;

    let edge = distance(in.uv, vec2<f32>(0.5, 0.5));
    color = color * mix(1.0, 0.55, smoothstep(0.35, 0.85, edge));
    color = color + vec3<f32>((noise(in.position.xy + vec2<f32>(ambient.time, ambient.time)) - 0.5) / 255.0);

    if (ambient.overlay > 0.5 && in.uv.y < 0.012 && in.uv.x < ambient.overlay_fill) {
        color = vec3<f32>(0.2, 0.9, 0.4);
    }
    return vec4<f32>(color, ambient.opacity);
}
";
