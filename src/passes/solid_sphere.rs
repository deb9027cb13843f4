//! Instanced sphere impostors.
//!
//! Every particle is drawn as one camera-facing quad (four vertex triangle
//! strip) shaded as a sphere. The fragment unit carries only the shading; the
//! output stage is a prepended variant chosen by [`SphereTargets`], so the
//! same base units serve the screen, a depth-only prepass and a G-buffer
//! style pass.

use glam::{Vec2, Vec4};

use crate::device::{BufferHandle, ClearRequest, DepthState, DrawMode, TextureHandle, Viewport};
use crate::error::ShaderError;
use crate::framebuffer::{FramebufferBinding, FramebufferTargetSet};
use crate::pass::RenderPass;
use crate::program::ShaderProgram;
use crate::shader::ShaderRegistry;
use crate::uniforms::{MvpProviders, UniformBindingSet, ValueProvider};
use crate::vertex::{VertexArrayLayout, VertexAttribute};

pub const VERTEX_SHADER: &str = "solid_sphere.vert.wgsl";
pub const FRAGMENT_SHADER: &str = "solid_sphere.frag.wgsl";

/// Corners of the unit quad, in triangle strip order.
pub const QUAD_VERTICES: [Vec2; 4] = [
    Vec2::new(-1.0, -1.0),
    Vec2::new(1.0, -1.0),
    Vec2::new(-1.0, 1.0),
    Vec2::new(1.0, 1.0),
];

/// Shaded color to `@location(0)`.
pub const SCREEN_OUTPUT: &str = r#"
@fragment
fn fs_main(in: SphereVarying) -> @location(0) vec4<f32> {
    let sample = sphere_sample(in);
    return vec4<f32>(sample.color, 1.0);
}
"#;

/// No color output; only the sphere silhouette reaches the depth target.
pub const DEPTH_ONLY_OUTPUT: &str = r#"
@fragment
fn fs_main(in: SphereVarying) {
    let sample = sphere_sample(in);
}
"#;

/// Normal + view depth to `@location(0)`, color to `@location(1)`.
pub const NORMAL_DEPTH_COLOR_OUTPUT: &str = r#"
struct SphereOutputs {
    @location(0) normal_depth: vec4<f32>,
    @location(1) color: vec4<f32>,
};

@fragment
fn fs_main(in: SphereVarying) -> SphereOutputs {
    let sample = sphere_sample(in);
    var out: SphereOutputs;
    out.normal_depth = vec4<f32>(sample.normal, in.clip_position.z);
    out.color = vec4<f32>(sample.color, 1.0);
    return out;
}
"#;

/// Where a sphere pass renders to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SphereTargets {
    /// The device's default color and depth targets.
    Screen,
    /// Depth texture only.
    DepthOnly { depth: TextureHandle },
    /// Depth texture plus normal/depth and color textures.
    NormalDepthColor {
        normal_depth: TextureHandle,
        color: TextureHandle,
        depth: TextureHandle,
    },
}

impl SphereTargets {
    fn output(&self) -> (&'static str, &'static str) {
        match self {
            SphereTargets::Screen => (SCREEN_OUTPUT, "screen"),
            SphereTargets::DepthOnly { .. } => (DEPTH_ONLY_OUTPUT, "depth_only"),
            SphereTargets::NormalDepthColor { .. } => (NORMAL_DEPTH_COLOR_OUTPUT, "normal_depth_color"),
        }
    }

    fn framebuffer(&self) -> FramebufferTargetSet {
        match *self {
            SphereTargets::Screen => FramebufferTargetSet::screen(),
            SphereTargets::DepthOnly { depth } => {
                FramebufferTargetSet::new(vec![FramebufferBinding::depth(depth)])
            }
            SphereTargets::NormalDepthColor {
                normal_depth,
                color,
                depth,
            } => FramebufferTargetSet::new(vec![
                FramebufferBinding::depth(depth),
                FramebufferBinding::color(0, normal_depth),
                FramebufferBinding::color(1, color),
            ]),
        }
    }

    fn clear(&self) -> ClearRequest {
        match self {
            SphereTargets::DepthOnly { .. } => ClearRequest {
                color: None,
                depth: Some(1.0),
            },
            _ => ClearRequest::color_and_depth(Vec4::ZERO),
        }
    }
}

/// Per-particle buffers read by the pass, each holding one `Vec4` per particle.
#[derive(Clone, Copy, Debug)]
pub struct SphereBuffers {
    pub position: BufferHandle,
    pub color: BufferHandle,
    pub dimension: BufferHandle,
    /// [`QUAD_VERTICES`] uploaded as `Vec2`s.
    pub quad: BufferHandle,
}

/// Values re-read on every activation.
#[derive(Clone, Debug)]
pub struct SphereParameters {
    pub viewport: ValueProvider<Vec2>,
    pub particle_count: ValueProvider<u32>,
    pub particle_scale: ValueProvider<f32>,
    pub mvp: MvpProviders,
}

/// Build a solid sphere pass.
///
/// `seed_uniforms` are copied into the pass before its own bindings, so
/// callers can share uniforms between passes.
pub fn solid_sphere(
    shaders: &mut ShaderRegistry,
    targets: SphereTargets,
    buffers: SphereBuffers,
    params: SphereParameters,
    seed_uniforms: Option<&UniformBindingSet>,
) -> Result<RenderPass, ShaderError> {
    let vertex = shaders.load(VERTEX_SHADER)?;
    let fragment = shaders.load(FRAGMENT_SHADER)?;
    let (output, modifier) = targets.output();
    let fragment = shaders.prepend_text(&fragment, output, Some(modifier));

    let mut uniforms = seed_uniforms
        .map(UniformBindingSet::from_set)
        .unwrap_or_default();
    uniforms
        .set_provider("viewport_size", params.viewport.clone())
        .set_provider("particle_scale_factor", params.particle_scale.clone())
        .set_mvp("", &params.mvp);

    let layout = VertexArrayLayout::new(vec![
        VertexAttribute::new("vertex_pos", buffers.quad, 2),
        VertexAttribute::new("sprite_pos", buffers.position, 3)
            .with_stride(16)
            .with_divisor(1),
        VertexAttribute::new("sprite_color", buffers.color, 3)
            .with_stride(16)
            .with_divisor(1),
        VertexAttribute::new("sprite_dimensions", buffers.dimension, 3)
            .with_stride(16)
            .with_divisor(1),
    ]);

    let viewport = params.viewport;
    let count = params.particle_count;
    let clear = targets.clear();
    let pass = RenderPass::new(
        format!("solid_sphere+{}", modifier),
        ShaderProgram::new(format!("solid_sphere+{}", modifier), vec![vertex, fragment]),
    )
    .with_uniforms(uniforms)
    .with_vertex_layout(layout)
    .with_targets(targets.framebuffer())
    .with_render(move |device| {
        device.clear(clear);
        device.set_depth_state(DepthState::OPAQUE);
        device.set_blend(false);
        let size = viewport.value();
        device.set_viewport(Viewport::new(size.x, size.y));
        device.draw_arrays_instanced(DrawMode::TriangleStrip, 0, 4, count.value())
    });
    Ok(pass)
}
