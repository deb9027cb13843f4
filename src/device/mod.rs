//! The graphics device collaborator.
//!
//! Everything above this module issues commands through [`GraphicsDevice`]
//! and never talks to a driver directly. The contract is synchronous
//! request/response: compile and link report their status and log when they
//! return, and draws/dispatches either execute or fail immediately.
//!
//! Two backends ship with the crate:
//! - [`HeadlessDevice`] records every command and compiles WGSL with naga.
//!   It backs the tests and dry runs.
//! - [`WgpuDevice`] renders offscreen through wgpu.

pub mod headless;
pub(crate) mod reflect;
pub mod wgpu_device;

use glam::Vec4;

pub use headless::{DeviceCommand, HeadlessDevice};
pub use wgpu_device::WgpuDevice;

use crate::error::DeviceError;
use crate::framebuffer::FramebufferBinding;
use crate::uniforms::UniformValue;
use crate::vertex::VertexAttribute;

/// Device-side shader object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u32);

/// Device-side program object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

/// Device-side buffer object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Device-side texture, owned by whoever created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Pipeline stage a shader unit compiles for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

impl ShaderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShaderKind::Vertex => "vertex",
            ShaderKind::Fragment => "fragment",
            ShaderKind::Geometry => "geometry",
            ShaderKind::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a compile or link request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileStatus {
    pub success: bool,
    pub log: String,
}

impl CompileStatus {
    pub fn ok(log: impl Into<String>) -> Self {
        Self {
            success: true,
            log: log.into(),
        }
    }

    pub fn failed(log: impl Into<String>) -> Self {
        Self {
            success: false,
            log: log.into(),
        }
    }
}

/// Expected update frequency of a buffer's contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    StaticDraw,
    #[default]
    DynamicDraw,
    StreamDraw,
}

/// Component type of a vertex attribute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VertexAttribType {
    #[default]
    Float,
    Int,
    UnsignedInt,
}

impl VertexAttribType {
    /// Size of one component in bytes.
    pub fn component_size(&self) -> u32 {
        4
    }
}

/// Primitive assembly mode for draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawMode {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
}

/// Depth comparison function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Depth test, depth write and comparison toggles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub func: DepthFunc,
}

impl DepthState {
    pub const DISABLED: DepthState = DepthState {
        test: false,
        write: false,
        func: DepthFunc::Always,
    };

    /// Standard opaque geometry: test and write, nearest wins.
    pub const OPAQUE: DepthState = DepthState {
        test: true,
        write: true,
        func: DepthFunc::Less,
    };
}

/// Which attachments a clear touches, and their clear values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClearRequest {
    pub color: Option<Vec4>,
    pub depth: Option<f32>,
}

impl ClearRequest {
    pub fn color_and_depth(color: Vec4) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
        }
    }
}

/// Pixel format of a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

/// Texture creation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Pixel rectangle the next draws render into.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }
}

/// Command surface of a graphics device.
///
/// Object safe; the rest of the crate only ever holds `&mut dyn GraphicsDevice`.
/// Uniforms, storage buffers and vertex attributes are bound by name against
/// the program made current with [`use_program`](Self::use_program).
pub trait GraphicsDevice {
    fn create_shader(&mut self, kind: ShaderKind) -> ShaderHandle;
    fn compile_shader(&mut self, shader: ShaderHandle, source: &str) -> CompileStatus;
    fn delete_shader(&mut self, shader: ShaderHandle);

    fn create_program(&mut self) -> ProgramHandle;
    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle);
    fn link_program(&mut self, program: ProgramHandle) -> CompileStatus;
    fn use_program(&mut self, program: ProgramHandle);
    fn delete_program(&mut self, program: ProgramHandle);

    fn create_buffer(&mut self, label: &str, usage: BufferUsage) -> BufferHandle;
    /// Replace the whole contents of `buffer` with `data`.
    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]);
    fn delete_buffer(&mut self, buffer: BufferHandle);

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle;

    fn set_uniform(&mut self, name: &str, value: &UniformValue);
    fn bind_vertex_attribute(&mut self, attribute: &VertexAttribute);
    fn bind_storage_buffer(&mut self, name: &str, buffer: BufferHandle);
    /// Bind render targets. An empty slice selects the default target.
    fn bind_framebuffer(&mut self, bindings: &[FramebufferBinding]);

    fn set_depth_state(&mut self, state: DepthState);
    fn set_blend(&mut self, enabled: bool);
    fn set_viewport(&mut self, viewport: Viewport);
    fn clear(&mut self, request: ClearRequest);

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32) -> Result<(), DeviceError>;
    fn draw_arrays_instanced(
        &mut self,
        mode: DrawMode,
        first: u32,
        count: u32,
        instances: u32,
    ) -> Result<(), DeviceError>;
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_kind_display() {
        assert_eq!(ShaderKind::Fragment.to_string(), "fragment");
        assert_eq!(ShaderKind::Compute.as_str(), "compute");
    }

    #[test]
    fn test_depth_presets() {
        assert!(DepthState::OPAQUE.test && DepthState::OPAQUE.write);
        assert_eq!(DepthState::OPAQUE.func, DepthFunc::Less);
        assert!(!DepthState::DISABLED.test);
    }

    #[test]
    fn test_texture_format_depth() {
        assert!(TextureFormat::Depth32Float.is_depth());
        assert!(!TextureFormat::Rgba8Unorm.is_depth());
    }
}
