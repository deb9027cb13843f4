//! Recording device without a GPU.
//!
//! Shader units are really compiled (naga parse + validation + stage check),
//! links check that the attached stages form a complete pipeline, and draws
//! and dispatches verify that every resource the program reads has been
//! bound. Everything else is recorded as a [`DeviceCommand`] so callers can
//! assert on the exact command stream.

use std::collections::{HashMap, HashSet};

use super::reflect::{check_stage_set, reflect_wgsl, BindingKind, ShaderReflection};
use super::{
    BufferHandle, BufferUsage, ClearRequest, CompileStatus, DepthState, DrawMode, GraphicsDevice,
    ProgramHandle, ShaderHandle, ShaderKind, TextureDesc, TextureHandle, Viewport,
};
use crate::error::DeviceError;
use crate::framebuffer::FramebufferBinding;
use crate::uniforms::UniformValue;
use crate::vertex::VertexAttribute;

/// One request received by a [`HeadlessDevice`].
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCommand {
    CreateShader { shader: ShaderHandle, kind: ShaderKind },
    CompileShader { shader: ShaderHandle, success: bool },
    DeleteShader(ShaderHandle),
    CreateProgram(ProgramHandle),
    AttachShader { program: ProgramHandle, shader: ShaderHandle },
    LinkProgram { program: ProgramHandle, success: bool },
    UseProgram(ProgramHandle),
    DeleteProgram(ProgramHandle),
    CreateBuffer { buffer: BufferHandle, label: String, usage: BufferUsage },
    UploadBuffer { buffer: BufferHandle, bytes: usize },
    DeleteBuffer(BufferHandle),
    CreateTexture { texture: TextureHandle, desc: TextureDesc },
    SetUniform { name: String, value: UniformValue },
    BindVertexAttribute(VertexAttribute),
    BindStorageBuffer { name: String, buffer: BufferHandle },
    BindFramebuffer(Vec<FramebufferBinding>),
    SetDepthState(DepthState),
    SetBlend(bool),
    SetViewport(Viewport),
    Clear(ClearRequest),
    Draw { mode: DrawMode, first: u32, count: u32, instances: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
}

struct ShaderEntry {
    kind: ShaderKind,
    reflection: Option<ShaderReflection>,
}

#[derive(Default)]
struct ProgramEntry {
    attached: Vec<ShaderHandle>,
    linked: bool,
    uniforms: HashSet<String>,
}

/// Graphics device that records commands instead of executing them.
#[derive(Default)]
pub struct HeadlessDevice {
    next_id: u32,
    commands: Vec<DeviceCommand>,
    shaders: HashMap<ShaderHandle, ShaderEntry>,
    programs: HashMap<ProgramHandle, ProgramEntry>,
    buffers: HashMap<BufferHandle, Vec<u8>>,
    textures: HashMap<TextureHandle, TextureDesc>,
    current_program: Option<ProgramHandle>,
    storage: HashMap<String, BufferHandle>,
    vertex_inputs: HashSet<String>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Every command received so far, oldest first.
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    /// Forget the recorded commands; device objects are kept.
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Number of recorded commands matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&DeviceCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }

    /// Last bytes uploaded to `buffer`, if it exists.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn current_program(&self) -> Option<ProgramHandle> {
        self.current_program
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn linked_program(&self) -> Result<(ProgramHandle, &ProgramEntry), DeviceError> {
        let handle = self.current_program.ok_or(DeviceError::NoProgram)?;
        let entry = self.programs.get(&handle).ok_or(DeviceError::UnknownHandle {
            kind: "program",
            id: handle.0,
        })?;
        if !entry.linked {
            return Err(DeviceError::ProgramNotLinked(handle.0));
        }
        Ok((handle, entry))
    }

    /// Check that every resource used by the program's stages is bound.
    fn check_bindings(&self, entry: &ProgramEntry, check_inputs: bool) -> Result<(), DeviceError> {
        for shader in &entry.attached {
            let Some(reflection) = self.shaders.get(shader).and_then(|s| s.reflection.as_ref()) else {
                continue;
            };
            for (name, slot) in &reflection.resources {
                if !slot.used {
                    continue;
                }
                let bound = match slot.kind {
                    BindingKind::Uniform => entry.uniforms.contains(name),
                    BindingKind::Storage { .. } => self.storage.contains_key(name),
                };
                if !bound {
                    return Err(DeviceError::UnboundResource { name: name.clone() });
                }
            }
            if check_inputs {
                for name in reflection.inputs.keys() {
                    if !self.vertex_inputs.contains(name) {
                        return Err(DeviceError::UnboundResource { name: name.clone() });
                    }
                }
            }
        }
        Ok(())
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_shader(&mut self, kind: ShaderKind) -> ShaderHandle {
        let shader = ShaderHandle(self.next_id());
        self.shaders.insert(
            shader,
            ShaderEntry {
                kind,
                reflection: None,
            },
        );
        self.commands.push(DeviceCommand::CreateShader { shader, kind });
        shader
    }

    fn compile_shader(&mut self, shader: ShaderHandle, source: &str) -> CompileStatus {
        let status = match self.shaders.get_mut(&shader) {
            None => CompileStatus::failed(format!("unknown shader handle {}", shader.0)),
            Some(entry) => match reflect_wgsl(source, entry.kind) {
                Ok(reflection) => {
                    let log = format!("{} entry point `{}`", entry.kind, reflection.entry_point);
                    entry.reflection = Some(reflection);
                    CompileStatus::ok(log)
                }
                Err(log) => {
                    entry.reflection = None;
                    CompileStatus::failed(log)
                }
            },
        };
        self.commands.push(DeviceCommand::CompileShader {
            shader,
            success: status.success,
        });
        status
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
        self.commands.push(DeviceCommand::DeleteShader(shader));
    }

    fn create_program(&mut self) -> ProgramHandle {
        let program = ProgramHandle(self.next_id());
        self.programs.insert(program, ProgramEntry::default());
        self.commands.push(DeviceCommand::CreateProgram(program));
        program
    }

    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle) {
        if let Some(entry) = self.programs.get_mut(&program) {
            entry.attached.push(shader);
        }
        self.commands.push(DeviceCommand::AttachShader { program, shader });
    }

    fn link_program(&mut self, program: ProgramHandle) -> CompileStatus {
        let status = match self.programs.get(&program) {
            None => CompileStatus::failed(format!("unknown program handle {}", program.0)),
            Some(entry) => {
                let mut problems = Vec::new();
                let mut kinds = Vec::new();
                for shader in &entry.attached {
                    match self.shaders.get(shader) {
                        None => problems.push(format!("shader {} was deleted", shader.0)),
                        Some(s) if s.reflection.is_none() => {
                            problems.push(format!("{} shader {} is not compiled", s.kind, shader.0))
                        }
                        Some(s) => kinds.push(s.kind),
                    }
                }
                if problems.is_empty() {
                    if let Err(problem) = check_stage_set(&kinds) {
                        problems.push(problem);
                    }
                }
                if problems.is_empty() {
                    CompileStatus::ok(format!("linked {} stage(s)", kinds.len()))
                } else {
                    CompileStatus::failed(problems.join("\n"))
                }
            }
        };
        if let Some(entry) = self.programs.get_mut(&program) {
            entry.linked = status.success;
        }
        self.commands.push(DeviceCommand::LinkProgram {
            program,
            success: status.success,
        });
        status
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.current_program = Some(program);
        self.commands.push(DeviceCommand::UseProgram(program));
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
        self.commands.push(DeviceCommand::DeleteProgram(program));
    }

    fn create_buffer(&mut self, label: &str, usage: BufferUsage) -> BufferHandle {
        let buffer = BufferHandle(self.next_id());
        self.buffers.insert(buffer, Vec::new());
        self.commands.push(DeviceCommand::CreateBuffer {
            buffer,
            label: label.to_string(),
            usage,
        });
        buffer
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        if let Some(contents) = self.buffers.get_mut(&buffer) {
            contents.clear();
            contents.extend_from_slice(data);
        }
        self.commands.push(DeviceCommand::UploadBuffer {
            buffer,
            bytes: data.len(),
        });
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        self.commands.push(DeviceCommand::DeleteBuffer(buffer));
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle {
        let texture = TextureHandle(self.next_id());
        self.textures.insert(texture, desc.clone());
        self.commands.push(DeviceCommand::CreateTexture {
            texture,
            desc: desc.clone(),
        });
        texture
    }

    fn set_uniform(&mut self, name: &str, value: &UniformValue) {
        if let Some(entry) = self
            .current_program
            .and_then(|p| self.programs.get_mut(&p))
        {
            entry.uniforms.insert(name.to_string());
        }
        self.commands.push(DeviceCommand::SetUniform {
            name: name.to_string(),
            value: value.clone(),
        });
    }

    fn bind_vertex_attribute(&mut self, attribute: &VertexAttribute) {
        self.vertex_inputs.insert(attribute.name.clone());
        self.commands
            .push(DeviceCommand::BindVertexAttribute(attribute.clone()));
    }

    fn bind_storage_buffer(&mut self, name: &str, buffer: BufferHandle) {
        self.storage.insert(name.to_string(), buffer);
        self.commands.push(DeviceCommand::BindStorageBuffer {
            name: name.to_string(),
            buffer,
        });
    }

    fn bind_framebuffer(&mut self, bindings: &[FramebufferBinding]) {
        self.commands
            .push(DeviceCommand::BindFramebuffer(bindings.to_vec()));
    }

    fn set_depth_state(&mut self, state: DepthState) {
        self.commands.push(DeviceCommand::SetDepthState(state));
    }

    fn set_blend(&mut self, enabled: bool) {
        self.commands.push(DeviceCommand::SetBlend(enabled));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.commands.push(DeviceCommand::SetViewport(viewport));
    }

    fn clear(&mut self, request: ClearRequest) {
        self.commands.push(DeviceCommand::Clear(request));
    }

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32) -> Result<(), DeviceError> {
        self.draw_arrays_instanced(mode, first, count, 1)
    }

    fn draw_arrays_instanced(
        &mut self,
        mode: DrawMode,
        first: u32,
        count: u32,
        instances: u32,
    ) -> Result<(), DeviceError> {
        let (_, entry) = self.linked_program()?;
        self.check_bindings(entry, true)?;
        self.commands.push(DeviceCommand::Draw {
            mode,
            first,
            count,
            instances,
        });
        Ok(())
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) -> Result<(), DeviceError> {
        let (_, entry) = self.linked_program()?;
        self.check_bindings(entry, false)?;
        self.commands.push(DeviceCommand::Dispatch { x, y, z });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERT: &str = r#"
@vertex
fn vs_main(@location(0) pos: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(pos, 0.0, 1.0);
}
"#;

    const FRAG: &str = r#"
@group(0) @binding(0) var<uniform> tint: vec4<f32>;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return tint;
}
"#;

    fn linked_raster(device: &mut HeadlessDevice) -> ProgramHandle {
        let vs = device.create_shader(ShaderKind::Vertex);
        assert!(device.compile_shader(vs, VERT).success);
        let fs = device.create_shader(ShaderKind::Fragment);
        assert!(device.compile_shader(fs, FRAG).success);
        let program = device.create_program();
        device.attach_shader(program, vs);
        device.attach_shader(program, fs);
        assert!(device.link_program(program).success);
        program
    }

    #[test]
    fn test_compile_rejects_invalid_source() {
        let mut device = HeadlessDevice::new();
        let shader = device.create_shader(ShaderKind::Fragment);
        let status = device.compile_shader(shader, "fn fs_main( {");
        assert!(!status.success);
        assert!(!status.log.is_empty());
    }

    #[test]
    fn test_link_requires_complete_pipeline() {
        let mut device = HeadlessDevice::new();
        let vs = device.create_shader(ShaderKind::Vertex);
        device.compile_shader(vs, VERT);
        let program = device.create_program();
        device.attach_shader(program, vs);

        let status = device.link_program(program);
        assert!(!status.success);
        assert!(status.log.contains("vertex and fragment"));
    }

    #[test]
    fn test_draw_without_program_fails() {
        let mut device = HeadlessDevice::new();
        assert!(matches!(
            device.draw_arrays(DrawMode::Points, 0, 1),
            Err(DeviceError::NoProgram)
        ));
    }

    #[test]
    fn test_draw_checks_bindings() {
        let mut device = HeadlessDevice::new();
        let program = linked_raster(&mut device);
        device.use_program(program);

        let err = device.draw_arrays(DrawMode::Triangles, 0, 3).unwrap_err();
        assert!(matches!(err, DeviceError::UnboundResource { .. }));

        device.set_uniform("tint", &UniformValue::Vec4(glam::Vec4::ONE));
        let quad = device.create_buffer("quad", BufferUsage::StaticDraw);
        device.bind_vertex_attribute(&VertexAttribute::new("pos", quad, 2));
        device.draw_arrays(DrawMode::Triangles, 0, 3).unwrap();

        assert_eq!(
            device.count(|c| matches!(c, DeviceCommand::Draw { .. })),
            1
        );
    }
}
