//! Offscreen wgpu backend.
//!
//! Shader units are compiled with `create_shader_module` inside a validation
//! error scope, after naga has produced the reflection used to map names to
//! `@group`/`@binding` slots and `@location`s. Compute programs become
//! pipelines at link time. Render pipelines depend on the bound vertex layout,
//! targets and toggles, so they are built at draw time and cached.
//!
//! Every uniform name gets its own small uniform buffer per program, sized to
//! the value and padded to 16 bytes.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::reflect::{check_stage_set, reflect_wgsl, BindingKind, ResourceSlot, ShaderReflection};
use super::{
    BufferHandle, BufferUsage, ClearRequest, CompileStatus, DepthFunc, DepthState, DrawMode,
    GraphicsDevice, ProgramHandle, ShaderHandle, ShaderKind, TextureDesc, TextureFormat,
    TextureHandle, VertexAttribType, Viewport,
};
use crate::error::DeviceError;
use crate::framebuffer::{Attachment, FramebufferBinding};
use crate::uniforms::UniformValue;
use crate::vertex::VertexAttribute;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const MIN_BUFFER_SIZE: u64 = 16;

struct ShaderSlot {
    kind: ShaderKind,
    module: Option<Rc<wgpu::ShaderModule>>,
    reflection: Option<Rc<ShaderReflection>>,
}

#[derive(Clone)]
struct Stage {
    module: Rc<wgpu::ShaderModule>,
    reflection: Rc<ShaderReflection>,
}

enum Linked {
    Compute {
        pipeline: wgpu::ComputePipeline,
        reflection: Rc<ShaderReflection>,
    },
    Render {
        vertex: Stage,
        fragment: Stage,
    },
}

#[derive(Default)]
struct ProgramSlot {
    attached: Vec<ShaderHandle>,
    linked: Option<Linked>,
    uniforms: HashMap<String, wgpu::Buffer>,
}

struct BufferSlot {
    label: String,
    buffer: Option<wgpu::Buffer>,
}

struct TextureSlot {
    texture: wgpu::Texture,
    format: wgpu::TextureFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct VertexSlotKey {
    location: u32,
    format: wgpu::VertexFormat,
    stride: u32,
    offset: u32,
    instanced: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RenderKey {
    program: ProgramHandle,
    mode: DrawMode,
    vertex: Vec<VertexSlotKey>,
    colors: Vec<Option<wgpu::TextureFormat>>,
    depth: Option<wgpu::TextureFormat>,
    depth_state: DepthState,
    blend: bool,
}

/// Graphics device backed by a wgpu device rendering into offscreen targets.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
    default_color: wgpu::Texture,
    default_depth: wgpu::Texture,
    next_id: u32,
    shaders: HashMap<ShaderHandle, ShaderSlot>,
    programs: HashMap<ProgramHandle, ProgramSlot>,
    buffers: HashMap<BufferHandle, BufferSlot>,
    textures: HashMap<TextureHandle, TextureSlot>,
    current_program: Option<ProgramHandle>,
    storage: HashMap<String, BufferHandle>,
    vertex_attributes: HashMap<String, VertexAttribute>,
    targets: Vec<FramebufferBinding>,
    depth_state: DepthState,
    blend: bool,
    viewport: Option<Viewport>,
    render_cache: HashMap<RenderKey, wgpu::RenderPipeline>,
}

impl WgpuDevice {
    /// Open the default adapter and create `width` x `height` default targets.
    pub fn new_headless(width: u32, height: u32) -> Result<Self, DeviceError> {
        pollster::block_on(Self::new_async(width.max(1), height.max(1)))
    }

    async fn new_async(width: u32, height: u32) -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(DeviceError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("cmpe device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        log::info!("wgpu device ready on {}", adapter.get_info().name);

        let default_color = create_target(&device, "default color", width, height, COLOR_FORMAT);
        let default_depth = create_target(&device, "default depth", width, height, DEPTH_FORMAT);

        Ok(Self {
            device,
            queue,
            width,
            height,
            default_color,
            default_depth,
            next_id: 0,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            current_program: None,
            storage: HashMap::new(),
            vertex_attributes: HashMap::new(),
            targets: Vec::new(),
            depth_state: DepthState::default(),
            blend: false,
            viewport: None,
            render_cache: HashMap::new(),
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Run `f` inside a validation error scope.
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }

    /// Copy a device buffer back to the CPU.
    pub fn read_buffer(&self, buffer: BufferHandle) -> Result<Vec<u8>, DeviceError> {
        let source = self
            .buffers
            .get(&buffer)
            .and_then(|slot| slot.buffer.as_ref())
            .ok_or(DeviceError::UnknownHandle {
                kind: "buffer",
                id: buffer.0,
            })?;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: source.size(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, source.size());
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|err| DeviceError::Validation(err.to_string()))?
            .map_err(|err| DeviceError::Validation(err.to_string()))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn current(&self) -> Result<(ProgramHandle, &ProgramSlot, &Linked), DeviceError> {
        let handle = self.current_program.ok_or(DeviceError::NoProgram)?;
        let slot = self.programs.get(&handle).ok_or(DeviceError::UnknownHandle {
            kind: "program",
            id: handle.0,
        })?;
        let linked = slot
            .linked
            .as_ref()
            .ok_or(DeviceError::ProgramNotLinked(handle.0))?;
        Ok((handle, slot, linked))
    }

    fn device_buffer(&self, handle: BufferHandle, name: &str) -> Result<&wgpu::Buffer, DeviceError> {
        self.buffers
            .get(&handle)
            .and_then(|slot| slot.buffer.as_ref())
            .ok_or_else(|| DeviceError::UnboundResource {
                name: name.to_string(),
            })
    }

    /// Build one bind group per group index up to the highest used one.
    fn bind_groups(
        &self,
        program: &ProgramSlot,
        resources: &[(&String, ResourceSlot)],
        layout_of: impl Fn(u32) -> wgpu::BindGroupLayout,
    ) -> Result<Vec<wgpu::BindGroup>, DeviceError> {
        let mut groups: BTreeMap<u32, Vec<(u32, &wgpu::Buffer)>> = BTreeMap::new();
        for (name, slot) in resources.iter().filter(|(_, slot)| slot.used) {
            let buffer = match slot.kind {
                BindingKind::Uniform => {
                    program
                        .uniforms
                        .get(*name)
                        .ok_or_else(|| DeviceError::UnboundResource {
                            name: name.to_string(),
                        })?
                }
                BindingKind::Storage { .. } => {
                    let handle = self
                        .storage
                        .get(*name)
                        .ok_or_else(|| DeviceError::UnboundResource {
                            name: name.to_string(),
                        })?;
                    self.device_buffer(*handle, name)?
                }
            };
            groups.entry(slot.group).or_default().push((slot.binding, buffer));
        }

        let count = groups.keys().next_back().map_or(0, |g| g + 1);
        let mut bind_groups = Vec::with_capacity(count as usize);
        for index in 0..count {
            let entries: Vec<wgpu::BindGroupEntry> = groups
                .get(&index)
                .map(|bindings| {
                    bindings
                        .iter()
                        .map(|(binding, buffer)| wgpu::BindGroupEntry {
                            binding: *binding,
                            resource: buffer.as_entire_binding(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            bind_groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &layout_of(index),
                entries: &entries,
            }));
        }
        Ok(bind_groups)
    }

    fn texture_view(&self, texture: TextureHandle) -> Result<(wgpu::TextureView, wgpu::TextureFormat), DeviceError> {
        let slot = self.textures.get(&texture).ok_or(DeviceError::UnknownHandle {
            kind: "texture",
            id: texture.0,
        })?;
        Ok((slot.texture.create_view(&Default::default()), slot.format))
    }

    /// Color views indexed by location, the depth view, and the target size.
    #[allow(clippy::type_complexity)]
    fn target_views(
        &self,
    ) -> Result<
        (
            Vec<Option<(wgpu::TextureView, wgpu::TextureFormat)>>,
            Option<(wgpu::TextureView, wgpu::TextureFormat)>,
            (u32, u32),
        ),
        DeviceError,
    > {
        if self.targets.is_empty() {
            return Ok((
                vec![Some((self.default_color.create_view(&Default::default()), COLOR_FORMAT))],
                Some((self.default_depth.create_view(&Default::default()), DEPTH_FORMAT)),
                (self.width, self.height),
            ));
        }

        let mut colors = Vec::new();
        let mut depth = None;
        let mut size = None;
        for binding in &self.targets {
            if let Some(slot) = self.textures.get(&binding.texture) {
                size.get_or_insert((slot.texture.width(), slot.texture.height()));
            }
            let view = self.texture_view(binding.texture)?;
            match binding.attachment {
                Attachment::Color(location) => {
                    let location = location as usize;
                    if colors.len() <= location {
                        colors.resize_with(location + 1, || None);
                    }
                    colors[location] = Some(view);
                }
                Attachment::Depth => depth = Some(view),
            }
        }
        Ok((colors, depth, size.unwrap_or((self.width, self.height))))
    }

    fn vertex_slots(&self, reflection: &ShaderReflection) -> Result<Vec<(VertexSlotKey, BufferHandle)>, DeviceError> {
        let mut inputs: Vec<_> = reflection.inputs.iter().collect();
        inputs.sort_by_key(|(_, location)| **location);

        let mut slots = Vec::with_capacity(inputs.len());
        for (name, location) in inputs {
            let attribute = self
                .vertex_attributes
                .get(name)
                .ok_or_else(|| DeviceError::UnboundResource { name: name.clone() })?;
            let format = vertex_format(attribute.attrib_type, attribute.size).ok_or_else(|| {
                DeviceError::Validation(format!(
                    "vertex attribute `{}` has unsupported size {}",
                    name, attribute.size
                ))
            })?;
            if attribute.divisor > 1 {
                log::warn!(
                    "vertex attribute `{}` divisor {} treated as 1",
                    name,
                    attribute.divisor
                );
            }
            slots.push((
                VertexSlotKey {
                    location: *location,
                    format,
                    stride: attribute.effective_stride(),
                    offset: attribute.offset,
                    instanced: attribute.is_instanced(),
                },
                attribute.buffer,
            ));
        }
        Ok(slots)
    }

    fn create_render_pipeline(
        &self,
        key: &RenderKey,
        vertex: &Stage,
        fragment: &Stage,
    ) -> Result<wgpu::RenderPipeline, DeviceError> {
        let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
            .vertex
            .iter()
            .map(|slot| {
                [wgpu::VertexAttribute {
                    format: slot.format,
                    offset: slot.offset as u64,
                    shader_location: slot.location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = key
            .vertex
            .iter()
            .zip(&attributes)
            .map(|(slot, attributes)| wgpu::VertexBufferLayout {
                array_stride: slot.stride as u64,
                step_mode: if slot.instanced {
                    wgpu::VertexStepMode::Instance
                } else {
                    wgpu::VertexStepMode::Vertex
                },
                attributes,
            })
            .collect();
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .colors
            .iter()
            .map(|format| {
                format.map(|format| wgpu::ColorTargetState {
                    format,
                    blend: key.blend.then_some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let depth_stencil = key.depth.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: key.depth_state.test && key.depth_state.write,
            depth_compare: if key.depth_state.test {
                compare_function(key.depth_state.func)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: Default::default(),
            bias: Default::default(),
        });

        let label = format!("program {}", key.program.0);
        self.scoped(|device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&label),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &vertex.module,
                    entry_point: Some(&vertex.reflection.entry_point),
                    compilation_options: Default::default(),
                    buffers: &buffers,
                },
                primitive: wgpu::PrimitiveState {
                    topology: topology(key.mode),
                    ..Default::default()
                },
                depth_stencil,
                multisample: Default::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment.module,
                    entry_point: Some(&fragment.reflection.entry_point),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                multiview: None,
                cache: None,
            })
        })
        .map_err(DeviceError::Validation)
    }
}

fn create_target(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn vertex_format(attrib_type: VertexAttribType, size: u32) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;
    Some(match (attrib_type, size) {
        (VertexAttribType::Float, 1) => F::Float32,
        (VertexAttribType::Float, 2) => F::Float32x2,
        (VertexAttribType::Float, 3) => F::Float32x3,
        (VertexAttribType::Float, 4) => F::Float32x4,
        (VertexAttribType::Int, 1) => F::Sint32,
        (VertexAttribType::Int, 2) => F::Sint32x2,
        (VertexAttribType::Int, 3) => F::Sint32x3,
        (VertexAttribType::Int, 4) => F::Sint32x4,
        (VertexAttribType::UnsignedInt, 1) => F::Uint32,
        (VertexAttribType::UnsignedInt, 2) => F::Uint32x2,
        (VertexAttribType::UnsignedInt, 3) => F::Uint32x3,
        (VertexAttribType::UnsignedInt, 4) => F::Uint32x4,
        _ => return None,
    })
}

fn topology(mode: DrawMode) -> wgpu::PrimitiveTopology {
    match mode {
        DrawMode::Points => wgpu::PrimitiveTopology::PointList,
        DrawMode::Lines => wgpu::PrimitiveTopology::LineList,
        DrawMode::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        DrawMode::Triangles => wgpu::PrimitiveTopology::TriangleList,
        DrawMode::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn compare_function(func: DepthFunc) -> wgpu::CompareFunction {
    match func {
        DepthFunc::Never => wgpu::CompareFunction::Never,
        DepthFunc::Less => wgpu::CompareFunction::Less,
        DepthFunc::Equal => wgpu::CompareFunction::Equal,
        DepthFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthFunc::Greater => wgpu::CompareFunction::Greater,
        DepthFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        DepthFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        DepthFunc::Always => wgpu::CompareFunction::Always,
    }
}

/// Pad to a multiple of `align` bytes and at least [`MIN_BUFFER_SIZE`].
fn padded(data: &[u8], align: usize) -> Vec<u8> {
    let len = data.len().max(MIN_BUFFER_SIZE as usize).next_multiple_of(align);
    let mut bytes = data.to_vec();
    bytes.resize(len, 0);
    bytes
}

impl GraphicsDevice for WgpuDevice {
    fn create_shader(&mut self, kind: ShaderKind) -> ShaderHandle {
        let shader = ShaderHandle(self.next_id());
        self.shaders.insert(
            shader,
            ShaderSlot {
                kind,
                module: None,
                reflection: None,
            },
        );
        shader
    }

    fn compile_shader(&mut self, shader: ShaderHandle, source: &str) -> CompileStatus {
        let Some(kind) = self.shaders.get(&shader).map(|s| s.kind) else {
            return CompileStatus::failed(format!("unknown shader handle {}", shader.0));
        };

        let compiled = reflect_wgsl(source, kind).and_then(|reflection| {
            let label = format!("{} shader {}", kind, shader.0);
            let module = self.scoped(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&label),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                })
            })?;
            Ok((module, reflection))
        });

        let Some(slot) = self.shaders.get_mut(&shader) else {
            return CompileStatus::failed(format!("unknown shader handle {}", shader.0));
        };
        match compiled {
            Ok((module, reflection)) => {
                let log = format!("{} entry point `{}`", kind, reflection.entry_point);
                slot.module = Some(Rc::new(module));
                slot.reflection = Some(Rc::new(reflection));
                CompileStatus::ok(log)
            }
            Err(log) => {
                slot.module = None;
                slot.reflection = None;
                CompileStatus::failed(log)
            }
        }
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
    }

    fn create_program(&mut self) -> ProgramHandle {
        let program = ProgramHandle(self.next_id());
        self.programs.insert(program, ProgramSlot::default());
        program
    }

    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle) {
        if let Some(slot) = self.programs.get_mut(&program) {
            slot.attached.push(shader);
        }
    }

    fn link_program(&mut self, program: ProgramHandle) -> CompileStatus {
        let Some(attached) = self.programs.get(&program).map(|p| p.attached.clone()) else {
            return CompileStatus::failed(format!("unknown program handle {}", program.0));
        };

        let mut stages = Vec::new();
        for shader in &attached {
            let slot = self.shaders.get(shader);
            match slot.and_then(|s| Some((s.kind, s.module.clone()?, s.reflection.clone()?))) {
                Some((kind, module, reflection)) => stages.push((kind, Stage { module, reflection })),
                None => {
                    return CompileStatus::failed(format!("shader {} is not compiled", shader.0));
                }
            }
        }
        let kinds: Vec<ShaderKind> = stages.iter().map(|(kind, _)| *kind).collect();
        if let Err(log) = check_stage_set(&kinds) {
            return CompileStatus::failed(log);
        }

        let stage = |kind| {
            stages
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, stage)| stage.clone())
        };
        let linked = if let Some(compute) = stage(ShaderKind::Compute) {
            let label = format!("program {}", program.0);
            let pipeline = self.scoped(|device| {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&label),
                    layout: None,
                    module: &compute.module,
                    entry_point: Some(&compute.reflection.entry_point),
                    compilation_options: Default::default(),
                    cache: None,
                })
            });
            match pipeline {
                Ok(pipeline) => Linked::Compute {
                    pipeline,
                    reflection: compute.reflection,
                },
                Err(log) => return CompileStatus::failed(log),
            }
        } else {
            match (stage(ShaderKind::Vertex), stage(ShaderKind::Fragment)) {
                (Some(vertex), Some(fragment)) => Linked::Render { vertex, fragment },
                _ => return CompileStatus::failed("missing vertex or fragment stage"),
            }
        };

        if let Some(slot) = self.programs.get_mut(&program) {
            slot.linked = Some(linked);
        }
        self.render_cache.retain(|key, _| key.program != program);
        CompileStatus::ok(format!("linked {} stage(s)", kinds.len()))
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.current_program = Some(program);
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.render_cache.retain(|key, _| key.program != program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn create_buffer(&mut self, label: &str, _usage: BufferUsage) -> BufferHandle {
        let buffer = BufferHandle(self.next_id());
        self.buffers.insert(
            buffer,
            BufferSlot {
                label: label.to_string(),
                buffer: None,
            },
        );
        buffer
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        let Some(slot) = self.buffers.get_mut(&buffer) else {
            log::warn!("upload to unknown buffer {}", buffer.0);
            return;
        };
        let bytes = padded(data, 4);
        let size = bytes.len() as u64;
        if slot.buffer.as_ref().map_or(true, |b| b.size() != size) {
            if let Some(old) = slot.buffer.take() {
                old.destroy();
            }
            log::debug!("buffer <{}> allocated with {} bytes", slot.label, size);
            slot.buffer = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&slot.label),
                size,
                usage: wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }));
        }
        if let Some(device_buffer) = &slot.buffer {
            self.queue.write_buffer(device_buffer, 0, &bytes);
        }
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        if let Some(device_buffer) = self.buffers.remove(&buffer).and_then(|slot| slot.buffer) {
            device_buffer.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle {
        let texture = TextureHandle(self.next_id());
        let format = texture_format(desc.format);
        self.textures.insert(
            texture,
            TextureSlot {
                texture: create_target(&self.device, &desc.label, desc.width.max(1), desc.height.max(1), format),
                format,
            },
        );
        texture
    }

    fn set_uniform(&mut self, name: &str, value: &UniformValue) {
        let Some(program) = self.current_program.and_then(|p| self.programs.get_mut(&p)) else {
            log::warn!("uniform `{}` set with no program in use", name);
            return;
        };
        let bytes = padded(&value.to_uniform_bytes(), 16);
        let size = bytes.len() as u64;
        if program.uniforms.get(name).map_or(true, |b| b.size() != size) {
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(name),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            program.uniforms.insert(name.to_string(), buffer);
        }
        if let Some(buffer) = program.uniforms.get(name) {
            self.queue.write_buffer(buffer, 0, &bytes);
        }
    }

    fn bind_vertex_attribute(&mut self, attribute: &VertexAttribute) {
        self.vertex_attributes
            .insert(attribute.name.clone(), attribute.clone());
    }

    fn bind_storage_buffer(&mut self, name: &str, buffer: BufferHandle) {
        self.storage.insert(name.to_string(), buffer);
    }

    fn bind_framebuffer(&mut self, bindings: &[FramebufferBinding]) {
        self.targets = bindings.to_vec();
    }

    fn set_depth_state(&mut self, state: DepthState) {
        self.depth_state = state;
    }

    fn set_blend(&mut self, enabled: bool) {
        self.blend = enabled;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    fn clear(&mut self, request: ClearRequest) {
        let (colors, depth, _) = match self.target_views() {
            Ok(views) => views,
            Err(err) => {
                log::warn!("clear skipped: {}", err);
                return;
            }
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .map(|view| {
                let color = request.color?;
                let (view, _) = view.as_ref()?;
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color.x as f64,
                            g: color.y as f64,
                            b: color.z as f64,
                            a: color.w as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment = match (&depth, request.depth) {
            (Some((view, _)), Some(value)) => Some(wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(value),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            _ => None,
        };

        let result = self.scoped(|device| {
            let mut encoder =
                device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("clear") });
            {
                let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("clear"),
                    color_attachments: &color_attachments,
                    depth_stencil_attachment: depth_attachment,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            self.queue.submit(Some(encoder.finish()));
        });
        if let Err(log) = result {
            log::warn!("clear failed: {}", log);
        }
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
        let (program, _, linked) = self.current()?;
        let (vertex, fragment) = match linked {
            Linked::Render { vertex, fragment } => (vertex.clone(), fragment.clone()),
            Linked::Compute { .. } => {
                return Err(DeviceError::Validation(format!(
                    "program {} is a compute program and cannot draw",
                    program.0
                )))
            }
        };

        let slots = self.vertex_slots(&vertex.reflection)?;
        let (colors, depth, (target_width, target_height)) = self.target_views()?;
        let key = RenderKey {
            program,
            mode,
            vertex: slots.iter().map(|(key, _)| key.clone()).collect(),
            colors: colors.iter().map(|c| c.as_ref().map(|(_, f)| *f)).collect(),
            depth: depth.as_ref().map(|(_, f)| *f),
            depth_state: self.depth_state,
            blend: self.blend,
        };
        if !self.render_cache.contains_key(&key) {
            let pipeline = self.create_render_pipeline(&key, &vertex, &fragment)?;
            self.render_cache.insert(key.clone(), pipeline);
        }
        let pipeline = self
            .render_cache
            .get(&key)
            .ok_or_else(|| DeviceError::Validation("render pipeline missing".into()))?;

        let mut resources: HashMap<&String, ResourceSlot> = HashMap::new();
        for reflection in [&vertex.reflection, &fragment.reflection] {
            for (name, slot) in &reflection.resources {
                let entry = resources.entry(name).or_insert(*slot);
                entry.used |= slot.used;
            }
        }
        let resources: Vec<(&String, ResourceSlot)> = resources.into_iter().collect();
        let (_, program_slot, _) = self.current()?;
        let bind_groups = self.bind_groups(program_slot, &resources, |i| pipeline.get_bind_group_layout(i))?;

        let mut vertex_buffers = Vec::with_capacity(slots.len());
        for (slot, handle) in &slots {
            vertex_buffers.push(self.device_buffer(*handle, &format!("@location({})", slot.location))?);
        }

        let viewport = self
            .viewport
            .unwrap_or_else(|| Viewport::new(target_width as f32, target_height as f32));
        let vp_x = viewport.x.clamp(0.0, target_width as f32);
        let vp_y = viewport.y.clamp(0.0, target_height as f32);
        let vp_w = viewport.width.clamp(0.0, target_width as f32 - vp_x);
        let vp_h = viewport.height.clamp(0.0, target_height as f32 - vp_y);

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .map(|view| {
                view.as_ref().map(|(view, _)| wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment = depth.as_ref().map(|(view, _)| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        self.scoped(|device| {
            let mut encoder =
                device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("draw") });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("draw"),
                    color_attachments: &color_attachments,
                    depth_stencil_attachment: depth_attachment,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(pipeline);
                for (index, group) in bind_groups.iter().enumerate() {
                    pass.set_bind_group(index as u32, group, &[]);
                }
                for (index, buffer) in vertex_buffers.iter().enumerate() {
                    pass.set_vertex_buffer(index as u32, buffer.slice(..));
                }
                if vp_w > 0.0 && vp_h > 0.0 {
                    pass.set_viewport(vp_x, vp_y, vp_w, vp_h, 0.0, 1.0);
                }
                pass.draw(first..first + count, 0..instances);
            }
            self.queue.submit(Some(encoder.finish()));
        })
        .map_err(DeviceError::Validation)
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) -> Result<(), DeviceError> {
        let (program, slot, linked) = self.current()?;
        let Linked::Compute { pipeline, reflection } = linked else {
            return Err(DeviceError::Validation(format!(
                "program {} is a render program and cannot dispatch",
                program.0
            )));
        };

        let resources: Vec<(&String, ResourceSlot)> =
            reflection.resources.iter().map(|(name, slot)| (name, *slot)).collect();
        let bind_groups = self.bind_groups(slot, &resources, |i| pipeline.get_bind_group_layout(i))?;

        self.scoped(|device| {
            let mut encoder =
                device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("dispatch") });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("dispatch"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                for (index, group) in bind_groups.iter().enumerate() {
                    pass.set_bind_group(index as u32, group, &[]);
                }
                pass.dispatch_workgroups(x, y, z);
            }
            self.queue.submit(Some(encoder.finish()));
        })
        .map_err(DeviceError::Validation)
    }
}
