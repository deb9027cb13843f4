//! Render passes: one program plus the state and hooks it draws with.
//!
//! Activation runs a fixed sequence:
//! 1. the before-state hook
//! 2. link (once) and bind the program
//! 3. uniforms
//! 4. vertex layout
//! 5. framebuffer targets
//! 6. the before-render hook
//! 7. the render hook, which issues the draw
//!
//! A pass whose program fails to link stops after step 2 and reports
//! [`PassStatus::SkippedUnlinked`].

use crate::device::GraphicsDevice;
use crate::error::{DeviceError, Error};
use crate::framebuffer::FramebufferTargetSet;
use crate::program::ShaderProgram;
use crate::state::StatePart;
use crate::uniforms::UniformBindingSet;
use crate::vertex::VertexArrayLayout;

/// Callback run at a fixed point of a pass activation.
pub type DeviceHook = Box<dyn FnMut(&mut dyn GraphicsDevice) -> Result<(), DeviceError>>;

/// Outcome of one pass activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassStatus {
    Rendered,
    /// The program did not link; nothing after the link step ran.
    SkippedUnlinked,
}

pub struct RenderPass {
    name: String,
    program: ShaderProgram,
    uniforms: UniformBindingSet,
    vertex_layout: VertexArrayLayout,
    targets: FramebufferTargetSet,
    before_state: Option<DeviceHook>,
    before_render: Option<DeviceHook>,
    render: Option<DeviceHook>,
    reported_skip: bool,
}

impl RenderPass {
    pub fn new(name: impl Into<String>, program: ShaderProgram) -> Self {
        Self {
            name: name.into(),
            program,
            uniforms: UniformBindingSet::new(),
            vertex_layout: VertexArrayLayout::default(),
            targets: FramebufferTargetSet::screen(),
            before_state: None,
            before_render: None,
            render: None,
            reported_skip: false,
        }
    }

    pub fn with_uniforms(mut self, uniforms: UniformBindingSet) -> Self {
        self.uniforms = uniforms;
        self
    }

    pub fn with_vertex_layout(mut self, layout: VertexArrayLayout) -> Self {
        self.vertex_layout = layout;
        self
    }

    pub fn with_targets(mut self, targets: FramebufferTargetSet) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_before_state(
        mut self,
        hook: impl FnMut(&mut dyn GraphicsDevice) -> Result<(), DeviceError> + 'static,
    ) -> Self {
        self.before_state = Some(Box::new(hook));
        self
    }

    pub fn with_before_render(
        mut self,
        hook: impl FnMut(&mut dyn GraphicsDevice) -> Result<(), DeviceError> + 'static,
    ) -> Self {
        self.before_render = Some(Box::new(hook));
        self
    }

    pub fn with_render(
        mut self,
        hook: impl FnMut(&mut dyn GraphicsDevice) -> Result<(), DeviceError> + 'static,
    ) -> Self {
        self.render = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut ShaderProgram {
        &mut self.program
    }

    pub fn uniforms(&self) -> &UniformBindingSet {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut UniformBindingSet {
        &mut self.uniforms
    }

    pub fn vertex_layout(&self) -> &VertexArrayLayout {
        &self.vertex_layout
    }

    pub fn vertex_layout_mut(&mut self) -> &mut VertexArrayLayout {
        &mut self.vertex_layout
    }

    pub fn targets(&self) -> &FramebufferTargetSet {
        &self.targets
    }

    pub fn set_targets(&mut self, targets: FramebufferTargetSet) {
        self.targets = targets;
    }

    /// Run the activation sequence.
    pub fn activate(&mut self, device: &mut dyn GraphicsDevice) -> Result<PassStatus, Error> {
        if let Some(hook) = &mut self.before_state {
            hook(device)?;
        }

        if !self.program.ensure_linked(device)? {
            if !self.reported_skip {
                log::warn!(
                    "render pass <{}> skipped: program <{}> did not link",
                    self.name,
                    self.program.name()
                );
                self.reported_skip = true;
            }
            return Ok(PassStatus::SkippedUnlinked);
        }
        self.program.activate(device)?;

        self.uniforms.activate(device)?;
        self.vertex_layout.activate(device)?;
        self.targets.activate(device)?;

        if let Some(hook) = &mut self.before_render {
            hook(device)?;
        }
        if let Some(hook) = &mut self.render {
            hook(device)?;
        }
        Ok(PassStatus::Rendered)
    }

    /// Release the pass program.
    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        self.program.dispose(device);
        self.reported_skip = false;
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("name", &self.name)
            .field("program", &self.program.name())
            .field("uniforms", &self.uniforms)
            .field("vertex_layout", &self.vertex_layout.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BufferUsage, DeviceCommand, DrawMode, HeadlessDevice};
    use crate::resources::MemoryResources;
    use crate::shader::ShaderRegistry;
    use crate::vertex::VertexAttribute;
    use std::cell::RefCell;
    use std::rc::Rc;

    const VERT: &str = r#"
@group(0) @binding(0) var<uniform> offset: vec2<f32>;

@vertex
fn vs_main(@location(0) pos: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(pos + offset, 0.0, 1.0);
}
"#;

    const FRAG: &str = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;

    fn program(shaders: &mut ShaderRegistry, frag: &str) -> ShaderProgram {
        let vert = shaders.get_or_create("quad.vert", VERT).unwrap();
        let frag = shaders.get_or_create("quad.frag", frag).unwrap();
        ShaderProgram::new("quad", vec![vert, frag])
    }

    #[test]
    fn test_activation_order() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::new(MemoryResources::new());
        let quad = device.create_buffer("quad", BufferUsage::StaticDraw);
        let trace = Rc::new(RefCell::new(Vec::new()));

        let (t1, t2, t3) = (trace.clone(), trace.clone(), trace.clone());
        let mut uniforms = UniformBindingSet::new();
        uniforms.set("offset", glam::Vec2::ZERO);
        let mut pass = RenderPass::new("quad", program(&mut shaders, FRAG))
            .with_uniforms(uniforms)
            .with_vertex_layout(VertexArrayLayout::new(vec![VertexAttribute::new("pos", quad, 2)]))
            .with_before_state(move |_| {
                t1.borrow_mut().push("before_state");
                Ok(())
            })
            .with_before_render(move |_| {
                t2.borrow_mut().push("before_render");
                Ok(())
            })
            .with_render(move |device| {
                t3.borrow_mut().push("render");
                device.draw_arrays(DrawMode::TriangleStrip, 0, 4)
            });

        assert_eq!(pass.activate(&mut device).unwrap(), PassStatus::Rendered);
        assert_eq!(*trace.borrow(), vec!["before_state", "before_render", "render"]);

        let kinds: Vec<&str> = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::UseProgram(_) => Some("use"),
                DeviceCommand::SetUniform { .. } => Some("uniform"),
                DeviceCommand::BindVertexAttribute(_) => Some("attribute"),
                DeviceCommand::BindFramebuffer(_) => Some("targets"),
                DeviceCommand::Draw { .. } => Some("draw"),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["use", "uniform", "attribute", "targets", "draw"]);
    }

    #[test]
    fn test_unlinked_program_skips_pass() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::new(MemoryResources::new());
        let rendered = Rc::new(RefCell::new(false));
        let flag = rendered.clone();

        let mut pass = RenderPass::new("quad", program(&mut shaders, "fn broken( {"))
            .with_render(move |_| {
                *flag.borrow_mut() = true;
                Ok(())
            });

        assert_eq!(pass.activate(&mut device).unwrap(), PassStatus::SkippedUnlinked);
        assert_eq!(pass.activate(&mut device).unwrap(), PassStatus::SkippedUnlinked);
        assert!(!*rendered.borrow());
        assert_eq!(
            device.count(|c| matches!(c, DeviceCommand::LinkProgram { .. })),
            1
        );
    }

    #[test]
    fn test_uniform_providers_reevaluated_each_activation() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::new(MemoryResources::new());
        let quad = device.create_buffer("quad", BufferUsage::StaticDraw);
        let offset = Rc::new(RefCell::new(glam::Vec2::ZERO));
        let source = offset.clone();

        let mut uniforms = UniformBindingSet::new();
        uniforms.set_with("offset", move || *source.borrow());
        let mut pass = RenderPass::new("quad", program(&mut shaders, FRAG))
            .with_uniforms(uniforms)
            .with_vertex_layout(VertexArrayLayout::new(vec![VertexAttribute::new("pos", quad, 2)]));

        pass.activate(&mut device).unwrap();
        *offset.borrow_mut() = glam::Vec2::new(0.5, 0.25);
        pass.activate(&mut device).unwrap();

        let values: Vec<_> = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::SetUniform { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            values,
            vec![
                glam::Vec2::ZERO.into(),
                crate::uniforms::UniformValue::Vec2(glam::Vec2::new(0.5, 0.25))
            ]
        );
    }
}
