//! Per-system orchestration.
//!
//! A [`ParticleSystem`] owns the particle buffers, the active scheme, the
//! chaotic map and the sphere render pass. The frame driver calls
//! [`ParticleSystem::tick`] once per frame with its clock; each tick runs
//! simulate, publish, then activate.
//!
//! ```ignore
//! let config = SystemConfig::from_toml_str(&text)?;
//! let mut system = ParticleSystem::new(config, QuadraticMap::new(coefficients))?;
//! system.set_viewport(1280.0, 720.0);
//!
//! loop {
//!     system.tick(&mut device, seconds_since_start)?;
//! }
//! ```

use std::cell::Cell;
use std::rc::Rc;

use glam::{Mat4, Vec2};

use crate::clock::SimulationClock;
use crate::config::SystemConfig;
use crate::device::GraphicsDevice;
use crate::error::Result;
use crate::particles::ParticleBuffers;
use crate::pass::{PassStatus, RenderPass};
use crate::passes::{solid_sphere, SphereParameters, SphereTargets};
use crate::shader::ShaderRegistry;
use crate::simulation::{ChaoticMap, Residency, SimulationContext, SimulationScheme};
use crate::spawn::{BubbleGenerator, ParticleGenerator};
use crate::uniforms::{MvpProviders, ValueProvider};

/// Orthographic projection `width` world units across, centered on the
/// origin, with the height following the viewport aspect.
pub fn orthographic_projection(width: f32, viewport: Vec2) -> Mat4 {
    let half_width = width * 0.5;
    let aspect = if viewport.x > 0.0 {
        viewport.y / viewport.x
    } else {
        1.0
    };
    let half_height = half_width * aspect;
    Mat4::orthographic_rh(-half_width, half_width, -half_height, half_height, -1.0, 1.0)
}

pub struct ParticleSystem {
    config: SystemConfig,
    buffers: ParticleBuffers,
    shaders: ShaderRegistry,
    scheme: Box<dyn SimulationScheme>,
    map: Box<dyn ChaoticMap>,
    generator: Box<dyn ParticleGenerator>,
    clock: SimulationClock,
    projection: Rc<Cell<Mat4>>,
    viewport: Rc<Cell<Vec2>>,
    targets: SphereTargets,
    pass: Option<RenderPass>,
    /// Device-resident schemes get a full upload once; afterwards the device
    /// copy is authoritative.
    device_seeded: bool,
}

impl ParticleSystem {
    /// Validate `config` and build the system. Nothing touches the device
    /// until the first [`tick`](Self::tick).
    pub fn new(config: SystemConfig, map: impl ChaoticMap + 'static) -> Result<Self> {
        config.validate()?;
        let viewport = Vec2::ONE;
        Ok(Self {
            buffers: ParticleBuffers::new(config.particle_count, config.particle_size),
            shaders: ShaderRegistry::builtin(),
            scheme: config.scheme.build(),
            map: Box::new(map),
            generator: Box::new(BubbleGenerator::default()),
            clock: SimulationClock::new().with_fixed_delta(config.dt),
            projection: Rc::new(Cell::new(orthographic_projection(
                config.projection_width,
                viewport,
            ))),
            viewport: Rc::new(Cell::new(viewport)),
            targets: SphereTargets::Screen,
            pass: None,
            device_seeded: false,
            config,
        })
    }

    pub fn with_generator(mut self, generator: impl ParticleGenerator + 'static) -> Self {
        self.generator = Box::new(generator);
        self
    }

    /// Use a registry with a custom resource loader.
    pub fn with_shaders(mut self, shaders: ShaderRegistry) -> Self {
        self.shaders = shaders;
        self
    }

    /// Render somewhere other than the screen. Only takes effect before the
    /// first tick.
    pub fn with_targets(mut self, targets: SphereTargets) -> Self {
        self.targets = targets;
        self
    }

    /// Advance one frame: simulate, publish, then activate the render pass.
    ///
    /// `now` is the driver's frame time in seconds.
    pub fn tick(&mut self, device: &mut dyn GraphicsDevice, now: f64) -> Result<PassStatus> {
        if self.pass.is_none() {
            self.prepare(device)?;
        }

        let tick = self.clock.advance(now);
        let residency = self.scheme.residency();
        if residency == Residency::Device && !self.device_seeded {
            self.buffers.publish_all(device);
            self.device_seeded = true;
        }

        if tick.running {
            let mut ctx = SimulationContext {
                buffers: &mut self.buffers,
                device: &mut *device,
                shaders: &mut self.shaders,
                map: self.map.as_ref(),
                generator: self.generator.as_mut(),
                params: self.config.params(),
            };
            self.scheme.simulate(&mut ctx, tick.time, tick.step)?;

            if residency == Residency::Cpu {
                self.buffers.publish_render_inputs(device);
            }
        }

        match self.pass.as_mut() {
            Some(pass) => pass.activate(device),
            None => Ok(PassStatus::SkippedUnlinked),
        }
    }

    /// Bubble every particle and build the render pass.
    fn prepare(&mut self, device: &mut dyn GraphicsDevice) -> Result<()> {
        let mut arrays = self.buffers.arrays_mut();
        for i in 0..arrays.len() {
            self.generator.make_bubble(&mut arrays, i);
        }
        self.buffers.publish_render_inputs(device);

        let projection = Rc::clone(&self.projection);
        let viewport = Rc::clone(&self.viewport);
        let params = SphereParameters {
            viewport: ValueProvider::new(move || viewport.get()),
            particle_count: ValueProvider::constant(self.buffers.len() as u32),
            particle_scale: ValueProvider::constant(self.config.particle_scale),
            mvp: MvpProviders::projection_only(ValueProvider::new(move || projection.get())),
        };
        let buffers = self.buffers.sphere_buffers(device);
        self.pass = Some(solid_sphere(&mut self.shaders, self.targets, buffers, params, None)?);

        log::info!(
            "particle system initialized: {} particles, scheme {}",
            self.buffers.len(),
            self.scheme.name()
        );
        Ok(())
    }

    /// Recompute the projection for a new viewport size in pixels.
    pub fn set_viewport(&mut self, width: f32, height: f32) {
        let viewport = Vec2::new(width, height);
        self.viewport.set(viewport);
        self.projection
            .set(orthographic_projection(self.config.projection_width, viewport));
    }

    /// Swap the active scheme, releasing the old one's device objects.
    pub fn set_scheme(&mut self, device: &mut dyn GraphicsDevice, scheme: Box<dyn SimulationScheme>) {
        self.scheme.dispose(device);
        log::info!("scheme switched: {} -> {}", self.scheme.name(), scheme.name());
        self.scheme = scheme;
        self.device_seeded = false;
    }

    pub fn set_map(&mut self, map: impl ChaoticMap + 'static) {
        self.map = Box::new(map);
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn buffers(&self) -> &ParticleBuffers {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut ParticleBuffers {
        &mut self.buffers
    }

    pub fn shaders(&self) -> &ShaderRegistry {
        &self.shaders
    }

    pub fn scheme(&self) -> &dyn SimulationScheme {
        self.scheme.as_ref()
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut SimulationClock {
        &mut self.clock
    }

    /// The render pass, once the first tick has built it.
    pub fn pass(&self) -> Option<&RenderPass> {
        self.pass.as_ref()
    }

    pub fn projection(&self) -> Mat4 {
        self.projection.get()
    }

    pub fn viewport(&self) -> Vec2 {
        self.viewport.get()
    }

    /// Release every device object the system created.
    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        self.scheme.dispose(device);
        if let Some(mut pass) = self.pass.take() {
            pass.dispose(device);
        }
        self.buffers.dispose(device);
        self.shaders.dispose_all(device);
        self.device_seeded = false;
    }
}

impl std::fmt::Debug for ParticleSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticleSystem")
            .field("particles", &self.buffers.len())
            .field("scheme", &self.scheme.name())
            .field("step", &self.clock.step())
            .field("initialized", &self.pass.is_some())
            .finish()
    }
}
