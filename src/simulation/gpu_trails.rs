//! Particles with trails, advanced by a compute dispatch.
//!
//! The program, storage bindings and the coefficient buffer are created on
//! the first tick and reused afterwards. Every tick re-uploads the map
//! coefficients, refreshes the uniforms and dispatches one invocation per
//! particle in workgroups of [`WORKGROUP_SIZE`].

use super::speed_bound::SpeedBound;
use super::trails::{IntegrationStep, MapMode, SPEED_FLOOR};
use super::{Residency, SimulationContext, SimulationScheme};
use crate::buffer::GpuBuffer;
use crate::device::GraphicsDevice;
use crate::error::{DeviceError, Error};
use crate::program::ShaderProgram;
use crate::state::StatePart;
use crate::storage::ShaderStorageSet;
use crate::uniforms::UniformBindingSet;

/// Compute shader resource, which includes `chaotic_map.wgsl`.
pub const COMPUTE_SHADER: &str = "particles_with_trails.comp.wgsl";

/// Invocations per workgroup in [`COMPUTE_SHADER`].
pub const WORKGROUP_SIZE: u32 = 8;

struct DeviceState {
    program: ShaderProgram,
    storage: ShaderStorageSet,
    uniforms: UniformBindingSet,
    parameters: GpuBuffer<f32>,
    reported_unlinked: bool,
}

/// Device-resident trail scheme.
pub struct GpuParticlesWithTrails {
    pub map_mode: MapMode,
    pub integration_step: IntegrationStep,
    pub trail_bundle_size: usize,
    speed_bound: SpeedBound,
    state: Option<DeviceState>,
}

impl Default for GpuParticlesWithTrails {
    fn default() -> Self {
        Self {
            map_mode: MapMode::default(),
            integration_step: IntegrationStep::default(),
            trail_bundle_size: 8,
            speed_bound: SpeedBound::new(SPEED_FLOOR),
            state: None,
        }
    }
}

impl GpuParticlesWithTrails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_map_mode(mut self, mode: MapMode) -> Self {
        self.map_mode = mode;
        self
    }

    pub fn with_integration_step(mut self, step: IntegrationStep) -> Self {
        self.integration_step = step;
        self
    }

    pub fn with_trail_bundle_size(mut self, size: usize) -> Self {
        self.trail_bundle_size = size;
        self
    }

    pub fn speed_bound(&self) -> f32 {
        self.speed_bound.get()
    }

    /// The compute program, once the first tick has built it.
    pub fn program(&self) -> Option<&ShaderProgram> {
        self.state.as_ref().map(|state| &state.program)
    }

    /// Workgroups needed to cover `particle_count` invocations.
    ///
    /// Fails when the count does not fit in one dispatch's `u32` range.
    pub fn workgroups(particle_count: usize) -> Result<u32, DeviceError> {
        let count = u32::try_from(particle_count).map_err(|_| {
            DeviceError::Validation(format!("{particle_count} particles exceed one dispatch"))
        })?;
        Ok(count.div_ceil(WORKGROUP_SIZE))
    }
}

impl SimulationScheme for GpuParticlesWithTrails {
    fn name(&self) -> &str {
        "ParticlesWithTrails (Gpu)"
    }

    fn residency(&self) -> Residency {
        Residency::Device
    }

    fn simulate(&mut self, ctx: &mut SimulationContext<'_>, _time: f32, _step: u64) -> Result<(), Error> {
        self.speed_bound.decay(SPEED_FLOOR);

        if self.state.is_none() {
            let shader = ctx.shaders.load(COMPUTE_SHADER)?;
            self.state = Some(DeviceState {
                program: ShaderProgram::new("SimulationScheme", vec![shader]),
                storage: ShaderStorageSet::new(),
                uniforms: UniformBindingSet::new(),
                parameters: GpuBuffer::zeroed("map_parameters_buffer", 1),
                reported_unlinked: false,
            });
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        let device = &mut *ctx.device;
        if !state.program.ensure_linked(device)? {
            if !state.reported_unlinked {
                log::warn!("gpu trail scheme: compute program did not link, dispatch skipped");
                state.reported_unlinked = true;
            }
            return Ok(());
        }

        let mut coefficients = ctx.map.parameters().to_vec();
        if coefficients.is_empty() {
            // zero-sized storage bindings are invalid
            coefficients.push(0.0);
        }
        state.parameters.set_data(coefficients);
        let parameters = state.parameters.publish(device);

        state
            .storage
            .set("Position", ctx.buffers.position.handle(device))
            .set("Rotation", ctx.buffers.rotation.handle(device))
            .set("Meta", ctx.buffers.meta.handle(device))
            .set("MapParameters", parameters);

        let params = ctx.params;
        state
            .uniforms
            .set("u_Dt", params.dt)
            .set("u_TrailSize", params.trail_size.max(1) as u32)
            .set("u_TrailBundleSize", self.trail_bundle_size.max(1) as u32)
            .set("u_StepsPerFrame", params.steps_per_frame.max(1) as u32)
            .set("u_MapMode", u32::from(self.map_mode == MapMode::ForceField))
            .set(
                "u_LimitDelta",
                u32::from(self.integration_step == IntegrationStep::LimitDelta),
            )
            .set("u_ParticleScale", params.particle_scale);

        state.program.activate(device)?;
        state.storage.activate(device)?;
        state.uniforms.activate(device)?;

        let groups = Self::workgroups(ctx.buffers.len())?;
        if groups > 0 {
            device.dispatch_compute(groups, 1, 1)?;
        }
        Ok(())
    }

    fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(mut state) = self.state.take() {
            state.program.dispose(device);
            state.parameters.dispose(device);
        }
    }
}

impl std::fmt::Debug for GpuParticlesWithTrails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuParticlesWithTrails")
            .field("map_mode", &self.map_mode)
            .field("integration_step", &self.integration_step)
            .field("trail_bundle_size", &self.trail_bundle_size)
            .field("initialized", &self.state.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCommand, HeadlessDevice};
    use crate::particles::ParticleBuffers;
    use crate::shader::ShaderRegistry;
    use crate::simulation::{QuadraticMap, SimulationParams};
    use crate::spawn::BubbleGenerator;

    fn tick(
        scheme: &mut GpuParticlesWithTrails,
        device: &mut HeadlessDevice,
        shaders: &mut ShaderRegistry,
        buffers: &mut ParticleBuffers,
        map: &QuadraticMap,
    ) {
        let mut generator = BubbleGenerator::default();
        let mut ctx = SimulationContext {
            buffers,
            device,
            shaders,
            map,
            generator: &mut generator,
            params: SimulationParams::default(),
        };
        scheme.simulate(&mut ctx, 0.0, 1).unwrap();
    }

    #[test]
    fn test_workgroups_cover_particles() {
        assert_eq!(GpuParticlesWithTrails::workgroups(0).unwrap(), 0);
        assert_eq!(GpuParticlesWithTrails::workgroups(8).unwrap(), 1);
        assert_eq!(GpuParticlesWithTrails::workgroups(9).unwrap(), 2);
        assert_eq!(GpuParticlesWithTrails::workgroups(1000).unwrap(), 125);
        assert_eq!(GpuParticlesWithTrails::workgroups(u32::MAX as usize).unwrap(), 536_870_912);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_workgroups_reject_counts_past_u32() {
        let count = u32::MAX as usize + 1;
        assert!(matches!(
            GpuParticlesWithTrails::workgroups(count),
            Err(DeviceError::Validation(_))
        ));
        // 2^32 + 8 used to wrap to 8 particles, one workgroup
        assert!(GpuParticlesWithTrails::workgroups(count + 8).is_err());
    }

    #[test]
    fn test_dispatch_after_lazy_setup() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::builtin();
        let mut buffers = ParticleBuffers::new(100, 0.02);
        let map = QuadraticMap::rotation();
        let mut scheme = GpuParticlesWithTrails::new();

        tick(&mut scheme, &mut device, &mut shaders, &mut buffers, &map);
        tick(&mut scheme, &mut device, &mut shaders, &mut buffers, &map);

        assert!(scheme.program().unwrap().is_linked(), "{:?}", scheme.program().unwrap().shader_logs());
        assert_eq!(device.count(|c| matches!(c, DeviceCommand::LinkProgram { .. })), 1);
        let dispatches: Vec<_> = device
            .commands()
            .iter()
            .filter(|c| matches!(c, DeviceCommand::Dispatch { .. }))
            .collect();
        assert_eq!(dispatches.len(), 2);
        assert_eq!(dispatches[0], &DeviceCommand::Dispatch { x: 13, y: 1, z: 1 });
    }

    #[test]
    fn test_coefficients_uploaded_each_tick() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::builtin();
        let mut buffers = ParticleBuffers::new(16, 0.02);
        let mut scheme = GpuParticlesWithTrails::new();

        tick(&mut scheme, &mut device, &mut shaders, &mut buffers, &QuadraticMap::new(vec![1.0, 2.0]));
        tick(&mut scheme, &mut device, &mut shaders, &mut buffers, &QuadraticMap::new(vec![3.0]));

        let handle = scheme.state.as_ref().unwrap().parameters.existing_handle().unwrap();
        let uploaded: &[f32] = bytemuck::cast_slice(device.buffer_contents(handle).unwrap());
        assert_eq!(uploaded, &[3.0]);
    }

    #[test]
    fn test_dispose_releases_program() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::builtin();
        let mut buffers = ParticleBuffers::new(16, 0.02);
        let mut scheme = GpuParticlesWithTrails::new();
        tick(&mut scheme, &mut device, &mut shaders, &mut buffers, &QuadraticMap::rotation());

        scheme.dispose(&mut device);
        assert!(scheme.program().is_none());
        assert_eq!(device.live_programs(), 0);
    }
}
