//! One-shot scheme: reseed every particle and map it once.
//!
//! Runs on the first tick and again whenever the step counter jumps; ticks
//! in between leave the arrays alone.

use super::{SimulationContext, SimulationScheme, StepContinuity};
use crate::error::Error;

#[derive(Debug, Default)]
pub struct SingleStepScheme {
    continuity: StepContinuity,
}

impl SingleStepScheme {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimulationScheme for SingleStepScheme {
    fn name(&self) -> &str {
        "SingleStepScheme"
    }

    fn simulate(&mut self, ctx: &mut SimulationContext<'_>, _time: f32, step: u64) -> Result<(), Error> {
        if !self.continuity.observe(step) {
            return Ok(());
        }

        let mut arrays = ctx.buffers.arrays_mut();
        log::debug!("single step: reseeding {} particles at step {}", arrays.len(), step);
        for i in 0..arrays.len() {
            ctx.generator.make_bubble(&mut arrays, i);
            let mut position = arrays.position[i];
            let mut mapped = position;
            ctx.map.map(&mut position, &mut mapped);
            mapped.w = 1.0;
            arrays.position[i] = mapped;
        }
        self.continuity.mark_seeded();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use crate::particles::ParticleBuffers;
    use crate::shader::ShaderRegistry;
    use crate::simulation::SimulationParams;
    use crate::spawn::BubbleGenerator;
    use glam::{Vec3, Vec4};

    fn double(p: &mut Vec4, out: &mut Vec4) {
        *out = *p * 2.0;
    }

    fn run(scheme: &mut SingleStepScheme, buffers: &mut ParticleBuffers, step: u64) {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::builtin();
        let mut generator = BubbleGenerator::new(1.0).with_center(Vec3::new(10.0, 0.0, 0.0));
        let mut ctx = SimulationContext {
            buffers,
            device: &mut device,
            shaders: &mut shaders,
            map: &double,
            generator: &mut generator,
            params: SimulationParams::default(),
        };
        scheme.simulate(&mut ctx, 0.0, step).unwrap();
    }

    #[test]
    fn test_seeds_and_maps_once() {
        let mut buffers = ParticleBuffers::new(16, 0.05);
        let mut scheme = SingleStepScheme::new();
        run(&mut scheme, &mut buffers, 1);

        for p in buffers.position.data() {
            // bubble around x = 10 of radius 1, doubled
            assert!(p.x >= 18.0 - 1e-3 && p.x <= 22.0 + 1e-3);
            assert_eq!(p.w, 1.0);
        }
    }

    #[test]
    fn test_consecutive_steps_are_no_ops() {
        let mut buffers = ParticleBuffers::new(4, 0.05);
        let mut scheme = SingleStepScheme::new();
        run(&mut scheme, &mut buffers, 1);
        let first = buffers.position.data().to_vec();

        let marker = Vec4::new(-1.0, -1.0, -1.0, 1.0);
        buffers.position.data_mut()[0] = marker;
        run(&mut scheme, &mut buffers, 2);
        assert_eq!(buffers.position.data()[0], marker);

        run(&mut scheme, &mut buffers, 5);
        // the generator is seeded, so the same bubble comes back
        assert_eq!(buffers.position.data(), first.as_slice());
    }
}
