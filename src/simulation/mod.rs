//! Simulation schemes: per-tick algorithms that rewrite the particle arrays.
//!
//! A scheme is constructed once and then called every frame with the same
//! [`SimulationContext`] shape. Schemes keep transient state between ticks
//! (decaying speed bounds, ring pointers, seed flags), so one instance must
//! never run two ticks at once.
//!
//! | Scheme | Runs on | Behaviour |
//! |---|---|---|
//! | [`ParticlesWithTrails`] | CPU, one rayon task per bundle | Trails advanced by the map |
//! | [`GpuParticlesWithTrails`] | device compute dispatch | Same trails, on the device |
//! | [`IfsScheme`] | CPU | Strided iterated-function-system point cloud |
//! | [`SingleStepScheme`] | CPU | Reseed and map once per step discontinuity |

pub mod gpu_trails;
pub mod ifs;
pub mod maps;
pub mod single_step;
pub mod speed_bound;
pub mod trails;

use glam::Vec4;

pub use gpu_trails::GpuParticlesWithTrails;
pub use ifs::{IfsColoring, IfsScheme};
pub use maps::QuadraticMap;
pub use single_step::SingleStepScheme;
pub use speed_bound::SpeedBound;
pub use trails::{
    hermite_weights, ComputeMetadata, IntegrationStep, Interpolation, MapMode, ParticlesWithTrails,
    TrailLayout,
};

use crate::device::GraphicsDevice;
use crate::error::Error;
use crate::particles::ParticleBuffers;
use crate::shader::ShaderRegistry;
use crate::spawn::ParticleGenerator;

/// Opaque chaotic map plugin.
///
/// `map` evaluates the map at `position` and writes the result into `out`.
/// It may also move `position`; callers store it back. Implementations are
/// called concurrently from disjoint index ranges and must not keep mutable
/// state of their own.
pub trait ChaoticMap: Send + Sync {
    fn map(&self, position: &mut Vec4, out: &mut Vec4);

    /// Tunable coefficients uploaded to device-resident schemes.
    fn parameters(&self) -> &[f32] {
        &[]
    }
}

impl<F> ChaoticMap for F
where
    F: Fn(&mut Vec4, &mut Vec4) + Send + Sync,
{
    fn map(&self, position: &mut Vec4, out: &mut Vec4) {
        self(position, out)
    }
}

/// Where a scheme leaves its results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    /// Results are in the CPU arrays; publish them every frame.
    Cpu,
    /// Results are written on the device; publish only at initialization so
    /// they are not overwritten.
    Device,
}

/// Numeric settings shared by every scheme.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationParams {
    /// Integration step.
    pub dt: f32,
    /// Slots per trail.
    pub trail_size: usize,
    pub steps_per_frame: usize,
    /// Multiplier applied to particle sizes when spacing trail segments.
    pub particle_scale: f32,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            dt: 0.005,
            trail_size: 16,
            steps_per_frame: 1,
            particle_scale: 1.0,
        }
    }
}

/// Everything a scheme may touch during one tick.
pub struct SimulationContext<'a> {
    pub buffers: &'a mut ParticleBuffers,
    pub device: &'a mut dyn GraphicsDevice,
    pub shaders: &'a mut ShaderRegistry,
    pub map: &'a dyn ChaoticMap,
    pub generator: &'a mut dyn ParticleGenerator,
    pub params: SimulationParams,
}

/// One per-frame simulation algorithm.
pub trait SimulationScheme {
    fn name(&self) -> &str;

    fn residency(&self) -> Residency {
        Residency::Cpu
    }

    /// Advance the particle arrays by one tick.
    ///
    /// `step` is the frame driver's step counter; a value that is not exactly
    /// one more than the previous call's marks a discontinuity.
    fn simulate(&mut self, ctx: &mut SimulationContext<'_>, time: f32, step: u64) -> Result<(), Error>;

    /// Release any device objects the scheme created.
    fn dispose(&mut self, _device: &mut dyn GraphicsDevice) {}
}

/// Tracks whether the step counter advanced by exactly one since the last
/// tick, and whether the current run has been seeded.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StepContinuity {
    previous: Option<u64>,
    seeded: bool,
}

impl StepContinuity {
    /// Record `step`. Returns `true` when the scheme must (re)seed.
    pub(crate) fn observe(&mut self, step: u64) -> bool {
        let continuous = self
            .previous
            .is_some_and(|previous| step == previous.wrapping_add(1));
        self.previous = Some(step);
        self.seeded &= continuous;
        !self.seeded
    }

    pub(crate) fn mark_seeded(&mut self) {
        self.seeded = true;
    }
}
