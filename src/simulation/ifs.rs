//! Iterated function system point clouds.
//!
//! The first `seed_count` particles form a ring of seeds. Each tick moves a
//! ring pointer by one and, starting `seed_count` slots past it, maps every
//! `seed_count`-th particle from the one `seed_count` slots earlier. Over
//! many ticks every slot gets visited and the cloud fills in.

use glam::Vec4;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::speed_bound::SpeedBound;
use super::{SimulationContext, SimulationScheme, StepContinuity};
use crate::error::Error;

/// Default ring size.
pub const DEFAULT_SEED_COUNT: usize = 150;

/// Lowest value the speed bound decays to.
pub const SPEED_FLOOR: f32 = 1.0;

const FAST: Vec4 = Vec4::new(1.0, 0.2, 0.2, 1.0);
const SLOW: Vec4 = Vec4::new(0.2, 1.0, 0.2, 1.0);

/// Particle coloring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfsColoring {
    /// Blend from green to red by speed relative to the running bound.
    #[default]
    Distance,
    /// Always green.
    Fixed,
}

#[derive(Debug)]
pub struct IfsScheme {
    pub seed_count: usize,
    pub coloring: IfsColoring,
    speed_bound: SpeedBound,
    continuity: StepContinuity,
    ring: usize,
    rng: SmallRng,
}

impl Default for IfsScheme {
    fn default() -> Self {
        Self {
            seed_count: DEFAULT_SEED_COUNT,
            coloring: IfsColoring::default(),
            speed_bound: SpeedBound::new(SPEED_FLOOR),
            continuity: StepContinuity::default(),
            ring: 0,
            rng: SmallRng::from_entropy(),
        }
    }
}

impl IfsScheme {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed_count(mut self, seed_count: usize) -> Self {
        self.seed_count = seed_count;
        self
    }

    pub fn with_coloring(mut self, coloring: IfsColoring) -> Self {
        self.coloring = coloring;
        self
    }

    /// Reproducible seeds.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn speed_bound(&self) -> f32 {
        self.speed_bound.get()
    }

    /// Current ring pointer.
    pub fn ring(&self) -> usize {
        self.ring
    }
}

impl SimulationScheme for IfsScheme {
    fn name(&self) -> &str {
        "IFSScheme"
    }

    fn simulate(&mut self, ctx: &mut SimulationContext<'_>, _time: f32, step: u64) -> Result<(), Error> {
        let reseed = self.continuity.observe(step);
        let mut bound = self.speed_bound.decay(SPEED_FLOOR);

        let stride = self.seed_count.max(1);
        let dt = ctx.params.dt;
        let arrays = ctx.buffers.arrays_mut();
        let count = arrays.len();
        if count == 0 {
            return Ok(());
        }

        self.ring = (self.ring + 1) % stride;

        if reseed {
            log::debug!("ifs: reseeding {} seeds at step {}", stride.min(count), step);
            for i in 0..stride.min(count) {
                arrays.position[i] = Vec4::new(self.rng.gen::<f32>() * 0.01, 0.0, 0.0, 1.0);
                arrays.dimension[i] = Vec4::ZERO;
            }
            self.continuity.mark_seeded();
        }

        for i in (self.ring + stride..count).step_by(stride) {
            // the map works on a copy; earlier stride points stay as they are
            let source = arrays.position[i - stride];
            let mut input = source;
            let mut next = arrays.position[i];
            ctx.map.map(&mut input, &mut next);
            next.w = 1.0;
            arrays.position[i] = next;
            arrays.dimension[i] = Vec4::splat(arrays.meta[i].size);

            arrays.color[i] = match self.coloring {
                IfsColoring::Distance => {
                    let distance = (next - source).length();
                    let speed = if dt > 0.0 { distance / dt } else { 0.0 };
                    let a = (2.0 * speed / bound).clamp(0.0, 1.0);
                    bound = bound.max(speed);
                    FAST * a + SLOW * (1.0 - a)
                }
                IfsColoring::Fixed => SLOW,
            };
        }
        self.speed_bound.propose(bound);
        Ok(())
    }
}
