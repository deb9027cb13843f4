//! Particles with trails, advanced on the CPU.
//!
//! The particle array is cut into trails of `trail_size` slots and trails
//! into bundles of `bundle_size`. Trails of one bundle are interleaved: the
//! bundle starting at `first` owns `first .. first + trail_size * bundle_size`,
//! its trail heads are `first .. first + bundle_size`, and slot `m` of the
//! trail with head `h` is `h + m * bundle_size`. Each head's `meta.leader` is
//! a ring offset (a multiple of `bundle_size`) pointing at the newest slot.
//!
//! Bundles are contiguous and disjoint, so each rayon task gets its own
//! sub-slices of every array and no index is touched by two tasks.

use std::ops::Range;

use glam::{Mat4, Vec4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::speed_bound::SpeedBound;
use super::{ChaoticMap, SimulationContext, SimulationParams, SimulationScheme};
use crate::error::Error;
use crate::particles::{ParticleArrays, TrailMeta};

/// Lowest value the speed bound decays to.
pub const SPEED_FLOOR: f32 = 0.01;

/// Smallest particle size used for segment spacing.
const MIN_SIZE: f32 = f32::EPSILON;

/// How the map output drives the trail head.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapMode {
    /// The map output is the positional delta.
    #[default]
    Direct,
    /// The map output is an acceleration integrated into a per-trail
    /// velocity; the velocity is the delta.
    ForceField,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStep {
    /// Scale the step so one tick moves at most ten particle sizes.
    #[default]
    LimitDelta,
    DoNotLimit,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Hermite blend through two extra map samples.
    #[default]
    Cubic,
    Linear,
}

/// What is written into the color array of each new segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeMetadata {
    /// Unit tangent of the trail.
    #[default]
    Tangent,
    /// The scaled delta.
    Speed,
}

/// Partition of the particle index space into trails and bundles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrailLayout {
    pub particle_count: usize,
    pub trail_size: usize,
    pub bundle_size: usize,
}

impl TrailLayout {
    /// Trail and bundle sizes are clamped to at least one.
    pub fn new(particle_count: usize, trail_size: usize, bundle_size: usize) -> Self {
        Self {
            particle_count,
            trail_size: trail_size.max(1),
            bundle_size: bundle_size.max(1),
        }
    }

    pub fn trail_count(&self) -> usize {
        self.particle_count.div_ceil(self.trail_size)
    }

    pub fn bundle_count(&self) -> usize {
        self.trail_count().div_ceil(self.bundle_size)
    }

    /// Slots owned by one bundle; also the ring modulus of the leader offset.
    pub fn span(&self) -> usize {
        self.trail_size * self.bundle_size
    }

    /// Indices owned by `bundle`.
    pub fn bundle_range(&self, bundle: usize) -> Range<usize> {
        let start = (bundle * self.span()).min(self.particle_count);
        let end = ((bundle + 1) * self.span()).min(self.particle_count);
        start..end
    }

    /// Trail heads of `bundle`.
    pub fn heads(&self, bundle: usize) -> Range<usize> {
        let first = bundle * self.span();
        first.min(self.particle_count)..(first + self.bundle_size).min(self.particle_count)
    }

    /// Next ring offset after `leader` for the trail headed at `head`.
    ///
    /// Wraps modulo [`span`](Self::span), and falls back to the head itself
    /// when the slot would lie past the end of the array.
    #[inline]
    pub fn advance(&self, head: usize, leader: usize) -> usize {
        let next = (leader + self.bundle_size) % self.span();
        if head + next >= self.particle_count {
            0
        } else {
            next
        }
    }
}

/// Cubic Hermite weights for the leader position, the start tangent, the
/// end position and the end tangent at parameter `t`.
///
/// The two position weights always sum to one; at `t = 1` the blend is the
/// end position exactly.
#[inline]
pub fn hermite_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    let p1 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let p2 = t3 - 2.0 * t2 + t;
    let p3 = 1.0 - p1;
    let p4 = p2 + t2 - t;
    [p1, p2, p3, p4]
}

/// Settings of one trail advance, resolved from the scheme and the params.
#[derive(Clone, Copy, Debug)]
struct TrailStep {
    layout: TrailLayout,
    dt: f32,
    steps: usize,
    particle_scale: f32,
    map_mode: MapMode,
    integration_step: IntegrationStep,
    interpolation: Interpolation,
    metadata: ComputeMetadata,
}

/// One bundle's sub-slices of every array. Indices are bundle-local.
struct TrailBundle<'a> {
    position: &'a mut [Vec4],
    rotation: &'a mut [Mat4],
    dimension: &'a mut [Vec4],
    color: &'a mut [Vec4],
    meta: &'a mut [TrailMeta],
}

impl TrailBundle<'_> {
    /// Advance every trail of the bundle. Returns the peak map speed seen.
    fn advance(&mut self, step: &TrailStep, map: &dyn ChaoticMap) -> f32 {
        let local = TrailLayout::new(self.position.len(), step.layout.trail_size, step.layout.bundle_size);
        let heads = local.heads(0);
        let mut peak = 0.0f32;

        for _ in 0..step.steps {
            for head in heads.clone() {
                let speed = self.advance_trail(step, &local, map, head);
                peak = peak.max(speed);
            }
        }
        peak
    }

    fn advance_trail(
        &mut self,
        step: &TrailStep,
        local: &TrailLayout,
        map: &dyn ChaoticMap,
        head: usize,
    ) -> f32 {
        let mut leader = self.meta[head].leader as usize;
        if head + leader >= local.particle_count {
            leader = 0;
        }
        let pi = head + leader;
        let size = self.meta[pi].size.max(MIN_SIZE);
        let spacing = size * step.particle_scale;
        let dt = step.dt;

        let mut lead = self.position[pi];
        let mut dp = Vec4::ZERO;
        match step.map_mode {
            MapMode::ForceField => {
                dp = self.meta[head].velocity.extend(0.0);
                let mut accel = Vec4::ZERO;
                map.map(&mut lead, &mut accel);
                self.meta[head].velocity += accel.truncate() * dt;
            }
            MapMode::Direct => map.map(&mut lead, &mut dp),
        }
        self.position[pi] = lead;
        let speed = dp.length();

        let up = self.rotation[pi].y_axis.truncate();
        let b0 = dp.truncate();
        let b2 = b0.cross(up);
        let b1 = b2.cross(b0);
        let (b0, b1, b2) = (b0.normalize_or_zero(), b1.normalize_or_zero(), b2.normalize_or_zero());

        let mut k = dt;
        if step.integration_step == IntegrationStep::LimitDelta && speed > 0.0 {
            k *= (10.0 * spacing / (speed * dt)).min(1.0);
        }
        if step.interpolation == Interpolation::Cubic {
            k *= 0.5;
        }
        let dp = dp * k;

        let count = if spacing > 0.0 {
            (dp.length() / spacing).ceil()
        } else {
            local.trail_size as f32
        };
        // NaN casts to zero
        let local_count = count.min(local.trail_size as f32).max(0.0) as usize;
        if local_count == 0 {
            return speed;
        }

        let (start_tangent, end, end_tangent) = match step.interpolation {
            Interpolation::Cubic => {
                let mut mid = lead + dp;
                let mut dp_b = Vec4::ZERO;
                map.map(&mut mid, &mut dp_b);
                let mut end = mid + dp_b * k;
                map.map(&mut end, &mut dp_b);
                (dp * 2.0, end, dp_b * (2.0 * k))
            }
            Interpolation::Linear => (dp, lead + dp, dp),
        };

        let frame = Mat4::from_cols(b0.extend(0.0), b1.extend(0.0), b2.extend(0.0), Vec4::W);
        let attribute = match step.metadata {
            ComputeMetadata::Speed => dp,
            ComputeMetadata::Tangent => b0.extend(0.0),
        };

        for li in 0..local_count {
            leader = local.advance(head, leader);
            let ii = head + leader;
            let t = (li + 1) as f32 / local_count as f32;
            self.position[ii] = match step.interpolation {
                Interpolation::Cubic => {
                    let [p1, p2, p3, p4] = hermite_weights(t);
                    lead * p1 + start_tangent * p2 + end * p3 + end_tangent * p4
                }
                Interpolation::Linear => lead + dp * t,
            };
            self.dimension[ii] = Vec4::splat(size);
            self.rotation[ii] = frame;
            self.color[ii] = attribute;
        }
        self.meta[head].leader = leader as u32;
        speed
    }
}

/// CPU trail scheme. One rayon task per bundle.
#[derive(Debug)]
pub struct ParticlesWithTrails {
    pub map_mode: MapMode,
    pub integration_step: IntegrationStep,
    pub interpolation: Interpolation,
    pub trail_bundle_size: usize,
    pub metadata: ComputeMetadata,
    speed_bound: SpeedBound,
}

impl Default for ParticlesWithTrails {
    fn default() -> Self {
        Self {
            map_mode: MapMode::default(),
            integration_step: IntegrationStep::default(),
            interpolation: Interpolation::default(),
            trail_bundle_size: 8,
            metadata: ComputeMetadata::default(),
            speed_bound: SpeedBound::new(SPEED_FLOOR),
        }
    }
}

impl ParticlesWithTrails {
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

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_trail_bundle_size(mut self, size: usize) -> Self {
        self.trail_bundle_size = size;
        self
    }

    pub fn with_metadata(mut self, metadata: ComputeMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Current bound on observed map speed.
    pub fn speed_bound(&self) -> f32 {
        self.speed_bound.get()
    }

    /// Advance every trail in `arrays` by one tick.
    pub fn advance(&self, arrays: ParticleArrays<'_>, map: &dyn ChaoticMap, params: &SimulationParams) {
        self.speed_bound.decay(SPEED_FLOOR);

        let step = TrailStep {
            layout: TrailLayout::new(arrays.len(), params.trail_size, self.trail_bundle_size),
            dt: params.dt,
            steps: params.steps_per_frame.max(1),
            particle_scale: params.particle_scale,
            map_mode: self.map_mode,
            integration_step: self.integration_step,
            interpolation: self.interpolation,
            metadata: self.metadata,
        };
        let span = step.layout.span();
        if arrays.is_empty() {
            return;
        }

        let ParticleArrays {
            position,
            rotation,
            dimension,
            color,
            meta,
        } = arrays;

        let bundles: Vec<TrailBundle<'_>> = position
            .chunks_mut(span)
            .zip(rotation.chunks_mut(span))
            .zip(dimension.chunks_mut(span))
            .zip(color.chunks_mut(span))
            .zip(meta.chunks_mut(span))
            .map(|((((position, rotation), dimension), color), meta)| TrailBundle {
                position,
                rotation,
                dimension,
                color,
                meta,
            })
            .collect();

        let bound = &self.speed_bound;
        bundles.into_par_iter().for_each(|mut bundle| {
            let peak = bundle.advance(&step, map);
            bound.propose(peak);
        });
    }
}

impl SimulationScheme for ParticlesWithTrails {
    fn name(&self) -> &str {
        "ParticlesWithTrails"
    }

    fn simulate(&mut self, ctx: &mut SimulationContext<'_>, _time: f32, _step: u64) -> Result<(), Error> {
        let params = ctx.params;
        self.advance(ctx.buffers.arrays_mut(), ctx.map, &params);
        Ok(())
    }
}
