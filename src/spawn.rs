//! Particle (re)initialization.
//!
//! Schemes that need fresh particles call a [`ParticleGenerator`] once per
//! index. [`SpawnContext`] carries the per-particle RNG and the placement
//! helpers generators are written with.

use glam::{Mat4, Vec3, Vec4};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

use crate::particles::ParticleArrays;

/// Per-particle helpers for generators.
///
/// ```ignore
/// let mut ctx = SpawnContext::new(i, count, seed);
/// let p = ctx.random_in_sphere(0.5);
/// let c = ctx.rainbow(0.8, 1.0);
/// ```
pub struct SpawnContext {
    /// Index of the particle being spawned.
    pub index: u32,
    /// Number of particles in the system.
    pub count: u32,
    rng: SmallRng,
}

impl SpawnContext {
    /// Context whose RNG is derived from `seed` and `index`, so the same
    /// seed reproduces the same particle.
    pub fn new(index: u32, count: u32, seed: u64) -> Self {
        let mixed = seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self {
            index,
            count,
            rng: SmallRng::seed_from_u64(mixed),
        }
    }

    /// `index / count`, or zero for an empty system.
    #[inline]
    pub fn progress(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        self.index as f32 / self.count as f32
    }

    /// Uniform in `[0, 1)`.
    #[inline]
    pub fn random(&mut self) -> f32 {
        self.rng.gen()
    }

    /// Random point inside a ball of `radius`, uniform in volume.
    pub fn random_in_sphere(&mut self, radius: f32) -> Vec3 {
        let z: f32 = self.rng.gen_range(-1.0..=1.0);
        let theta = self.rng.gen_range(0.0..TAU);
        let ring = (1.0 - z * z).max(0.0).sqrt();
        let r = radius * self.rng.gen::<f32>().cbrt();
        Vec3::new(ring * theta.cos(), ring * theta.sin(), z) * r
    }

    /// Hue swept by [`progress`](Self::progress).
    pub fn rainbow(&self, saturation: f32, value: f32) -> Vec3 {
        hsv_to_rgb(self.progress(), saturation, value)
    }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Vec3 {
    let sector = (h.fract() * 6.0).min(5.999);
    let c = v * s;
    let x = c * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    Vec3::splat(v - c) + Vec3::new(r, g, b)
}

/// Writes a fresh particle into every array at one index.
pub trait ParticleGenerator {
    fn make_bubble(&mut self, arrays: &mut ParticleArrays<'_>, index: usize);
}

/// Scatters particles uniformly through a ball.
///
/// Resets the trail bookkeeping of the slot and keeps its size.
#[derive(Clone, Debug)]
pub struct BubbleGenerator {
    pub center: Vec3,
    pub radius: f32,
    pub seed: u64,
    /// Rainbow colors by index instead of white.
    pub rainbow: bool,
}

impl Default for BubbleGenerator {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            radius: 1.0,
            seed: 42,
            rainbow: true,
        }
    }
}

impl BubbleGenerator {
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            ..Self::default()
        }
    }

    pub fn with_center(mut self, center: Vec3) -> Self {
        self.center = center;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_rainbow(mut self, rainbow: bool) -> Self {
        self.rainbow = rainbow;
        self
    }
}

impl ParticleGenerator for BubbleGenerator {
    fn make_bubble(&mut self, arrays: &mut ParticleArrays<'_>, index: usize) {
        let mut ctx = SpawnContext::new(index as u32, arrays.len() as u32, self.seed);
        let position = self.center + ctx.random_in_sphere(self.radius);
        let color = if self.rainbow {
            ctx.rainbow(0.8, 1.0)
        } else {
            Vec3::ONE
        };

        let meta = &mut arrays.meta[index];
        meta.leader = 0;
        meta.velocity = Vec3::ZERO;
        let size = meta.size;

        arrays.position[index] = position.extend(1.0);
        arrays.rotation[index] = Mat4::IDENTITY;
        arrays.dimension[index] = Vec4::splat(size);
        arrays.color[index] = color.extend(1.0);
    }
}
