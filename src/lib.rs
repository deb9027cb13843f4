//! # CMPE - Chaotic Map Particle Engine
//!
//! Particle systems evolved by iterated chaotic maps, drawn as instanced
//! sphere impostors.
//!
//! The crate has two halves:
//!
//! - a GPU resource binding layer ([`shader`], [`program`], [`uniforms`],
//!   [`vertex`], [`storage`], [`framebuffer`], [`pass`]) that issues commands
//!   to any [`GraphicsDevice`](device::GraphicsDevice)
//! - a simulation engine ([`simulation`]) whose schemes rewrite the particle
//!   arrays once per frame
//!
//! [`ParticleSystem`] ties them together.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cmpe::prelude::*;
//!
//! let config = SystemConfig::new()
//!     .with_particle_count(16_384)
//!     .with_trail_size(32);
//!
//! // x' = -y, y' = x
//! let mut system = ParticleSystem::new(config, QuadraticMap::rotation())?;
//! let mut device = WgpuDevice::new_headless(1280, 720)?;
//! system.set_viewport(1280.0, 720.0);
//!
//! for frame in 0..600 {
//!     system.tick(&mut device, frame as f64 / 60.0)?;
//! }
//! ```
//!
//! ## Maps
//!
//! Any `Fn(&mut Vec4, &mut Vec4) + Send + Sync` is a [`ChaoticMap`]. The map
//! reads the current position and writes the next one; schemes interpret the
//! output as a position or, in [`MapMode::ForceField`], as a velocity.
//!
//! ```ignore
//! let lorenz = |p: &mut Vec4, out: &mut Vec4| {
//!     let (s, r, b) = (10.0, 28.0, 8.0 / 3.0);
//!     *out = Vec4::new(s * (p.y - p.x), p.x * (r - p.z) - p.y, p.x * p.y - b * p.z, 0.0);
//! };
//! ```
//!
//! ## Schemes
//!
//! | Scheme | Config `kind` |
//! |--------|---------------|
//! | [`ParticlesWithTrails`] | `trails` |
//! | [`GpuParticlesWithTrails`] | `trails_gpu` |
//! | [`IfsScheme`] | `ifs` |
//! | [`SingleStepScheme`] | `single_step` |
//!
//! ## Logging
//!
//! The crate logs through the `log` facade and never installs a logger.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod particles;
pub mod pass;
pub mod passes;
pub mod program;
pub mod resources;
pub mod shader;
pub mod simulation;
pub mod spawn;
pub mod state;
pub mod storage;
pub mod system;
pub mod uniforms;
pub mod vertex;

pub use bytemuck;
pub use clock::{SimulationClock, Tick};
pub use config::{SchemeConfig, SystemConfig};
pub use error::{Error, Result};
pub use glam::{Mat4, Vec2, Vec3, Vec4};
pub use particles::{ParticleArrays, ParticleBuffers, TrailMeta};
pub use simulation::{
    ChaoticMap, GpuParticlesWithTrails, IfsScheme, MapMode, ParticlesWithTrails, QuadraticMap,
    SimulationScheme, SingleStepScheme,
};
pub use spawn::{BubbleGenerator, ParticleGenerator, SpawnContext};
pub use system::ParticleSystem;

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use cmpe::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{SimulationClock, Tick};
    pub use crate::config::{SchemeConfig, SystemConfig};
    pub use crate::device::{GraphicsDevice, HeadlessDevice, WgpuDevice};
    pub use crate::pass::{PassStatus, RenderPass};
    pub use crate::passes::SphereTargets;
    pub use crate::resources::{DirectoryResources, LayeredResources, MemoryResources, ResourceLoader};
    pub use crate::shader::ShaderRegistry;
    pub use crate::simulation::{
        ChaoticMap, ComputeMetadata, GpuParticlesWithTrails, IfsColoring, IfsScheme,
        IntegrationStep, Interpolation, MapMode, ParticlesWithTrails, QuadraticMap,
        SimulationScheme, SingleStepScheme,
    };
    pub use crate::spawn::{BubbleGenerator, ParticleGenerator};
    pub use crate::system::ParticleSystem;
    pub use crate::uniforms::{MvpProviders, UniformBindingSet, ValueProvider};
    pub use crate::{Error, Result};
    pub use crate::{Mat4, Vec2, Vec3, Vec4};
}
