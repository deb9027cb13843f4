//! Ready-made render pass factories.

pub mod solid_sphere;

pub use solid_sphere::{solid_sphere, SphereBuffers, SphereParameters, SphereTargets};
