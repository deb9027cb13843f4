//! Per-particle arrays shared by the simulation schemes and the render passes.
//!
//! Every array holds one entry per particle index and all of them share one
//! length. Schemes write the CPU side through [`ParticleArrays`]; the device
//! side only changes when the buffers are published.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::buffer::GpuBuffer;
use crate::device::GraphicsDevice;
use crate::passes::solid_sphere::{SphereBuffers, QUAD_VERTICES};

/// Trail bookkeeping for one particle.
///
/// `leader` and `velocity` are only meaningful on trail heads; `size` is
/// read at whatever slot currently leads the trail. The layout matches the
/// `TrailMeta` struct of the trail compute shader (32 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TrailMeta {
    /// Integrated velocity used by the force-field map mode.
    pub velocity: Vec3,
    /// Ring offset of the newest segment, relative to the trail head.
    pub leader: u32,
    /// Visual size of the particle.
    pub size: f32,
    pub _pad: [f32; 3],
}

impl TrailMeta {
    pub fn with_size(size: f32) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }
}

/// Mutable view over every CPU array at once.
pub struct ParticleArrays<'a> {
    pub position: &'a mut [Vec4],
    pub rotation: &'a mut [Mat4],
    pub dimension: &'a mut [Vec4],
    pub color: &'a mut [Vec4],
    pub meta: &'a mut [TrailMeta],
}

impl ParticleArrays<'_> {
    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }
}

/// Parallel particle arrays plus the quad the sphere pass instances.
#[derive(Debug)]
pub struct ParticleBuffers {
    pub position: GpuBuffer<Vec4>,
    pub rotation: GpuBuffer<Mat4>,
    pub dimension: GpuBuffer<Vec4>,
    pub color: GpuBuffer<Vec4>,
    pub meta: GpuBuffer<TrailMeta>,
    pub quad: GpuBuffer<Vec2>,
}

impl ParticleBuffers {
    /// `count` particles at the origin, identity frames, white, all of size
    /// `particle_size`.
    pub fn new(count: usize, particle_size: f32) -> Self {
        Self {
            position: GpuBuffer::from_vec("position_buffer", vec![Vec4::W; count]),
            rotation: GpuBuffer::from_vec("rotation_buffer", vec![Mat4::IDENTITY; count]),
            dimension: GpuBuffer::from_vec(
                "dimension_buffer",
                vec![Vec4::splat(particle_size); count],
            ),
            color: GpuBuffer::from_vec("color_buffer", vec![Vec4::ONE; count]),
            meta: GpuBuffer::from_vec("meta_buffer", vec![TrailMeta::with_size(particle_size); count]),
            quad: GpuBuffer::from_vec("quad_buffer", QUAD_VERTICES.to_vec())
                .with_usage(crate::device::BufferUsage::StaticDraw),
        }
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Borrow every CPU array mutably. Marks all of them unpublished.
    pub fn arrays_mut(&mut self) -> ParticleArrays<'_> {
        ParticleArrays {
            position: self.position.data_mut(),
            rotation: self.rotation.data_mut(),
            dimension: self.dimension.data_mut(),
            color: self.color.data_mut(),
            meta: self.meta.data_mut(),
        }
    }

    /// Upload every per-particle array and the quad.
    pub fn publish_all(&mut self, device: &mut dyn GraphicsDevice) {
        self.position.publish(device);
        self.rotation.publish(device);
        self.dimension.publish(device);
        self.color.publish(device);
        self.meta.publish(device);
        if !self.quad.is_published() {
            self.quad.publish(device);
        }
    }

    /// Upload the arrays the sphere pass reads.
    pub fn publish_render_inputs(&mut self, device: &mut dyn GraphicsDevice) {
        self.position.publish(device);
        self.dimension.publish(device);
        self.color.publish(device);
        if !self.quad.is_published() {
            self.quad.publish(device);
        }
    }

    /// Device handles for the sphere pass, creating the buffers if needed.
    pub fn sphere_buffers(&mut self, device: &mut dyn GraphicsDevice) -> SphereBuffers {
        SphereBuffers {
            position: self.position.handle(device),
            color: self.color.handle(device),
            dimension: self.dimension.handle(device),
            quad: self.quad.handle(device),
        }
    }

    /// Release every device buffer. CPU arrays are kept.
    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        self.position.dispose(device);
        self.rotation.dispose(device);
        self.dimension.dispose(device);
        self.color.dispose(device);
        self.meta.dispose(device);
        self.quad.dispose(device);
    }
}
