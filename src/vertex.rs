//! Vertex attribute layouts.

use crate::device::{BufferHandle, GraphicsDevice, VertexAttribType};
use crate::error::Error;
use crate::state::StatePart;

/// One named vertex input fed from a device buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Name of the vertex input in the shader.
    pub name: String,
    pub buffer: BufferHandle,
    /// Number of components (1 to 4).
    pub size: u32,
    pub attrib_type: VertexAttribType,
    /// Byte distance between consecutive elements; 0 means tightly packed.
    pub stride: u32,
    pub offset: u32,
    /// 0 advances per vertex, N advances once every N instances.
    pub divisor: u32,
}

impl VertexAttribute {
    /// Float attribute with `size` components, tightly packed, per vertex.
    pub fn new(name: impl Into<String>, buffer: BufferHandle, size: u32) -> Self {
        Self {
            name: name.into(),
            buffer,
            size,
            attrib_type: VertexAttribType::Float,
            stride: 0,
            offset: 0,
            divisor: 0,
        }
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_divisor(mut self, divisor: u32) -> Self {
        self.divisor = divisor;
        self
    }

    pub fn with_type(mut self, attrib_type: VertexAttribType) -> Self {
        self.attrib_type = attrib_type;
        self
    }

    /// Stride actually used by the device.
    pub fn effective_stride(&self) -> u32 {
        if self.stride == 0 {
            self.size * self.attrib_type.component_size()
        } else {
            self.stride
        }
    }

    pub fn is_instanced(&self) -> bool {
        self.divisor > 0
    }
}

/// Set of vertex attributes bound together for a draw.
#[derive(Clone, Debug, Default)]
pub struct VertexArrayLayout {
    attributes: Vec<VertexAttribute>,
}

impl VertexArrayLayout {
    pub fn new(attributes: Vec<VertexAttribute>) -> Self {
        Self { attributes }
    }

    pub fn with(mut self, attribute: VertexAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl StatePart for VertexArrayLayout {
    fn activate(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), Error> {
        for attribute in &self.attributes {
            device.bind_vertex_attribute(attribute);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCommand, HeadlessDevice};

    #[test]
    fn test_effective_stride() {
        let packed = VertexAttribute::new("vertex_pos", BufferHandle(1), 2);
        assert_eq!(packed.effective_stride(), 8);

        let strided = VertexAttribute::new("sprite_pos", BufferHandle(2), 3).with_stride(16);
        assert_eq!(strided.effective_stride(), 16);
    }

    #[test]
    fn test_layout_binds_every_attribute() {
        let mut layout = VertexArrayLayout::new(vec![
            VertexAttribute::new("vertex_pos", BufferHandle(1), 2),
            VertexAttribute::new("sprite_pos", BufferHandle(2), 3)
                .with_stride(16)
                .with_divisor(1),
        ]);

        let mut device = HeadlessDevice::new();
        layout.activate(&mut device).unwrap();

        let bound: Vec<_> = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::BindVertexAttribute(a) => Some((a.name.clone(), a.is_instanced())),
                _ => None,
            })
            .collect();
        assert_eq!(
            bound,
            vec![("vertex_pos".to_string(), false), ("sprite_pos".to_string(), true)]
        );
    }
}
