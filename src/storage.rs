//! Named storage buffer bindings for compute programs.

use crate::device::{BufferHandle, GraphicsDevice};
use crate::error::Error;
use crate::state::StatePart;

/// Storage buffers bound by the name of the shader global they back.
#[derive(Clone, Debug, Default)]
pub struct ShaderStorageSet {
    bindings: Vec<(String, BufferHandle)>,
}

impl ShaderStorageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the buffer bound to `name`.
    pub fn set(&mut self, name: &str, buffer: BufferHandle) -> &mut Self {
        match self.bindings.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = buffer,
            None => self.bindings.push((name.to_string(), buffer)),
        }
        self
    }

    pub fn with(mut self, name: &str, buffer: BufferHandle) -> Self {
        self.set(name, buffer);
        self
    }

    pub fn get(&self, name: &str) -> Option<BufferHandle> {
        self.bindings.iter().find(|(n, _)| n == name).map(|(_, b)| *b)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl StatePart for ShaderStorageSet {
    fn activate(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), Error> {
        for (name, buffer) in &self.bindings {
            device.bind_storage_buffer(name, *buffer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_by_name() {
        let mut set = ShaderStorageSet::new()
            .with("Position", BufferHandle(1))
            .with("Meta", BufferHandle(2));
        set.set("Position", BufferHandle(3));

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("Position"), Some(BufferHandle(3)));
        assert_eq!(set.get("Rotation"), None);
    }
}
