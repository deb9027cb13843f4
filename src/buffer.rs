//! CPU arrays mirrored into device buffers.
//!
//! A [`GpuBuffer`] owns a dense CPU-side array that simulation code reads and
//! writes directly. The device copy only changes when [`GpuBuffer::publish`]
//! is called, which uploads the whole array in one request.

use bytemuck::Pod;

use crate::device::{BufferHandle, BufferUsage, GraphicsDevice};

/// CPU-resident array plus its device-resident mirror.
#[derive(Debug)]
pub struct GpuBuffer<T: Pod> {
    name: String,
    usage: BufferUsage,
    data: Vec<T>,
    handle: Option<BufferHandle>,
    published: bool,
}

impl<T: Pod> GpuBuffer<T> {
    /// Create a zero-filled buffer of `len` elements.
    pub fn zeroed(name: impl Into<String>, len: usize) -> Self {
        Self::from_vec(name, vec![T::zeroed(); len])
    }

    pub fn from_vec(name: impl Into<String>, data: Vec<T>) -> Self {
        Self {
            name: name.into(),
            usage: BufferUsage::default(),
            data,
            handle: None,
            published: false,
        }
    }

    /// Set the usage hint passed to the device when the buffer is created.
    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        self.published = false;
        &mut self.data
    }

    /// Replace the contents, possibly changing the length.
    pub fn set_data(&mut self, data: Vec<T>) {
        self.data = data;
        self.published = false;
    }

    /// Copy `values` into the array starting at `offset`, growing it if needed.
    pub fn copy_from(&mut self, values: &[T], offset: usize) {
        let end = offset + values.len();
        if end > self.data.len() {
            self.data.resize(end, T::zeroed());
        }
        self.data[offset..end].copy_from_slice(values);
        self.published = false;
    }

    /// Device handle, creating the device buffer on first use.
    pub fn handle(&mut self, device: &mut dyn GraphicsDevice) -> BufferHandle {
        match self.handle {
            Some(handle) => handle,
            None => {
                let handle = device.create_buffer(&self.name, self.usage);
                log::debug!("buffer <{}> created as {:?}", self.name, handle);
                self.handle = Some(handle);
                handle
            }
        }
    }

    /// Device handle if the device buffer exists.
    pub fn existing_handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    /// The device copy matches the CPU array.
    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Copy the current CPU contents to the device mirror.
    pub fn publish(&mut self, device: &mut dyn GraphicsDevice) -> BufferHandle {
        let handle = self.handle(device);
        device.upload_buffer(handle, bytemuck::cast_slice(&self.data));
        self.published = true;
        handle
    }

    /// Release the device buffer. The CPU array is kept.
    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(handle) = self.handle.take() {
            device.delete_buffer(handle);
        }
        self.published = false;
    }
}
