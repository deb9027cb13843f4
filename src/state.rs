//! Activation of declarative draw-time state.
//!
//! Every piece of bindable state (program, uniforms, vertex layout, storage
//! buffers, framebuffer targets) implements [`StatePart`]. A [`State`] is an
//! ordered composite that activates its parts front to back.

use crate::device::GraphicsDevice;
use crate::error::Error;

/// A piece of state that can be pushed to the device.
pub trait StatePart {
    /// Push this state to the device for the next draw or dispatch.
    fn activate(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), Error>;
}

/// Ordered collection of state parts.
#[derive(Default)]
pub struct State {
    parts: Vec<Box<dyn StatePart>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a part; parts activate in insertion order.
    pub fn with(mut self, part: impl StatePart + 'static) -> Self {
        self.parts.push(Box::new(part));
        self
    }

    pub fn push(&mut self, part: impl StatePart + 'static) {
        self.parts.push(Box::new(part));
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl StatePart for State {
    fn activate(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), Error> {
        for part in &mut self.parts {
            part.activate(device)?;
        }
        Ok(())
    }
}
