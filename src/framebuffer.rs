//! Render target bindings.
//!
//! Textures are created and owned by the caller; a target set only names
//! which texture receives which output.

use crate::device::{GraphicsDevice, TextureHandle};
use crate::error::Error;
use crate::state::StatePart;

/// Attachment point of a render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attachment {
    /// Fragment output `@location(n)`.
    Color(u32),
    Depth,
}

/// One texture attached to one attachment point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferBinding {
    pub attachment: Attachment,
    pub texture: TextureHandle,
}

impl FramebufferBinding {
    pub fn color(location: u32, texture: TextureHandle) -> Self {
        Self {
            attachment: Attachment::Color(location),
            texture,
        }
    }

    pub fn depth(texture: TextureHandle) -> Self {
        Self {
            attachment: Attachment::Depth,
            texture,
        }
    }
}

/// Render targets for a pass. Empty means the device's default target.
#[derive(Clone, Debug, Default)]
pub struct FramebufferTargetSet {
    bindings: Vec<FramebufferBinding>,
}

impl FramebufferTargetSet {
    /// The default target.
    pub fn screen() -> Self {
        Self::default()
    }

    pub fn new(bindings: Vec<FramebufferBinding>) -> Self {
        Self { bindings }
    }

    pub fn bindings(&self) -> &[FramebufferBinding] {
        &self.bindings
    }

    pub fn is_screen(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.bindings
            .iter()
            .find(|b| b.attachment == Attachment::Depth)
            .map(|b| b.texture)
    }
}

impl StatePart for FramebufferTargetSet {
    fn activate(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), Error> {
        device.bind_framebuffer(&self.bindings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_texture_lookup() {
        let set = FramebufferTargetSet::new(vec![
            FramebufferBinding::color(0, TextureHandle(4)),
            FramebufferBinding::depth(TextureHandle(7)),
        ]);
        assert_eq!(set.depth_texture(), Some(TextureHandle(7)));
        assert!(!set.is_screen());
        assert!(FramebufferTargetSet::screen().is_screen());
    }
}
