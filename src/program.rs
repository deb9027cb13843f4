//! Shader programs with lazy, one-shot linking.
//!
//! A program is declared from a fixed list of shader units but not linked
//! until it is first activated, so prepended variants can still be swapped in
//! after the program object exists.

use crate::device::{GraphicsDevice, ProgramHandle};
use crate::error::{Error, ShaderError};
use crate::shader::SharedShader;
use crate::state::StatePart;

/// A named set of shader units linked into one device program.
#[derive(Debug)]
pub struct ShaderProgram {
    name: String,
    shaders: Vec<SharedShader>,
    handle: Option<ProgramHandle>,
    linked: Option<bool>,
    log: String,
}

impl ShaderProgram {
    pub fn new(name: impl Into<String>, shaders: Vec<SharedShader>) -> Self {
        let name = name.into();
        log::info!("program <{}> declared with {} shader(s)", name, shaders.len());
        Self {
            name,
            shaders,
            handle: None,
            linked: None,
            log: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shaders(&self) -> &[SharedShader] {
        &self.shaders
    }

    pub fn handle(&self) -> Option<ProgramHandle> {
        self.handle
    }

    /// `None` until the first link attempt, then its outcome.
    pub fn linked(&self) -> Option<bool> {
        self.linked
    }

    pub fn is_linked(&self) -> bool {
        self.linked == Some(true)
    }

    /// Linker log of the link attempt.
    pub fn log(&self) -> &str {
        &self.log
    }

    /// `(shader name, compiler log)` for every unit.
    pub fn shader_logs(&self) -> Vec<(String, String)> {
        self.shaders
            .iter()
            .map(|unit| {
                let unit = unit.borrow();
                (unit.name().to_string(), unit.log().to_string())
            })
            .collect()
    }

    /// Link on first call; later calls return the cached outcome.
    ///
    /// Units that were never compiled are compiled first. Only an unresolved
    /// include is returned as an error; compile and link failures show up as
    /// `Ok(false)` with the logs kept on the program and its units.
    pub fn ensure_linked(&mut self, device: &mut dyn GraphicsDevice) -> Result<bool, ShaderError> {
        if let Some(linked) = self.linked {
            return Ok(linked);
        }

        for unit in &self.shaders {
            let mut unit = unit.borrow_mut();
            if unit.compiled().is_none() {
                unit.compile(device)?;
            }
        }

        let handle = *self.handle.get_or_insert_with(|| device.create_program());
        for unit in &self.shaders {
            if let Some(shader) = unit.borrow().handle() {
                device.attach_shader(handle, shader);
            }
        }

        let status = device.link_program(handle);
        self.linked = Some(status.success);
        self.log = status.log;

        if status.success {
            log::info!("program <{}> linked", self.name);
        } else {
            let mut report = format!("program <{}> failed to link: {}", self.name, self.log);
            for (name, log) in self.shader_logs() {
                report.push_str(&format!("\n  <{}>: {}", name, log));
            }
            log::warn!("{}", report);
        }
        Ok(status.success)
    }

    /// Release the device program. The next activation links again.
    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(handle) = self.handle.take() {
            device.delete_program(handle);
        }
        self.linked = None;
    }
}

impl StatePart for ShaderProgram {
    /// Link if needed and make the program current. An unlinked program is
    /// left unbound.
    fn activate(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), Error> {
        if self.ensure_linked(device)? {
            if let Some(handle) = self.handle {
                device.use_program(handle);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCommand, HeadlessDevice};
    use crate::resources::MemoryResources;
    use crate::shader::ShaderRegistry;

    const COMPUTE: &str = r#"
@group(0) @binding(0) var<storage, read_write> Values: array<f32>;

@compute @workgroup_size(8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x < arrayLength(&Values) {
        Values[gid.x] = 0.0;
    }
}
"#;

    fn link_count(device: &HeadlessDevice) -> usize {
        device.count(|c| matches!(c, DeviceCommand::LinkProgram { .. }))
    }

    #[test]
    fn test_ensure_linked_is_idempotent() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::new(MemoryResources::new());
        let unit = shaders.get_or_create("clear.comp", COMPUTE).unwrap();
        let mut program = ShaderProgram::new("clear", vec![unit]);

        assert_eq!(program.linked(), None);
        assert!(program.ensure_linked(&mut device).unwrap());
        assert!(program.ensure_linked(&mut device).unwrap());
        assert_eq!(link_count(&device), 1);
        assert_eq!(program.linked(), Some(true));
    }

    #[test]
    fn test_failed_link_is_cached() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::new(MemoryResources::new());
        let unit = shaders.get_or_create("broken.comp", "fn main( {").unwrap();
        let mut program = ShaderProgram::new("broken", vec![unit]);

        assert!(!program.ensure_linked(&mut device).unwrap());
        assert!(!program.ensure_linked(&mut device).unwrap());
        assert_eq!(link_count(&device), 1);

        let logs = program.shader_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].0, "broken.comp");
        assert!(!logs[0].1.is_empty());
    }

    #[test]
    fn test_activation_uses_only_linked_program() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::new(MemoryResources::new());
        let vert_only = shaders.get_or_create("lonely.vert", "").unwrap();
        let mut program = ShaderProgram::new("lonely", vec![vert_only]);

        program.activate(&mut device).unwrap();
        assert_eq!(program.linked(), Some(false));
        assert_eq!(
            device.count(|c| matches!(c, DeviceCommand::UseProgram(_))),
            0
        );
    }

    #[test]
    fn test_dispose_releases_program() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::new(MemoryResources::new());
        let unit = shaders.get_or_create("clear.comp", COMPUTE).unwrap();
        let mut program = ShaderProgram::new("clear", vec![unit]);
        program.activate(&mut device).unwrap();
        assert_eq!(device.current_program(), program.handle());

        program.dispose(&mut device);
        assert!(program.handle().is_none());
        assert_eq!(program.linked(), None);
        assert_eq!(device.live_programs(), 0);
    }
}
