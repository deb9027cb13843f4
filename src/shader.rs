//! Shader units and the registry that pools them.
//!
//! A [`ShaderUnit`] is a named, typed WGSL source. Compiling it expands
//! `#pragma include <name>` directives through the registry's
//! [`ResourceLoader`] and hands the result to the device. Units are pooled by
//! name in a [`ShaderRegistry`]: asking for the same name twice yields the same
//! shared unit until it is disposed.
//!
//! ```ignore
//! let mut shaders = ShaderRegistry::builtin();
//! let vert = shaders.load("solid_sphere.vert.wgsl")?;
//! let frag = shaders.load("solid_sphere.frag.wgsl")?;
//! let frag = shaders.prepend_text(&frag, SCREEN_OUTPUT, Some("screen"));
//! let program = ShaderProgram::new("spheres", vec![vert, frag]);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub use crate::device::ShaderKind;
use crate::device::{GraphicsDevice, ShaderHandle};
use crate::error::ShaderError;
use crate::resources::{MemoryResources, ResourceLoader};

/// A pooled shader unit, shared between the registry and the programs using it.
pub type SharedShader = Rc<RefCell<ShaderUnit>>;

const INCLUDE_DIRECTIVE: &str = "#pragma include";

/// Name keywords, checked in order; the first match wins.
const KIND_KEYWORDS: &[(&str, ShaderKind)] = &[
    ("frag", ShaderKind::Fragment),
    ("vert", ShaderKind::Vertex),
    ("geom", ShaderKind::Geometry),
    ("comp", ShaderKind::Compute),
];

/// Classify a shader by the stage keyword in its name.
///
/// `"fragment"`/`"frag"`, `"vertex"`/`"vert"`, `"geometry"`/`"geom"` and
/// `"compute"`/`"comp"` are recognized, case-insensitively.
pub fn infer_kind(name: &str) -> Result<ShaderKind, ShaderError> {
    let lower = name.to_ascii_lowercase();
    KIND_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, kind)| *kind)
        .ok_or_else(|| ShaderError::UnrecognizedType {
            name: name.to_string(),
        })
}

/// Replace every `#pragma include <name>` line with the text of `name`.
///
/// Included text is inserted verbatim and not scanned again.
pub fn expand_includes(source: &str, loader: &dyn ResourceLoader) -> Result<String, ShaderError> {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix(INCLUDE_DIRECTIVE) else {
            out.push_str(line);
            out.push('\n');
            continue;
        };

        let name = rest
            .trim()
            .strip_prefix('<')
            .and_then(|r| r.split_once('>'))
            .map(|(name, _)| name.trim())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ShaderError::MalformedInclude {
                directive: trimmed.to_string(),
            })?;

        let text = loader
            .load_text(name)
            .map_err(|source| ShaderError::MissingInclude {
                name: name.to_string(),
                source,
            })?;
        out.push_str(&text);
        if !text.ends_with('\n') {
            out.push('\n');
        }
    }
    Ok(out)
}

/// Named, typed shader source with its compile state.
pub struct ShaderUnit {
    name: String,
    kind: ShaderKind,
    source: String,
    expanded: Option<String>,
    handle: Option<ShaderHandle>,
    compiled: Option<bool>,
    log: String,
    loader: Rc<dyn ResourceLoader>,
}

impl ShaderUnit {
    fn new(name: String, kind: ShaderKind, source: String, loader: Rc<dyn ResourceLoader>) -> Self {
        Self {
            name,
            kind,
            source,
            expanded: None,
            handle: None,
            compiled: None,
            log: String::new(),
            loader,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Replace the source. The unit goes back to "not compiled".
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
        self.expanded = None;
        self.compiled = None;
    }

    /// Source after include expansion, once compiled.
    pub fn expanded_source(&self) -> Option<&str> {
        self.expanded.as_deref()
    }

    pub fn handle(&self) -> Option<ShaderHandle> {
        self.handle
    }

    /// `None` until compiled, then whether the device accepted the source.
    pub fn compiled(&self) -> Option<bool> {
        self.compiled
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled == Some(true)
    }

    /// Compiler log of the last compile.
    pub fn log(&self) -> &str {
        &self.log
    }

    /// Expand includes and compile on the device.
    ///
    /// Returns whether compilation succeeded. A compile failure or malformed
    /// include is recorded in [`compiled`](Self::compiled) and
    /// [`log`](Self::log); only an unresolvable include is returned as an error.
    pub fn compile(&mut self, device: &mut dyn GraphicsDevice) -> Result<bool, ShaderError> {
        let expanded = match expand_includes(&self.source, self.loader.as_ref()) {
            Ok(expanded) => expanded,
            Err(err @ ShaderError::MalformedInclude { .. }) => {
                log::warn!("shader <{}> not compiled: {}", self.name, err);
                self.compiled = Some(false);
                self.log = err.to_string();
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let handle = *self.handle.get_or_insert_with(|| device.create_shader(self.kind));
        let status = device.compile_shader(handle, &expanded);
        self.expanded = Some(expanded);
        self.compiled = Some(status.success);
        self.log = status.log;

        if status.success {
            log::debug!("shader <{}> compiled", self.name);
        } else {
            log::warn!("shader <{}> failed to compile:\n{}", self.name, self.log);
        }
        Ok(status.success)
    }

    /// Release the device shader. The source is kept.
    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(handle) = self.handle.take() {
            device.delete_shader(handle);
        }
        self.compiled = None;
    }
}

impl std::fmt::Debug for ShaderUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderUnit")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .field("compiled", &self.compiled)
            .finish()
    }
}

/// Pool of shader units keyed by name.
pub struct ShaderRegistry {
    loader: Rc<dyn ResourceLoader>,
    units: HashMap<String, SharedShader>,
}

impl ShaderRegistry {
    pub fn new(loader: impl ResourceLoader + 'static) -> Self {
        Self::with_loader(Rc::new(loader))
    }

    pub fn with_loader(loader: Rc<dyn ResourceLoader>) -> Self {
        Self {
            loader,
            units: HashMap::new(),
        }
    }

    /// Registry whose loader only knows the crate's built-in sources.
    pub fn builtin() -> Self {
        Self::new(MemoryResources::builtin())
    }

    pub fn loader(&self) -> Rc<dyn ResourceLoader> {
        Rc::clone(&self.loader)
    }

    /// Pooled unit for `name`, or a new one with the kind inferred from `name`.
    ///
    /// `code` is ignored when the name is already pooled.
    pub fn get_or_create(&mut self, name: &str, code: &str) -> Result<SharedShader, ShaderError> {
        if let Some(unit) = self.units.get(name) {
            return Ok(Rc::clone(unit));
        }
        let kind = infer_kind(name)?;
        Ok(self.get_or_create_typed(name, kind, code))
    }

    /// Pooled unit for `name`, or a new one of `kind`.
    pub fn get_or_create_typed(&mut self, name: &str, kind: ShaderKind, code: &str) -> SharedShader {
        let loader = Rc::clone(&self.loader);
        let unit = self.units.entry(name.to_string()).or_insert_with(|| {
            log::debug!("shader <{}> declared as {}", name, kind);
            Rc::new(RefCell::new(ShaderUnit::new(
                name.to_string(),
                kind,
                code.to_string(),
                loader,
            )))
        });
        Rc::clone(unit)
    }

    /// Pooled unit for `name`, reading its source through the loader on first use.
    pub fn load(&mut self, name: &str) -> Result<SharedShader, ShaderError> {
        if let Some(unit) = self.units.get(name) {
            return Ok(Rc::clone(unit));
        }
        let code = self.loader.load_text(name)?;
        self.get_or_create(name, &code)
    }

    /// Variant of `unit` whose source is `text` followed by the original source.
    ///
    /// The variant is pooled as `"{name}+'{modifier}'"`, or `"{name}+'{text}'"`
    /// without a modifier. The original unit is left untouched.
    pub fn prepend_text(&mut self, unit: &SharedShader, text: &str, modifier: Option<&str>) -> SharedShader {
        let (name, kind, code) = {
            let original = unit.borrow();
            (
                format!("{}+'{}'", original.name(), modifier.unwrap_or(text)),
                original.kind(),
                format!("{}\n{}", text, original.source()),
            )
        };
        self.get_or_create_typed(&name, kind, &code)
    }

    /// [`prepend_text`](Self::prepend_text) over several units.
    pub fn prepend_text_all(
        &mut self,
        units: &[SharedShader],
        text: &str,
        modifier: Option<&str>,
    ) -> Vec<SharedShader> {
        units
            .iter()
            .map(|unit| self.prepend_text(unit, text, modifier))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<SharedShader> {
        self.units.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Remove `name` from the pool and release its device shader.
    ///
    /// Programs still holding the unit keep their copy; the next request for
    /// `name` creates a fresh unit.
    pub fn dispose(&mut self, name: &str, device: &mut dyn GraphicsDevice) -> bool {
        match self.units.remove(name) {
            Some(unit) => {
                unit.borrow_mut().dispose(device);
                log::debug!("shader <{}> disposed", name);
                true
            }
            None => false,
        }
    }

    /// Dispose every pooled unit.
    pub fn dispose_all(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, unit) in self.units.drain() {
            unit.borrow_mut().dispose(device);
        }
    }
}

impl std::fmt::Debug for ShaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderRegistry")
            .field("units", &self.units.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCommand, HeadlessDevice};
    use crate::error::ResourceError;

    const COMPUTE: &str = r#"
@group(0) @binding(0) var<storage, read_write> Values: array<f32>;

#pragma include <body.wgsl>
"#;

    const BODY: &str = r#"
@compute @workgroup_size(8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x < arrayLength(&Values) {
        Values[gid.x] = Values[gid.x] * 2.0;
    }
}
"#;

    fn registry() -> ShaderRegistry {
        ShaderRegistry::new(MemoryResources::new().with("body.wgsl", BODY))
    }

    #[test]
    fn test_infer_kind() {
        assert_eq!(infer_kind("sphere.vert.wgsl").unwrap(), ShaderKind::Vertex);
        assert_eq!(infer_kind("sphere_vertex").unwrap(), ShaderKind::Vertex);
        assert_eq!(infer_kind("sphere.frag.wgsl").unwrap(), ShaderKind::Fragment);
        assert_eq!(infer_kind("FragmentMain").unwrap(), ShaderKind::Fragment);
        assert_eq!(infer_kind("trails.geom").unwrap(), ShaderKind::Geometry);
        assert_eq!(infer_kind("geometry").unwrap(), ShaderKind::Geometry);
        assert_eq!(infer_kind("trails.comp.wgsl").unwrap(), ShaderKind::Compute);
        assert!(matches!(
            infer_kind("sphere.wgsl"),
            Err(ShaderError::UnrecognizedType { .. })
        ));
    }

    #[test]
    fn test_pool_returns_same_instance() {
        let mut shaders = registry();
        let a = shaders.get_or_create("a.comp", COMPUTE).unwrap();
        let b = shaders.get_or_create("a.comp", "ignored").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(b.borrow().source(), COMPUTE);
        assert_eq!(shaders.len(), 1);
    }

    #[test]
    fn test_dispose_allows_fresh_instance() {
        let mut device = HeadlessDevice::new();
        let mut shaders = registry();
        let a = shaders.get_or_create("a.comp", COMPUTE).unwrap();
        a.borrow_mut().compile(&mut device).unwrap();

        assert!(shaders.dispose("a.comp", &mut device));
        assert!(!shaders.contains("a.comp"));
        assert!(a.borrow().handle().is_none());
        assert_eq!(device.live_shaders(), 0);

        let b = shaders.get_or_create("a.comp", COMPUTE).unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_compile_expands_includes() {
        let mut device = HeadlessDevice::new();
        let mut shaders = registry();
        let unit = shaders.get_or_create("doubler.comp", COMPUTE).unwrap();
        let mut unit = unit.borrow_mut();

        assert_eq!(unit.compiled(), None);
        assert!(unit.compile(&mut device).unwrap());
        assert_eq!(unit.compiled(), Some(true));

        let expanded = unit.expanded_source().unwrap();
        assert!(expanded.contains("fn main"));
        assert!(!expanded.contains("#pragma"));
    }

    #[test]
    fn test_missing_include_fails_fast() {
        let mut device = HeadlessDevice::new();
        let mut shaders = ShaderRegistry::new(MemoryResources::new());
        let unit = shaders.get_or_create("doubler.comp", COMPUTE).unwrap();

        let err = unit.borrow_mut().compile(&mut device).unwrap_err();
        match err {
            ShaderError::MissingInclude { name, source } => {
                assert_eq!(name, "body.wgsl");
                assert!(matches!(source, ResourceError::NotFound { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(unit.borrow().compiled(), None);
        assert!(device.commands().is_empty());
    }

    #[test]
    fn test_malformed_include_recorded() {
        let mut device = HeadlessDevice::new();
        let mut shaders = registry();
        let unit = shaders
            .get_or_create("broken.comp", "#pragma include <body.wgsl\n")
            .unwrap();

        assert!(!unit.borrow_mut().compile(&mut device).unwrap());
        assert_eq!(unit.borrow().compiled(), Some(false));
        assert!(unit.borrow().log().contains("malformed include"));
    }

    #[test]
    fn test_compile_failure_recorded() {
        let mut device = HeadlessDevice::new();
        let mut shaders = registry();
        let unit = shaders.get_or_create("bad.frag", "fn nope( {").unwrap();

        assert!(!unit.borrow_mut().compile(&mut device).unwrap());
        assert_eq!(unit.borrow().compiled(), Some(false));
        assert!(!unit.borrow().log().is_empty());
        assert!(device
            .commands()
            .iter()
            .any(|c| matches!(c, DeviceCommand::CompileShader { success: false, .. })));
    }

    #[test]
    fn test_prepend_text_creates_named_variant() {
        let mut shaders = registry();
        let base = shaders.get_or_create("base.comp", BODY).unwrap();

        let variant = shaders.prepend_text(&base, "// header", Some("hdr"));
        assert_eq!(variant.borrow().name(), "base.comp+'hdr'");
        assert_eq!(variant.borrow().kind(), ShaderKind::Compute);
        assert!(variant.borrow().source().starts_with("// header\n"));
        assert!(variant.borrow().source().ends_with(BODY));
        assert_eq!(base.borrow().source(), BODY);

        let unnamed = shaders.prepend_text(&base, "// x", None);
        assert_eq!(unnamed.borrow().name(), "base.comp+'// x'");

        let again = shaders.prepend_text(&base, "// header", Some("hdr"));
        assert!(Rc::ptr_eq(&variant, &again));
    }

    #[test]
    fn test_prepend_text_all() {
        let mut shaders = registry();
        let a = shaders.get_or_create("a.comp", BODY).unwrap();
        let b = shaders.get_or_create("b.comp", BODY).unwrap();
        let variants = shaders.prepend_text_all(&[a, b], "// v", Some("v"));
        let names: Vec<_> = variants.iter().map(|u| u.borrow().name().to_string()).collect();
        assert_eq!(names, vec!["a.comp+'v'", "b.comp+'v'"]);
    }

    #[test]
    fn test_load_from_resources() {
        let mut shaders = ShaderRegistry::builtin();
        let unit = shaders.load("solid_sphere.vert.wgsl").unwrap();
        assert_eq!(unit.borrow().kind(), ShaderKind::Vertex);
        assert!(matches!(
            shaders.load("missing.vert"),
            Err(ShaderError::Resource(ResourceError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_geometry_never_compiles() {
        let mut device = HeadlessDevice::new();
        let mut shaders = registry();
        let unit = shaders.get_or_create("trails.geom", "").unwrap();
        assert!(!unit.borrow_mut().compile(&mut device).unwrap());
        assert!(unit.borrow().log().contains("geometry"));
    }
}
