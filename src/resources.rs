//! Named text resources used as shader sources and include targets.
//!
//! The loader is consulted when a shader source is loaded by name and when an
//! `#pragma include <name>` directive is expanded at compile time.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::ResourceError;

/// Source of named text blobs.
///
/// Each name resolves to exactly one text or fails.
pub trait ResourceLoader {
    fn load_text(&self, name: &str) -> Result<String, ResourceError>;
}

/// WGSL sources that ship with the crate.
pub const BUILTIN_SOURCES: &[(&str, &str)] = &[
    (
        "solid_sphere_common.wgsl",
        include_str!("shaders/solid_sphere_common.wgsl"),
    ),
    (
        "solid_sphere.vert.wgsl",
        include_str!("shaders/solid_sphere.vert.wgsl"),
    ),
    (
        "solid_sphere.frag.wgsl",
        include_str!("shaders/solid_sphere.frag.wgsl"),
    ),
    ("chaotic_map.wgsl", include_str!("shaders/chaotic_map.wgsl")),
    (
        "particles_with_trails.comp.wgsl",
        include_str!("shaders/particles_with_trails.comp.wgsl"),
    ),
];

/// In-memory resource table.
#[derive(Clone, Debug, Default)]
pub struct MemoryResources {
    texts: HashMap<String, String>,
}

impl MemoryResources {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table pre-filled with the crate's built-in shader sources.
    pub fn builtin() -> Self {
        let mut resources = Self::new();
        for (name, text) in BUILTIN_SOURCES {
            resources.insert(*name, *text);
        }
        resources
    }

    /// Add or replace a resource.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.texts.insert(name.into(), text.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(name, text);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.texts.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

impl ResourceLoader for MemoryResources {
    fn load_text(&self, name: &str) -> Result<String, ResourceError> {
        self.texts
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound { name: name.to_string() })
    }
}

/// Resources read from files under a root directory.
#[derive(Clone, Debug)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl ResourceLoader for DirectoryResources {
    fn load_text(&self, name: &str) -> Result<String, ResourceError> {
        let path = self.root.join(name);
        std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ResourceError::NotFound { name: name.to_string() }
            } else {
                ResourceError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })
    }
}

/// Tries each loader in order and returns the first hit.
#[derive(Default)]
pub struct LayeredResources {
    layers: Vec<Box<dyn ResourceLoader>>,
}

impl LayeredResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loader with lower priority than those already present.
    pub fn with_layer(mut self, loader: impl ResourceLoader + 'static) -> Self {
        self.layers.push(Box::new(loader));
        self
    }
}

impl ResourceLoader for LayeredResources {
    fn load_text(&self, name: &str) -> Result<String, ResourceError> {
        for layer in &self.layers {
            match layer.load_text(name) {
                Ok(text) => return Ok(text),
                Err(ResourceError::NotFound { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(ResourceError::NotFound { name: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_resources_lookup() {
        let resources = MemoryResources::new().with("a.wgsl", "fn a() {}");
        assert_eq!(resources.load_text("a.wgsl").unwrap(), "fn a() {}");
        assert!(matches!(
            resources.load_text("b.wgsl"),
            Err(ResourceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_builtin_contains_shipped_shaders() {
        let resources = MemoryResources::builtin();
        assert_eq!(resources.len(), BUILTIN_SOURCES.len());
        assert!(resources.contains("solid_sphere.vert.wgsl"));
        assert!(resources.contains("particles_with_trails.comp.wgsl"));
    }

    #[test]
    fn test_directory_resources_missing_file() {
        let resources = DirectoryResources::new(std::env::temp_dir().join("cmpe-does-not-exist"));
        assert!(matches!(
            resources.load_text("x.wgsl"),
            Err(ResourceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_layered_resources_priority() {
        let layered = LayeredResources::new()
            .with_layer(MemoryResources::new().with("map.wgsl", "first"))
            .with_layer(MemoryResources::new().with("map.wgsl", "second").with("other", "x"));
        assert_eq!(layered.load_text("map.wgsl").unwrap(), "first");
        assert_eq!(layered.load_text("other").unwrap(), "x");
        assert!(layered.load_text("none").is_err());
    }
}
