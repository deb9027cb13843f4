//! WGSL front end shared by the device backends.
//!
//! Parses and validates a shader unit with naga and records what the device
//! needs to bind resources by name: the entry point of the requested stage,
//! every named uniform/storage global with its `@group`/`@binding` and
//! whether the entry point touches it, and the `@location` of each vertex input.

use std::collections::HashMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::ShaderKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BindingKind {
    Uniform,
    Storage { read_only: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ResourceSlot {
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind,
    /// The stage's entry point reads or writes this global.
    pub used: bool,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ShaderReflection {
    pub entry_point: String,
    pub resources: HashMap<String, ResourceSlot>,
    /// Vertex input name → shader location. Empty for non-vertex stages.
    pub inputs: HashMap<String, u32>,
}

fn naga_stage(kind: ShaderKind) -> Option<naga::ShaderStage> {
    match kind {
        ShaderKind::Vertex => Some(naga::ShaderStage::Vertex),
        ShaderKind::Fragment => Some(naga::ShaderStage::Fragment),
        ShaderKind::Compute => Some(naga::ShaderStage::Compute),
        ShaderKind::Geometry => None,
    }
}

/// Parse, validate and reflect a WGSL unit for `kind`.
///
/// The error string is the compile log.
pub(crate) fn reflect_wgsl(source: &str, kind: ShaderKind) -> Result<ShaderReflection, String> {
    let stage = naga_stage(kind)
        .ok_or_else(|| format!("{} shaders have no WGSL stage", kind))?;

    let module = naga::front::wgsl::parse_str(source).map_err(|err| err.emit_to_string(source))?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    let info = validator
        .validate(&module)
        .map_err(|err| format!("{}", err))?;

    let (ep_index, entry) = module
        .entry_points
        .iter()
        .enumerate()
        .find(|(_, ep)| ep.stage == stage)
        .ok_or_else(|| format!("no @{} entry point", kind))?;
    let ep_info = info.get_entry_point(ep_index);

    let mut resources = HashMap::new();
    for (handle, var) in module.global_variables.iter() {
        let (Some(name), Some(binding)) = (&var.name, &var.binding) else {
            continue;
        };
        let kind = match var.space {
            naga::AddressSpace::Uniform => BindingKind::Uniform,
            naga::AddressSpace::Storage { access } => BindingKind::Storage {
                read_only: !access.contains(naga::StorageAccess::STORE),
            },
            _ => continue,
        };
        resources.insert(
            name.clone(),
            ResourceSlot {
                group: binding.group,
                binding: binding.binding,
                kind,
                used: !ep_info[handle].is_empty(),
            },
        );
    }

    let mut inputs = HashMap::new();
    if stage == naga::ShaderStage::Vertex {
        for arg in &entry.function.arguments {
            match (&arg.binding, &arg.name) {
                (Some(naga::Binding::Location { location, .. }), Some(name)) => {
                    inputs.insert(name.clone(), *location);
                }
                (None, _) => {
                    if let naga::TypeInner::Struct { members, .. } = &module.types[arg.ty].inner {
                        for member in members {
                            if let (Some(naga::Binding::Location { location, .. }), Some(name)) =
                                (&member.binding, &member.name)
                            {
                                inputs.insert(name.clone(), *location);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Ok(ShaderReflection {
        entry_point: entry.name.clone(),
        resources,
        inputs,
    })
}

/// A linkable stage set is a lone compute stage or a vertex + fragment pair.
pub(crate) fn check_stage_set(kinds: &[ShaderKind]) -> Result<(), String> {
    let has = |kind| kinds.contains(&kind);
    if has(ShaderKind::Compute) {
        if kinds.iter().any(|k| *k != ShaderKind::Compute) {
            return Err("compute stage cannot be linked with other stages".into());
        }
        if kinds.len() > 1 {
            return Err("program has more than one compute stage".into());
        }
        return Ok(());
    }
    if has(ShaderKind::Vertex) && has(ShaderKind::Fragment) {
        return Ok(());
    }
    Err("program needs a compute stage or a vertex and fragment stage".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_sets() {
        use ShaderKind::*;
        assert!(check_stage_set(&[Compute]).is_ok());
        assert!(check_stage_set(&[Vertex, Fragment]).is_ok());
        assert!(check_stage_set(&[Vertex]).is_err());
        assert!(check_stage_set(&[Compute, Fragment]).is_err());
        assert!(check_stage_set(&[]).is_err());
    }

    const COMPUTE: &str = r#"
@group(0) @binding(0) var<storage, read_write> Position: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read> Unused: array<f32>;
@group(1) @binding(0) var<uniform> u_Dt: f32;

@compute @workgroup_size(8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x < arrayLength(&Position) {
        Position[gid.x] = Position[gid.x] + vec4<f32>(u_Dt);
    }
}
"#;

    #[test]
    fn test_reflect_compute_bindings() {
        let reflection = reflect_wgsl(COMPUTE, ShaderKind::Compute).unwrap();
        assert_eq!(reflection.entry_point, "main");

        let position = reflection.resources["Position"];
        assert_eq!((position.group, position.binding), (0, 0));
        assert_eq!(position.kind, BindingKind::Storage { read_only: false });
        assert!(position.used);

        assert!(!reflection.resources["Unused"].used);
        assert_eq!(reflection.resources["u_Dt"].kind, BindingKind::Uniform);
    }

    #[test]
    fn test_reflect_vertex_inputs() {
        let src = r#"
@vertex
fn vs_main(@location(0) a: vec2<f32>, @location(3) b: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(a, b.x, 1.0);
}
"#;
        let reflection = reflect_wgsl(src, ShaderKind::Vertex).unwrap();
        assert_eq!(reflection.inputs["a"], 0);
        assert_eq!(reflection.inputs["b"], 3);
    }

    #[test]
    fn test_reflect_wrong_stage() {
        let err = reflect_wgsl(COMPUTE, ShaderKind::Fragment).unwrap_err();
        assert!(err.contains("no @fragment entry point"));
    }

    #[test]
    fn test_reflect_parse_error() {
        let err = reflect_wgsl("fn broken( {", ShaderKind::Compute).unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn test_reflect_geometry_unsupported() {
        let err = reflect_wgsl("", ShaderKind::Geometry).unwrap_err();
        assert!(err.contains("geometry"));
    }
}
