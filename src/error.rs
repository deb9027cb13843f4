//! Error types for CMPE.
//!
//! Compile and link failures are not errors: they are recorded on the shader
//! or program (tri-state flag plus log) and the caller decides what to do.
//! The types here cover the failures that must stop the current operation.

use thiserror::Error;

/// Failure to resolve a named text resource.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// No resource with this name is known to the loader.
    #[error("resource `{name}` not found")]
    NotFound { name: String },
    /// The resource exists but could not be read.
    #[error("failed to read resource `{name}`")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while declaring or preparing shader units.
#[derive(Debug, Error)]
pub enum ShaderError {
    /// The shader name contains none of the stage keywords.
    #[error("unrecognized shader type for `{name}`")]
    UnrecognizedType { name: String },
    /// An `#pragma include <...>` directive names a resource the loader cannot provide.
    #[error("cannot find resource for inclusion: {name}")]
    MissingInclude {
        name: String,
        #[source]
        source: ResourceError,
    },
    /// An include directive without a `<name>` target. Recorded as a compile
    /// failure by [`ShaderUnit::compile`](crate::shader::ShaderUnit::compile).
    #[error("malformed include directive: {directive}")]
    MalformedInclude { directive: String },
    /// The shader source itself could not be loaded.
    #[error("failed to load shader source")]
    Resource(#[from] ResourceError),
}

/// Errors reported by a graphics device backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,
    /// Failed to create the GPU device.
    #[error("failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    /// A handle that the device never issued, or that was deleted.
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },
    /// A draw or dispatch was issued without a current program.
    #[error("no program is bound")]
    NoProgram,
    /// The current program has not been linked successfully.
    #[error("program {0} is not linked")]
    ProgramNotLinked(u32),
    /// The program reads a uniform, storage buffer or vertex input that was never bound.
    #[error("program resource `{name}` is not bound")]
    UnboundResource { name: String },
    /// The backend rejected a command.
    #[error("device validation error: {0}")]
    Validation(String),
}

/// Errors in the system configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML could not be parsed into a configuration.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration parsed but is not usable.
    #[error("config validation error: {0}")]
    Invalid(String),
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
