//! System configuration, loadable from TOML.
//!
//! ```toml
//! particle_count = 4096
//! trail_size = 32
//! dt = 0.002
//!
//! [scheme]
//! kind = "trails"
//! interpolation = "linear"
//! trail_bundle_size = 4
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::simulation::ifs::DEFAULT_SEED_COUNT;
use crate::simulation::{
    ComputeMetadata, GpuParticlesWithTrails, IfsColoring, IfsScheme, IntegrationStep, Interpolation,
    MapMode, ParticlesWithTrails, SimulationParams, SimulationScheme, SingleStepScheme,
};

fn default_bundle_size() -> usize {
    8
}

fn default_seed_count() -> usize {
    DEFAULT_SEED_COUNT
}

/// Which scheme runs, with its tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemeConfig {
    Trails {
        #[serde(default)]
        map_mode: MapMode,
        #[serde(default)]
        integration_step: IntegrationStep,
        #[serde(default)]
        interpolation: Interpolation,
        #[serde(default = "default_bundle_size")]
        trail_bundle_size: usize,
        #[serde(default)]
        metadata: ComputeMetadata,
    },
    TrailsGpu {
        #[serde(default)]
        map_mode: MapMode,
        #[serde(default)]
        integration_step: IntegrationStep,
        #[serde(default = "default_bundle_size")]
        trail_bundle_size: usize,
    },
    Ifs {
        #[serde(default = "default_seed_count")]
        seed_count: usize,
        #[serde(default)]
        color_scheme: IfsColoring,
    },
    SingleStep,
}

impl Default for SchemeConfig {
    fn default() -> Self {
        SchemeConfig::Trails {
            map_mode: MapMode::default(),
            integration_step: IntegrationStep::default(),
            interpolation: Interpolation::default(),
            trail_bundle_size: default_bundle_size(),
            metadata: ComputeMetadata::default(),
        }
    }
}

impl SchemeConfig {
    /// Construct the configured scheme.
    pub fn build(&self) -> Box<dyn SimulationScheme> {
        match *self {
            SchemeConfig::Trails {
                map_mode,
                integration_step,
                interpolation,
                trail_bundle_size,
                metadata,
            } => Box::new(
                ParticlesWithTrails::new()
                    .with_map_mode(map_mode)
                    .with_integration_step(integration_step)
                    .with_interpolation(interpolation)
                    .with_trail_bundle_size(trail_bundle_size)
                    .with_metadata(metadata),
            ),
            SchemeConfig::TrailsGpu {
                map_mode,
                integration_step,
                trail_bundle_size,
            } => Box::new(
                GpuParticlesWithTrails::new()
                    .with_map_mode(map_mode)
                    .with_integration_step(integration_step)
                    .with_trail_bundle_size(trail_bundle_size),
            ),
            SchemeConfig::Ifs {
                seed_count,
                color_scheme,
            } => Box::new(
                IfsScheme::new()
                    .with_seed_count(seed_count)
                    .with_coloring(color_scheme),
            ),
            SchemeConfig::SingleStep => Box::new(SingleStepScheme::new()),
        }
    }
}

/// Particle system settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub particle_count: usize,
    pub trail_size: usize,
    pub steps_per_frame: usize,
    pub dt: f32,
    pub particle_scale: f32,
    pub particle_size: f32,
    /// Width of the orthographic view volume in world units.
    pub projection_width: f32,
    pub scheme: SchemeConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            particle_count: 8192,
            trail_size: 16,
            steps_per_frame: 1,
            dt: 0.005,
            particle_scale: 1.0,
            particle_size: 0.02,
            projection_width: 14.0,
            scheme: SchemeConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.particle_count == 0 {
            return Err(ConfigError::Invalid("particle_count must be at least 1".into()));
        }
        if !(self.dt > 0.0) {
            return Err(ConfigError::Invalid(format!("dt must be positive, got {}", self.dt)));
        }
        Ok(())
    }

    pub fn with_particle_count(mut self, count: usize) -> Self {
        self.particle_count = count;
        self
    }

    pub fn with_trail_size(mut self, size: usize) -> Self {
        self.trail_size = size;
        self
    }

    pub fn with_steps_per_frame(mut self, steps: usize) -> Self {
        self.steps_per_frame = steps;
        self
    }

    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_particle_scale(mut self, scale: f32) -> Self {
        self.particle_scale = scale;
        self
    }

    pub fn with_particle_size(mut self, size: f32) -> Self {
        self.particle_size = size;
        self
    }

    pub fn with_projection_width(mut self, width: f32) -> Self {
        self.projection_width = width;
        self
    }

    pub fn with_scheme(mut self, scheme: SchemeConfig) -> Self {
        self.scheme = scheme;
        self
    }

    /// Numeric settings handed to the schemes, with sizes clamped to one.
    pub fn params(&self) -> SimulationParams {
        SimulationParams {
            dt: self.dt,
            trail_size: self.trail_size.max(1),
            steps_per_frame: self.steps_per_frame.max(1),
            particle_scale: self.particle_scale,
        }
    }
}
