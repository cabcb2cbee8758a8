//! config.rs — Run configuration (config.toml)
//!
//! One `SimConfig` value is built at startup, validated once, and then passed
//! by reference into every stage. Nothing reads configuration from globals.
//!
//! Sections:
//!   [workspace]   extents, dimension, reference anchor
//!   [targets]     sample count and trajectory shape
//!   [impairments] noise and NLOS / multipath / blockage injection
//!   [processing]  preprocessing on/off and strategy
//!   [model]       estimator name and master seed
//!   [estimators]  per-algorithm tuning

use std::path::Path;

use serde::{Deserialize, Serialize};
use tdoa_types::{AnchorSet, Workspace};
use tracing::warn;

use crate::error::ConfigError;
use crate::estimators::EstimatorKind;
use crate::preprocess::PreprocessStrategy;
use crate::scenarios::Scenario;
use crate::trajectory::TrajectoryKind;

/// Shipped defaults, used when the requested config file does not exist.
pub const BUNDLED_CONFIG: &str = include_str!("../config.toml");

// ── Top level ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub workspace:   WorkspaceConfig,
    #[serde(default)]
    pub targets:     TargetsConfig,
    #[serde(default)]
    pub impairments: ImpairmentConfig,
    #[serde(default)]
    pub processing:  ProcessingConfig,
    #[serde(default)]
    pub model:       ModelConfig,
    #[serde(default)]
    pub estimators:  EstimatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub space_x: f64,
    pub space_y: f64,
    pub space_z: f64,
    pub dimension: usize,
    /// Anchor all ranges are differenced against
    #[serde(default)]
    pub reference_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetsConfig {
    pub num_targets: usize,
    pub trajectory: TrajectoryKind,
    /// Time span covered by a continuous trajectory (seconds)
    pub horizon_s: f64,
    /// Spline control points per axis for `random` trajectories
    pub control_points: usize,
    /// Seed for scatter points and spline control points
    pub seed: u64,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            num_targets: 100,
            trajectory: TrajectoryKind::Line,
            horizon_s: 10.0,
            control_points: 5,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpairmentConfig {
    pub tdoa_noise_std: f64,
    pub nlos: bool,
    pub nlos_bias_mean: f64,
    pub nlos_bias_std: f64,
    pub multipath: bool,
    pub multipath_delay_mean: f64,
    pub multipath_delay_std: f64,
    pub blockage: bool,
    pub blockage_drop_prob: f64,
    /// Seed for noise and impairment draws
    pub seed: u64,
}

impl Default for ImpairmentConfig {
    fn default() -> Self {
        Self {
            tdoa_noise_std: 0.05,
            nlos: false,
            nlos_bias_mean: 0.5,
            nlos_bias_std: 0.2,
            multipath: false,
            multipath_delay_mean: 0.3,
            multipath_delay_std: 0.1,
            blockage: false,
            blockage_drop_prob: 0.1,
            seed: 11,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub enabled: bool,
    pub strategy: PreprocessStrategy,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self { enabled: true, strategy: PreprocessStrategy::Adaptive }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Registry key, see `EstimatorKind::REGISTRY`
    pub name: String,
    /// Seed for estimators that draw random numbers (taylor, particle_filter)
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { name: "least_squares".to_string(), seed: 42 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub ls_max_iter: usize,
    pub ls_tolerance: f64,
    pub taylor_max_iter: usize,
    pub taylor_tolerance: f64,
    /// Std of the random offset added to the Taylor starting point
    pub taylor_init_std: f64,
    /// Abort when any coordinate exceeds this multiple of the workspace extent
    pub taylor_divergence_factor: f64,
    pub particles: usize,
    pub particle_iterations: usize,
    pub particle_diffusion_std: f64,
    /// Divisor of the squared TDOA error in the particle weight kernel
    pub particle_bandwidth: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            ls_max_iter: 100,
            ls_tolerance: 1e-4,
            taylor_max_iter: 20,
            taylor_tolerance: 1e-4,
            taylor_init_std: 0.5,
            taylor_divergence_factor: 10.0,
            particles: 500,
            particle_iterations: 5,
            particle_diffusion_std: 0.5,
            particle_bandwidth: 0.05,
        }
    }
}

// ── Loading & validation ──────────────────────────────────────────────────────

impl SimConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read `path`, falling back to the bundled config when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("{} not found, using bundled config", path.display());
            return Self::from_toml_str(BUNDLED_CONFIG);
        }
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    /// Bundled defaults. Panics only if the shipped config.toml is broken.
    pub fn bundled() -> Self {
        Self::from_toml_str(BUNDLED_CONFIG).expect("bundled config.toml must parse")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ws = &self.workspace;
        if ws.dimension != 2 && ws.dimension != 3 {
            return Err(ConfigError::InvalidDimension(ws.dimension));
        }
        let mut axes = vec![("space_x", ws.space_x), ("space_y", ws.space_y)];
        if ws.dimension == 3 {
            axes.push(("space_z", ws.space_z));
        }
        for (axis, value) in axes {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidExtent { axis, value });
            }
        }
        let anchors = self.anchors().len();
        if ws.reference_index >= anchors {
            return Err(ConfigError::ReferenceOutOfRange { index: ws.reference_index, anchors });
        }

        if self.targets.num_targets == 0 {
            return Err(ConfigError::invalid("num_targets", "must be > 0"));
        }
        if !(self.targets.horizon_s > 0.0) {
            return Err(ConfigError::invalid("horizon_s", "must be > 0"));
        }
        if self.targets.control_points < 2 {
            return Err(ConfigError::invalid("control_points", "need at least 2"));
        }

        let imp = &self.impairments;
        non_negative("tdoa_noise_std", imp.tdoa_noise_std)?;
        non_negative("nlos_bias_std", imp.nlos_bias_std)?;
        non_negative("multipath_delay_std", imp.multipath_delay_std)?;
        finite("nlos_bias_mean", imp.nlos_bias_mean)?;
        finite("multipath_delay_mean", imp.multipath_delay_mean)?;
        if !(0.0..=1.0).contains(&imp.blockage_drop_prob) {
            return Err(ConfigError::invalid("blockage_drop_prob", "must be within [0, 1]"));
        }

        let est = &self.estimators;
        if est.ls_max_iter == 0 || est.taylor_max_iter == 0 || est.particle_iterations == 0 {
            return Err(ConfigError::invalid("max_iter", "iteration caps must be > 0"));
        }
        if est.particles == 0 {
            return Err(ConfigError::invalid("particles", "must be > 0"));
        }
        for (name, v) in [
            ("ls_tolerance", est.ls_tolerance),
            ("taylor_tolerance", est.taylor_tolerance),
            ("taylor_divergence_factor", est.taylor_divergence_factor),
            ("particle_bandwidth", est.particle_bandwidth),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(ConfigError::invalid(name, "must be finite and > 0"));
            }
        }
        non_negative("taylor_init_std", est.taylor_init_std)?;
        non_negative("particle_diffusion_std", est.particle_diffusion_std)?;

        EstimatorKind::from_name(&self.model.name)?;
        Ok(())
    }

    pub fn workspace(&self) -> Workspace {
        let ws = &self.workspace;
        Workspace::new(ws.space_x, ws.space_y, ws.space_z, ws.dimension)
    }

    /// Anchor geometry is derived from the workspace, never configured directly.
    pub fn anchors(&self) -> AnchorSet {
        AnchorSet::corners(&self.workspace())
    }

    pub fn reference_index(&self) -> usize { self.workspace.reference_index }
}

// ── Command-line overrides ────────────────────────────────────────────────────

/// Values given on the command line. `None` / `false` leaves the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub dimension: Option<usize>,
    pub scenario: Option<String>,
    pub nlos: bool,
    pub multipath: bool,
    pub blockage: bool,
    pub process: Option<bool>,
    pub strategy: Option<String>,
    pub trajectory: Option<String>,
    /// Master seed; each consumer gets its own offset from it
    pub seed: Option<u64>,
    pub targets: Option<usize>,
}

impl SimConfig {
    /// Apply `o` in place. The scenario preset goes first so the impairment
    /// switches can only add to it.
    pub fn apply(&mut self, o: &Overrides) -> Result<(), ConfigError> {
        if let Some(name) = &o.model {
            self.model.name = name.clone();
        }
        if let Some(dim) = o.dimension {
            self.workspace.dimension = dim;
        }
        if let Some(name) = &o.scenario {
            name.parse::<Scenario>()?.apply(&mut self.impairments);
        }
        self.impairments.nlos |= o.nlos;
        self.impairments.multipath |= o.multipath;
        self.impairments.blockage |= o.blockage;
        if let Some(enabled) = o.process {
            self.processing.enabled = enabled;
        }
        if let Some(s) = &o.strategy {
            self.processing.strategy = s.parse()?;
        }
        if let Some(t) = &o.trajectory {
            self.targets.trajectory = t.parse()?;
        }
        if let Some(seed) = o.seed {
            self.targets.seed = seed;
            self.impairments.seed = seed.wrapping_add(1);
            self.model.seed = seed.wrapping_add(2);
        }
        if let Some(n) = o.targets {
            self.targets.num_targets = n;
        }
        Ok(())
    }
}

fn finite(name: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() { Ok(()) } else { Err(ConfigError::invalid(name, "must be finite")) }
}

pub(crate) fn non_negative(name: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("must be finite and >= 0, got {v}")))
    }
}
