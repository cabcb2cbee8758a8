//! trajectory.rs — Ground-truth target generation
//!
//! Two modes:
//! - **scatter**: independent uniform points inside the workspace (legacy path)
//! - **continuous paths** over a fixed time horizon: `line`, `circle`,
//!   `sinusoid`, and `random` (natural cubic spline through random control
//!   points, one spline per axis)
//!
//! Paths stay inside the workspace so every sample is observable by the
//! corner anchors. All randomness comes from the seed passed in.

use std::f64::consts::TAU;
use std::str::FromStr;

use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tdoa_types::{TargetSet, Workspace};

use crate::config::SimConfig;
use crate::error::ConfigError;

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryKind {
    Line,
    Circle,
    Sinusoid,
    Random,
    /// Uniform random scatter, no temporal ordering
    Scatter,
}

impl FromStr for TrajectoryKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "line"     => Ok(Self::Line),
            "circle"   => Ok(Self::Circle),
            "sinusoid" => Ok(Self::Sinusoid),
            "random"   => Ok(Self::Random),
            "scatter"  => Ok(Self::Scatter),
            _ => Err(ConfigError::UnknownTrajectory(s.to_string())),
        }
    }
}

/// Paths keep this fraction of each extent as margin from the walls.
const MARGIN: f64 = 0.1;

// ── Natural cubic spline ──────────────────────────────────────────────────────

/// Interpolating cubic spline with zero second derivative at both ends.
#[derive(Debug, Clone)]
pub struct NaturalCubicSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    /// Second derivatives at the knots
    m: Vec<f64>,
}

impl NaturalCubicSpline {
    /// `knots` must be strictly increasing and at least two long.
    pub fn new(knots: Vec<f64>, values: Vec<f64>) -> Option<Self> {
        let n = knots.len();
        if n < 2 || values.len() != n || knots.windows(2).any(|w| !(w[1] > w[0])) {
            return None;
        }
        let h: Vec<f64> = knots.windows(2).map(|w| w[1] - w[0]).collect();
        let mut m = vec![0.0; n];

        if n > 2 {
            // Tridiagonal system for interior second derivatives (Thomas algorithm)
            let k = n - 2;
            let mut diag = vec![0.0; k];
            let mut rhs = vec![0.0; k];
            for i in 0..k {
                diag[i] = 2.0 * (h[i] + h[i + 1]);
                rhs[i] = 6.0 * ((values[i + 2] - values[i + 1]) / h[i + 1]
                    - (values[i + 1] - values[i]) / h[i]);
            }
            for i in 1..k {
                let w = h[i] / diag[i - 1];
                diag[i] -= w * h[i];
                rhs[i] -= w * rhs[i - 1];
            }
            m[k] = rhs[k - 1] / diag[k - 1];
            for i in (0..k - 1).rev() {
                m[i + 1] = (rhs[i] - h[i + 1] * m[i + 2]) / diag[i];
            }
        }

        Some(Self { knots, values, m })
    }

    /// Evaluate at `t`, clamped to the knot range.
    pub fn eval(&self, t: f64) -> f64 {
        let last = self.knots.len() - 1;
        let t = t.clamp(self.knots[0], self.knots[last]);
        let i = self.knots[..last].iter().rposition(|&k| k <= t).unwrap_or(0);
        let h = self.knots[i + 1] - self.knots[i];
        let a = (self.knots[i + 1] - t) / h;
        let b = 1.0 - a;
        a * self.values[i] + b * self.values[i + 1]
            + ((a.powi(3) - a) * self.m[i] + (b.powi(3) - b) * self.m[i + 1]) * h * h / 6.0
    }
}

// ── Generator ─────────────────────────────────────────────────────────────────

pub struct TrajectoryGenerator {
    workspace: Workspace,
    horizon_s: f64,
    control_points: usize,
    rng: ChaCha8Rng,
}

impl TrajectoryGenerator {
    pub fn new(workspace: Workspace, horizon_s: f64, control_points: usize, seed: u64) -> Self {
        Self {
            workspace,
            horizon_s,
            control_points: control_points.max(2),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn from_config(cfg: &SimConfig) -> Self {
        Self::new(cfg.workspace(), cfg.targets.horizon_s, cfg.targets.control_points, cfg.targets.seed)
    }

    /// Produce `n` ground-truth samples of the requested shape.
    pub fn generate(&mut self, kind: TrajectoryKind, n: usize) -> TargetSet {
        let bounds = self.workspace.upper_bounds();
        let dim = self.workspace.dimension;
        let params: Vec<f64> = (0..n)
            .map(|k| if n > 1 { k as f64 / (n - 1) as f64 } else { 0.0 })
            .collect();

        let points: Vec<DVector<f64>> = match kind {
            TrajectoryKind::Line => params.iter().map(|&u| {
                bounds.map(|hi| hi * (MARGIN + (1.0 - 2.0 * MARGIN) * u))
            }).collect(),

            TrajectoryKind::Circle => {
                let r = 0.35 * bounds[0].min(bounds[1]);
                params.iter().map(|&u| {
                    let mut p = bounds.map(|hi| hi / 2.0);
                    p[0] += r * (TAU * u).cos();
                    p[1] += r * (TAU * u).sin();
                    p
                }).collect()
            }

            TrajectoryKind::Sinusoid => params.iter().map(|&u| {
                let mut p = DVector::zeros(dim);
                p[0] = bounds[0] * (MARGIN + (1.0 - 2.0 * MARGIN) * u);
                p[1] = bounds[1] * (0.5 + 0.3 * (2.0 * TAU * u).sin());
                if dim == 3 {
                    p[2] = bounds[2] * (0.5 + 0.25 * (TAU * u).sin());
                }
                p
            }).collect(),

            TrajectoryKind::Random => {
                let splines = self.random_splines(&bounds);
                params.iter().map(|&u| {
                    DVector::from_iterator(dim, splines.iter().zip(bounds.iter())
                        .map(|(s, &hi)| s.eval(u).clamp(0.0, hi)))
                }).collect()
            }

            TrajectoryKind::Scatter => {
                let points = (0..n)
                    .map(|_| bounds.map(|hi| self.rng.gen_range(0.0..hi)))
                    .collect();
                return TargetSet { dimension: dim, points, timestamps: None };
            }
        };

        let timestamps = params.iter().map(|u| u * self.horizon_s).collect();
        TargetSet { dimension: dim, points, timestamps: Some(timestamps) }
    }

    fn random_splines(&mut self, bounds: &DVector<f64>) -> Vec<NaturalCubicSpline> {
        let k = self.control_points;
        let knots: Vec<f64> = (0..k).map(|i| i as f64 / (k - 1) as f64).collect();
        bounds.iter().map(|&hi| {
            let values = (0..k)
                .map(|_| self.rng.gen_range(MARGIN * hi..(1.0 - MARGIN) * hi))
                .collect();
            NaturalCubicSpline::new(knots.clone(), values)
                .expect("uniform knots are strictly increasing")
        }).collect()
    }
}
