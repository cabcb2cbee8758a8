//! estimators — Position-from-TDOA algorithm family
//!
//! Every estimator implements [`Estimator`]: one TDOA row in, one
//! [`SolveOutcome`] out. Rows are independent, so [`Estimator::estimate`]
//! fans them out with rayon. The outcome is turned into the undefined
//! position (`None`) in exactly one place, [`SolveOutcome::into_position`].
//!
//! Selection happens once, at startup, through the static [`EstimatorKind`]
//! registry. An unknown name is a `ConfigError`, never a per-row failure.

pub mod closed_form;
pub mod least_squares;
pub mod particle;
pub mod taylor;

use nalgebra::{DMatrix, DVector, Dyn, SVD};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use tdoa_types::{AnchorSet, PositionEstimate, TdoaMatrix};
use tracing::{debug, warn};

use crate::config::SimConfig;
use crate::error::ConfigError;

pub use closed_form::{ChanEstimator, FangEstimator};
pub use least_squares::{ClockBiasLeastSquares, LeastSquaresEstimator};
pub use particle::ParticleFilterEstimator;
pub use taylor::TaylorEstimator;

/// Singular values below this fraction of the largest are treated as zero.
pub(crate) const RANK_EPS: f64 = 1e-10;

// ── Per-row outcome ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    Solved(DVector<f64>),
    /// Not enough usable measurements for this row
    Unsolvable,
    /// Singular system, divergence, or a non-finite result
    NumericalFailure,
}

impl SolveOutcome {
    /// The single sentinel boundary: anything but a finite solution is `None`.
    pub fn into_position(self) -> Option<DVector<f64>> {
        match self {
            Self::Solved(p) if p.iter().all(|v| v.is_finite()) => Some(p),
            _ => None,
        }
    }

    /// `Solved` only if every coordinate is finite.
    pub(crate) fn checked(p: DVector<f64>) -> Self {
        if p.iter().all(|v| v.is_finite()) { Self::Solved(p) } else { Self::NumericalFailure }
    }
}

/// Outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub solved: usize,
    pub unsolvable: usize,
    pub numerical_failure: usize,
}

impl BatchSummary {
    fn tally(outcomes: &[SolveOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut s, o| {
            match o {
                SolveOutcome::Solved(p) if p.iter().all(|v| v.is_finite()) => s.solved += 1,
                SolveOutcome::Solved(_) | SolveOutcome::NumericalFailure => s.numerical_failure += 1,
                SolveOutcome::Unsolvable => s.unsolvable += 1,
            }
            s
        })
    }

    pub fn undefined(&self) -> usize { self.unsolvable + self.numerical_failure }
}

// ── Capability interface ──────────────────────────────────────────────────────

pub trait Estimator: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Solve one row. `row_index` seeds per-row randomness so results do not
    /// depend on how rows are scheduled across threads.
    fn solve_row(
        &self,
        row: &[Option<f64>],
        anchors: &AnchorSet,
        reference_index: usize,
        row_index: usize,
    ) -> SolveOutcome;

    /// Positions for every row of `tdoa`, in row order.
    fn estimate(&self, tdoa: &TdoaMatrix, anchors: &AnchorSet, reference_index: usize) -> PositionEstimate {
        self.estimate_with_summary(tdoa, anchors, reference_index).0
    }

    fn estimate_with_summary(
        &self,
        tdoa: &TdoaMatrix,
        anchors: &AnchorSet,
        reference_index: usize,
    ) -> (PositionEstimate, BatchSummary) {
        let dimension = anchors.dimension();
        if reference_index >= anchors.len() || tdoa.width() + 1 != anchors.len() {
            warn!(
                "{}: TDOA width {} does not fit {} anchors with reference {reference_index}",
                self.name(), tdoa.width(), anchors.len(),
            );
            let summary = BatchSummary { unsolvable: tdoa.n_rows(), ..BatchSummary::default() };
            return (PositionEstimate { dimension, rows: vec![None; tdoa.n_rows()] }, summary);
        }

        let outcomes: Vec<SolveOutcome> = (0..tdoa.n_rows())
            .into_par_iter()
            .map(|i| self.solve_row(tdoa.row(i), anchors, reference_index, i))
            .collect();

        let summary = BatchSummary::tally(&outcomes);
        debug!(
            "{}: solved={} unsolvable={} numerical_failure={}",
            self.name(), summary.solved, summary.unsolvable, summary.numerical_failure,
        );
        if summary.undefined() * 2 > outcomes.len() {
            warn!("{}: {} of {} rows have no position", self.name(), summary.undefined(), outcomes.len());
        }

        let rows = outcomes.into_iter().map(SolveOutcome::into_position).collect();
        (PositionEstimate { dimension, rows }, summary)
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EstimatorKind {
    Chan,
    Fang,
    LeastSquares,
    LeastSquaresWithClock,
    Taylor,
    ParticleFilter,
}

impl EstimatorKind {
    pub const REGISTRY: &'static [(&'static str, EstimatorKind)] = &[
        ("chan",                     EstimatorKind::Chan),
        ("fang",                     EstimatorKind::Fang),
        ("least_squares",            EstimatorKind::LeastSquares),
        ("least_squares_with_clock", EstimatorKind::LeastSquaresWithClock),
        ("taylor",                   EstimatorKind::Taylor),
        ("particle_filter",          EstimatorKind::ParticleFilter),
    ];

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Self::REGISTRY.iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, kind)| kind)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::REGISTRY.iter().map(|(n, _)| *n).collect();
                ConfigError::UnknownModel(name.to_string(), known.join(", "))
            })
    }

    pub fn name(self) -> &'static str {
        Self::REGISTRY.iter()
            .find(|(_, k)| *k == self)
            .map_or("unknown", |(n, _)| *n)
    }

    /// Instantiate with tuning taken from `cfg`.
    pub fn build(self, cfg: &SimConfig) -> Box<dyn Estimator> {
        let est = &cfg.estimators;
        match self {
            Self::Chan => Box::new(ChanEstimator),
            Self::Fang => Box::new(FangEstimator),
            Self::LeastSquares => Box::new(LeastSquaresEstimator {
                max_iter: est.ls_max_iter,
                tolerance: est.ls_tolerance,
            }),
            Self::LeastSquaresWithClock => Box::new(ClockBiasLeastSquares {
                max_iter: est.ls_max_iter,
                tolerance: est.ls_tolerance,
                noise_std: cfg.impairments.tdoa_noise_std,
            }),
            Self::Taylor => Box::new(TaylorEstimator {
                max_iter: est.taylor_max_iter,
                tolerance: est.taylor_tolerance,
                init_std: est.taylor_init_std,
                divergence_factor: est.taylor_divergence_factor,
                bounds: cfg.workspace().upper_bounds(),
                seed: cfg.model.seed,
            }),
            Self::ParticleFilter => Box::new(ParticleFilterEstimator {
                particles: est.particles,
                iterations: est.particle_iterations,
                diffusion_std: est.particle_diffusion_std,
                bandwidth: est.particle_bandwidth,
                bounds: cfg.workspace().upper_bounds(),
                seed: cfg.model.seed,
            }),
        }
    }
}

/// Resolve `cfg.model.name` and build the estimator.
pub fn from_config(cfg: &SimConfig) -> Result<Box<dyn Estimator>, ConfigError> {
    Ok(EstimatorKind::from_name(&cfg.model.name)?.build(cfg))
}

// ── Shared missing-data handling ──────────────────────────────────────────────

/// One TDOA row with missing cells dropped, paired with the anchors that
/// still have a measurement. The reference anchor is always kept.
#[derive(Debug, Clone)]
pub struct ReducedRow {
    pub reference: DVector<f64>,
    /// Anchors with a usable measurement, in column order
    pub others: Vec<DVector<f64>>,
    /// Observed differential ranges, aligned with `others`
    pub tdoa: DVector<f64>,
}

impl ReducedRow {
    /// Drop missing or non-finite cells. `None` if fewer than D+1 anchors
    /// (reference included) remain.
    pub fn new(row: &[Option<f64>], anchors: &AnchorSet, reference_index: usize) -> Option<Self> {
        Self::from_cells(row, anchors, reference_index)
            .filter(|r| r.others.len() + 1 >= anchors.dimension() + 1)
    }

    /// Same reduction without the anchor-count check. `None` only when the
    /// reference index is out of range.
    pub fn from_cells(row: &[Option<f64>], anchors: &AnchorSet, reference_index: usize) -> Option<Self> {
        let reference = anchors.get(reference_index)?.clone();
        let (others, values): (Vec<DVector<f64>>, Vec<f64>) = row.iter().enumerate()
            .filter_map(|(col, cell)| {
                let v = cell.filter(|v| v.is_finite())?;
                let anchor = anchors.get(AnchorSet::anchor_for_column(col, reference_index))?;
                Some((anchor.clone(), v))
            })
            .unzip();
        Some(Self { reference, others, tdoa: DVector::from_vec(values) })
    }

    pub fn dimension(&self) -> usize { self.reference.len() }

    /// Mean of the anchors in use, reference included.
    pub fn centroid(&self) -> DVector<f64> {
        let mut sum = self.reference.clone();
        for a in &self.others {
            sum += a;
        }
        sum / (self.others.len() + 1) as f64
    }

    /// Predicted differential ranges at `position`.
    pub fn predicted(&self, position: &DVector<f64>) -> DVector<f64> {
        let d_ref = (position - &self.reference).norm();
        DVector::from_iterator(self.others.len(), self.others.iter().map(|a| (position - a).norm() - d_ref))
    }
}

/// Per-row generator: one ChaCha stream per row off a shared seed.
pub(crate) fn row_rng(seed: u64, row_index: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(row_index as u64);
    rng
}

/// Iteration cap for every SVD; the default one is unbounded.
const SVD_MAX_ITER: usize = 500;

fn bounded_svd(a: &DMatrix<f64>, vectors: bool) -> Option<SVD<f64, Dyn, Dyn>> {
    if a.iter().any(|v| !v.is_finite()) {
        return None;
    }
    a.clone().try_svd(vectors, vectors, f64::EPSILON, SVD_MAX_ITER)
}

/// `pinv(A) * b` via SVD. `None` when the decomposition fails.
pub(crate) fn pseudo_solve(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = bounded_svd(a, true)?;
    let max_sv = svd.singular_values.max();
    svd.solve(b, (max_sv * RANK_EPS).max(f64::MIN_POSITIVE)).ok()
}

/// Ratio of the smallest to the largest singular value (0 for rank-deficient).
pub(crate) fn inverse_condition(a: &DMatrix<f64>) -> f64 {
    let Some(svd) = bounded_svd(a, false) else {
        return 0.0;
    };
    let sv = svd.singular_values;
    let max = sv.max();
    if max > 0.0 { sv.min() / max } else { 0.0 }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use nalgebra::DVector;
    use tdoa_types::{AnchorSet, Workspace};

    use crate::tdoa_physics::differential_ranges;

    /// 10 × 10 square, anchors on the corners.
    pub fn square_2d() -> AnchorSet { AnchorSet::corners(&Workspace::new(10.0, 10.0, 5.0, 2)) }

    /// 10 × 10 × 5 box, corner anchors at distinct heights.
    pub fn box_3d() -> AnchorSet { AnchorSet::corners(&Workspace::new(10.0, 10.0, 5.0, 3)) }

    pub fn noiseless_row(p: &[f64], anchors: &AnchorSet, reference_index: usize) -> Vec<Option<f64>> {
        differential_ranges(&DVector::from_row_slice(p), anchors, reference_index)
            .into_iter()
            .map(Some)
            .collect()
    }

    pub fn distance(a: &DVector<f64>, b: &[f64]) -> f64 {
        (a - DVector::from_row_slice(b)).norm()
    }
}
