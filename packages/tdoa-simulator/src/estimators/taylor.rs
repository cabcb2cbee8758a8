//! taylor.rs — Taylor-series linearisation with divergence guards
//!
//! Same linearisation as the least-squares solver, but started from a jittered
//! anchor centroid, capped at fewer iterations, and solving H·δ = r directly
//! (SVD least squares) instead of the normal equations. A row is abandoned
//! when the estimate lands on an anchor or runs far outside the workspace.

use nalgebra::DVector;
use rand_distr::{Distribution, Normal};
use tdoa_types::AnchorSet;

use super::least_squares::{jacobian_of, residual_of};
use super::{pseudo_solve, row_rng, Estimator, ReducedRow, SolveOutcome};

/// Distances below this count as sitting on an anchor.
const MIN_RANGE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct TaylorEstimator {
    pub max_iter: usize,
    pub tolerance: f64,
    /// Std of the per-axis jitter added to the starting centroid
    pub init_std: f64,
    /// Abort once |x_k| exceeds this many workspace extents
    pub divergence_factor: f64,
    /// Workspace extent per axis
    pub bounds: DVector<f64>,
    pub seed: u64,
}

impl TaylorEstimator {
    fn start(&self, reduced: &ReducedRow, row_index: usize) -> DVector<f64> {
        let mut x = reduced.centroid();
        if let Ok(jitter) = Normal::new(0.0, self.init_std) {
            let mut rng = row_rng(self.seed, row_index);
            for v in x.iter_mut() {
                *v += jitter.sample(&mut rng);
            }
        }
        x
    }

    fn diverged(&self, x: &DVector<f64>) -> bool {
        x.iter().zip(self.bounds.iter()).any(|(v, hi)| v.abs() > self.divergence_factor * hi)
    }
}

fn touches_anchor(reduced: &ReducedRow, x: &DVector<f64>) -> bool {
    std::iter::once(&reduced.reference)
        .chain(reduced.others.iter())
        .any(|a| (x - a).norm() < MIN_RANGE)
}

impl Estimator for TaylorEstimator {
    fn name(&self) -> &'static str { "taylor" }

    fn solve_row(&self, row: &[Option<f64>], anchors: &AnchorSet, reference_index: usize, row_index: usize) -> SolveOutcome {
        let Some(reduced) = ReducedRow::new(row, anchors, reference_index) else {
            return SolveOutcome::Unsolvable;
        };
        let mut x = self.start(&reduced, row_index);

        for _ in 0..self.max_iter {
            if touches_anchor(&reduced, &x) {
                return SolveOutcome::NumericalFailure;
            }
            let h = jacobian_of(&reduced, &x);
            let r = residual_of(&reduced, &x);
            let dx = pseudo_solve(&h, &r)
                .filter(|d| d.iter().all(|v| v.is_finite()))
                .unwrap_or_else(|| DVector::zeros(x.len()));

            let next = &x + &dx;
            if self.diverged(&next) {
                return SolveOutcome::NumericalFailure;
            }
            x = next;
            if dx.norm() < self.tolerance {
                break;
            }
        }
        SolveOutcome::checked(x)
    }
}
