//! least_squares.rs — Gauss-Newton least squares on differential ranges
//!
//! Minimizes, over the anchors that still have a measurement in the row:
//!   J = Σ_i  w_i * (r_i_obs - ((‖x - a_i‖ + b) - (‖x - a_ref‖ + b)))²
//!
//! Two variants:
//!   - `least_squares`: b ≡ 0, w_i = 1
//!   - `least_squares_with_clock`: b is a free clock offset (distance units)
//!     added to every predicted range, the reference included, so it cancels
//!     in each difference; the Jacobian still carries its unit column.
//!     w_i = 1/σ² from the configured measurement noise
//!
//! Each iteration solves the normal equations HᵀWH·δ = HᵀW·r through an SVD
//! pseudo-inverse (singular values below a relative cutoff are dropped). A
//! failed or non-finite solve gives a zero step, which ends the loop without
//! aborting the row.

use nalgebra::{DMatrix, DVector};
use tdoa_types::AnchorSet;

use super::{pseudo_solve, Estimator, ReducedRow, SolveOutcome};

// ── Residual & Jacobian ───────────────────────────────────────────────────────

/// Observed minus predicted differential range for each measured anchor.
///
/// Missing cells are skipped. Returns `None` only if `reference_index` does
/// not name an anchor.
pub fn residual(
    position: &DVector<f64>,
    anchors: &AnchorSet,
    tdoa_row: &[Option<f64>],
    reference_index: usize,
) -> Option<DVector<f64>> {
    ReducedRow::from_cells(tdoa_row, anchors, reference_index).map(|row| residual_of(&row, position))
}

/// Partial derivatives of the predicted differential ranges, one row per
/// measured anchor: `(x - a_i)/‖x - a_i‖ - (x - a_ref)/‖x - a_ref‖`.
///
/// A row is zero when the position sits exactly on that anchor or on the
/// reference.
pub fn jacobian(
    position: &DVector<f64>,
    anchors: &AnchorSet,
    tdoa_row: &[Option<f64>],
    reference_index: usize,
) -> Option<DMatrix<f64>> {
    ReducedRow::from_cells(tdoa_row, anchors, reference_index).map(|row| jacobian_of(&row, position))
}

pub(crate) fn residual_of(row: &ReducedRow, position: &DVector<f64>) -> DVector<f64> {
    &row.tdoa - row.predicted(position)
}

/// Residual with the clock offset on both ranges of every difference.
fn residual_with_clock(row: &ReducedRow, position: &DVector<f64>, clock: f64) -> DVector<f64> {
    let d_ref = (position - &row.reference).norm() + clock;
    let predicted = DVector::from_iterator(
        row.others.len(),
        row.others.iter().map(|a| ((position - a).norm() + clock) - d_ref),
    );
    &row.tdoa - predicted
}

/// Gradient of one predicted differential range; `None` on a zero distance.
fn gradient(row: &ReducedRow, i: usize, position: &DVector<f64>) -> Option<DVector<f64>> {
    let to_ref = position - &row.reference;
    let to_anchor = position - &row.others[i];
    let (d_ref, d_anchor) = (to_ref.norm(), to_anchor.norm());
    if d_ref == 0.0 || d_anchor == 0.0 {
        return None;
    }
    Some(to_anchor / d_anchor - to_ref / d_ref)
}

pub(crate) fn jacobian_of(row: &ReducedRow, position: &DVector<f64>) -> DMatrix<f64> {
    let mut h = DMatrix::zeros(row.others.len(), position.len());
    for i in 0..row.others.len() {
        if let Some(g) = gradient(row, i, position) {
            for (k, v) in g.iter().enumerate() {
                h[(i, k)] = *v;
            }
        }
    }
    h
}

/// Jacobian with a trailing unit column for the clock offset. Degenerate
/// rows are zero across every column.
fn jacobian_with_clock(row: &ReducedRow, position: &DVector<f64>) -> DMatrix<f64> {
    let dim = position.len();
    let mut h = DMatrix::zeros(row.others.len(), dim + 1);
    for i in 0..row.others.len() {
        if let Some(g) = gradient(row, i, position) {
            for (k, v) in g.iter().enumerate() {
                h[(i, k)] = *v;
            }
            h[(i, dim)] = 1.0;
        }
    }
    h
}

// ── Gauss-Newton core ─────────────────────────────────────────────────────────

/// δ = pinv(HᵀWH) · HᵀW·r, or zero if that cannot be formed.
fn normal_equation_step(h: &DMatrix<f64>, weights: &DMatrix<f64>, r: &DVector<f64>) -> DVector<f64> {
    let htw = h.transpose() * weights;
    let normal = &htw * h;
    let rhs = &htw * r;
    pseudo_solve(&normal, &rhs)
        .filter(|step| step.iter().all(|v| v.is_finite()))
        .unwrap_or_else(|| DVector::zeros(h.ncols()))
}

/// Apply steps until one is no longer than `tolerance` or `max_iter` runs out.
fn iterate(
    mut x: DVector<f64>,
    max_iter: usize,
    tolerance: f64,
    mut step: impl FnMut(&DVector<f64>) -> DVector<f64>,
) -> DVector<f64> {
    for _ in 0..max_iter {
        let dx = step(&x);
        x += &dx;
        if dx.norm() <= tolerance {
            break;
        }
    }
    x
}

// ── Estimators ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LeastSquaresEstimator {
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Estimator for LeastSquaresEstimator {
    fn name(&self) -> &'static str { "least_squares" }

    fn solve_row(&self, row: &[Option<f64>], anchors: &AnchorSet, reference_index: usize, _row_index: usize) -> SolveOutcome {
        let Some(reduced) = ReducedRow::new(row, anchors, reference_index) else {
            return SolveOutcome::Unsolvable;
        };
        let n = reduced.others.len();
        let weights = DMatrix::identity(n, n);
        let x = iterate(reduced.centroid(), self.max_iter, self.tolerance, |x| {
            normal_equation_step(&jacobian_of(&reduced, x), &weights, &residual_of(&reduced, x))
        });
        SolveOutcome::checked(x)
    }
}

/// Position plus one clock offset, weighted by inverse noise variance.
#[derive(Debug, Clone)]
pub struct ClockBiasLeastSquares {
    pub max_iter: usize,
    pub tolerance: f64,
    /// Measurement noise std; non-positive means unit weights
    pub noise_std: f64,
}

impl ClockBiasLeastSquares {
    fn weight(&self) -> f64 {
        if self.noise_std > 0.0 { 1.0 / (self.noise_std * self.noise_std) } else { 1.0 }
    }
}

impl Estimator for ClockBiasLeastSquares {
    fn name(&self) -> &'static str { "least_squares_with_clock" }

    fn solve_row(&self, row: &[Option<f64>], anchors: &AnchorSet, reference_index: usize, _row_index: usize) -> SolveOutcome {
        let Some(reduced) = ReducedRow::new(row, anchors, reference_index) else {
            return SolveOutcome::Unsolvable;
        };
        let dim = reduced.dimension();
        let n = reduced.others.len();
        let weights = DMatrix::from_diagonal_element(n, n, self.weight());

        // state = [position; clock offset]
        let start = reduced.centroid().push(0.0);
        let state = iterate(start, self.max_iter, self.tolerance, |state| {
            let position = state.rows(0, dim).into_owned();
            let r = residual_with_clock(&reduced, &position, state[dim]);
            normal_equation_step(&jacobian_with_clock(&reduced, &position), &weights, &r)
        });
        SolveOutcome::checked(state.rows(0, dim).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::fixtures::{box_3d, distance, noiseless_row, square_2d};
    use approx::assert_relative_eq;

    fn plain() -> LeastSquaresEstimator { LeastSquaresEstimator { max_iter: 100, tolerance: 1e-4 } }
    fn clocked() -> ClockBiasLeastSquares { ClockBiasLeastSquares { max_iter: 100, tolerance: 1e-4, noise_std: 0.05 } }

    fn solve(est: &dyn Estimator, truth: &[f64], anchors: &AnchorSet, reference: usize) -> DVector<f64> {
        let row = noiseless_row(truth, anchors, reference);
        est.solve_row(&row, anchors, reference, 0).into_position().expect("solvable row")
    }

    #[test]
    fn residual_vanishes_at_truth() {
        let anchors = square_2d();
        let row = noiseless_row(&[3.0, 7.0], &anchors, 0);
        let r = residual(&DVector::from_vec(vec![3.0, 7.0]), &anchors, &row, 0).unwrap();
        assert_eq!(r.len(), 3);
        assert!(r.norm() < 1e-12);
    }

    #[test]
    fn residual_skips_missing_cells_and_rejects_bad_reference() {
        let anchors = square_2d();
        let row = [Some(1.0), None, Some(2.0)];
        let x = DVector::from_vec(vec![5.0, 5.0]);
        assert_eq!(residual(&x, &anchors, &row, 0).unwrap().len(), 2);
        assert!(residual(&x, &anchors, &row, 9).is_none());
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let anchors = square_2d();
        let row = noiseless_row(&[2.0, 3.0], &anchors, 1);
        let x = DVector::from_vec(vec![6.0, 4.0]);
        let h = jacobian(&x, &anchors, &row, 1).unwrap();
        let eps = 1e-6;
        for k in 0..2 {
            let mut hi = x.clone();
            let mut lo = x.clone();
            hi[k] += eps;
            lo[k] -= eps;
            // residual = obs - pred, so its derivative is -H
            let dr = (residual(&hi, &anchors, &row, 1).unwrap() - residual(&lo, &anchors, &row, 1).unwrap()) / (2.0 * eps);
            for i in 0..3 {
                assert_relative_eq!(-dr[i], h[(i, k)], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn jacobian_row_is_zero_on_an_anchor() {
        let anchors = square_2d();
        let row = noiseless_row(&[1.0, 1.0], &anchors, 0);
        let on_anchor = DVector::from_vec(vec![0.0, 10.0]);
        let h = jacobian(&on_anchor, &anchors, &row, 0).unwrap();
        assert_eq!(h.row(0).norm(), 0.0);
        assert!(h.row(1).norm() > 0.0);
    }

    #[test]
    fn plain_converges_in_2d() {
        let anchors = square_2d();
        for truth in [[3.0, 7.0], [9.0, 1.0], [1.0, 1.0], [5.0, 5.0]] {
            let p = solve(&plain(), &truth, &anchors, 0);
            assert!(distance(&p, &truth) < 1e-3, "{truth:?} -> {p}");
        }
    }

    #[test]
    fn plain_converges_with_any_reference() {
        let anchors = square_2d();
        let p = solve(&plain(), &[2.5, 6.0], &anchors, 3);
        assert!(distance(&p, &[2.5, 6.0]) < 1e-3);
    }

    #[test]
    fn plain_converges_in_3d() {
        let anchors = box_3d();
        let p = solve(&plain(), &[4.0, 6.0, 2.5], &anchors, 0);
        assert!(distance(&p, &[4.0, 6.0, 2.5]) < 1e-3);
    }

    #[test]
    fn clock_variant_converges_in_2d_and_3d() {
        let p = solve(&clocked(), &[3.0, 7.0], &square_2d(), 0);
        assert!(distance(&p, &[3.0, 7.0]) < 1e-3);
        let anchors = box_3d();
        for truth in [[4.0, 6.0, 2.5], [2.0, 2.0, 1.5], [7.5, 3.0, 3.5], [2.5, 7.0, 2.5], [6.0, 5.0, 1.5]] {
            let p = solve(&clocked(), &truth, &anchors, 0);
            assert_eq!(p.len(), 3);
            assert!(distance(&p, &truth) < 1e-3, "{truth:?} -> {p}");
        }
    }

    #[test]
    fn clock_offset_cancels_in_every_difference() {
        let anchors = square_2d();
        let row = noiseless_row(&[3.0, 7.0], &anchors, 0);
        let reduced = ReducedRow::new(&row, &anchors, 0).unwrap();
        let x = DVector::from_vec(vec![4.0, 4.0]);
        let plain = residual_of(&reduced, &x);
        for clock in [-2.0, 0.0, 3.5] {
            assert!((residual_with_clock(&reduced, &x, clock) - &plain).norm() < 1e-12);
        }
    }

    #[test]
    fn clock_variant_solves_rows_with_a_dropped_cell() {
        let anchors = square_2d();
        for truth in [[3.0, 7.0], [6.0, 3.0], [2.5, 5.0], [7.5, 7.0], [5.0, 5.0]] {
            for dropped in 0..3 {
                let mut row = noiseless_row(&truth, &anchors, 0);
                row[dropped] = None;
                let p = clocked().solve_row(&row, &anchors, 0, 0).into_position().unwrap();
                assert!(distance(&p, &truth) < 1e-3, "{truth:?} without cell {dropped} -> {p}");
            }
        }
    }

    #[test]
    fn clock_variant_falls_back_to_unit_weights() {
        let est = ClockBiasLeastSquares { noise_std: 0.0, ..clocked() };
        assert_eq!(est.weight(), 1.0);
        let p = solve(&est, &[3.0, 7.0], &square_2d(), 0);
        assert!(distance(&p, &[3.0, 7.0]) < 1e-3);
    }

    #[test]
    fn one_missing_cell_still_solves_in_2d() {
        let anchors = square_2d();
        let mut row = noiseless_row(&[3.0, 7.0], &anchors, 0);
        row[1] = None;
        let p = plain().solve_row(&row, &anchors, 0, 0).into_position().unwrap();
        assert!(distance(&p, &[3.0, 7.0]) < 1e-3);
    }

    #[test]
    fn too_few_cells_is_unsolvable() {
        let anchors = square_2d();
        let row = [Some(1.0), None, None];
        assert_eq!(plain().solve_row(&row, &anchors, 0, 0), SolveOutcome::Unsolvable);
        assert_eq!(clocked().solve_row(&row, &anchors, 0, 0), SolveOutcome::Unsolvable);
    }
}
