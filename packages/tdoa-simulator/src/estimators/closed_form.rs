//! closed_form.rs — One-shot TDOA solutions (Chan, Fang)
//!
//! With u = x - a_ref, b_i = a_i - a_ref and r_i the observed differential
//! range, squaring ‖x - a_i‖ = r_i + d_ref eliminates the quadratic term:
//!
//!   b_i·u + r_i·d_ref = ½(‖b_i‖² - r_i²)
//!
//! which is linear in (u, d_ref). Both solvers build this system once per
//! row and never iterate.
//!
//! - **Chan**: solve the augmented system for (u, d_ref) by least squares,
//!   then enforce the range constraint on the branch that stage picks.
//! - **Fang**: write u as an affine function of d_ref and always close with the
//!   range constraint ‖u‖ = d_ref, a scalar quadratic.

use nalgebra::{DMatrix, DVector};
use tdoa_types::AnchorSet;

use super::{inverse_condition, pseudo_solve, Estimator, ReducedRow, SolveOutcome, RANK_EPS};

/// Roots of the range quadratic this far below zero still count as zero.
const ROOT_SLACK: f64 = 1e-9;

/// Linear relation B·u + r·d_ref = k for one reduced row.
struct LinearisedRow {
    b: DMatrix<f64>,
    r: DVector<f64>,
    k: DVector<f64>,
}

impl LinearisedRow {
    fn new(row: &ReducedRow) -> Self {
        let n = row.others.len();
        let dim = row.dimension();
        let mut b = DMatrix::zeros(n, dim);
        let mut k = DVector::zeros(n);
        for (i, anchor) in row.others.iter().enumerate() {
            let bi = anchor - &row.reference;
            for j in 0..dim {
                b[(i, j)] = bi[j];
            }
            k[i] = 0.5 * (bi.norm_squared() - row.tdoa[i] * row.tdoa[i]);
        }
        Self { b, r: row.tdoa.clone(), k }
    }

    /// ‖B·u + r·d_ref - k‖
    fn misfit(&self, u: &DVector<f64>, d_ref: f64) -> f64 {
        (&self.b * u + &self.r * d_ref - &self.k).norm()
    }
}

/// Conditioning below which the augmented first stage only reflects noise.
const CHAN_MIN_INV_COND: f64 = 1e-2;

/// The affine family u(d) = p - q·d from B⁺ and the d_ref values where it
/// meets the range constraint ‖u‖ = d_ref.
struct RangeBranches {
    p: DVector<f64>,
    q: DVector<f64>,
    roots: Vec<f64>,
}

impl RangeBranches {
    /// (q·q - 1)d² - 2(p·q)d + p·p = 0, keeping non-negative roots.
    fn new(lin: &LinearisedRow) -> Result<Self, SolveOutcome> {
        if inverse_condition(&lin.b) <= RANK_EPS {
            return Err(SolveOutcome::NumericalFailure);
        }
        let (Some(p), Some(q)) = (pseudo_solve(&lin.b, &lin.k), pseudo_solve(&lin.b, &lin.r)) else {
            return Err(SolveOutcome::NumericalFailure);
        };

        let a = q.dot(&q) - 1.0;
        let b = -2.0 * p.dot(&q);
        let c = p.dot(&p);

        let roots: Vec<f64> = if a.abs() < 1e-12 {
            if b.abs() < 1e-12 {
                return Err(SolveOutcome::NumericalFailure);
            }
            vec![-c / b]
        } else {
            let sqrt_disc = (b * b - 4.0 * a * c).max(0.0).sqrt();
            vec![(-b + sqrt_disc) / (2.0 * a), (-b - sqrt_disc) / (2.0 * a)]
        };
        let roots: Vec<f64> = roots.into_iter()
            .filter(|d| d.is_finite() && *d >= -ROOT_SLACK)
            .map(|d| d.max(0.0))
            .collect();
        if roots.is_empty() {
            return Err(SolveOutcome::NumericalFailure);
        }
        Ok(Self { p, q, roots })
    }

    fn offset(&self, d_ref: f64) -> DVector<f64> {
        &self.p - &self.q * d_ref
    }
}

/// Close the linear system with ‖u‖ = d_ref. Of the admissible roots, keep
/// the one that best fits the linear system, then the one nearer the anchors.
fn range_constraint_closure(row: &ReducedRow, lin: &LinearisedRow) -> SolveOutcome {
    let branches = match RangeBranches::new(lin) {
        Ok(b) => b,
        Err(outcome) => return outcome,
    };
    let centroid = row.centroid();
    let best = branches.roots.iter()
        .map(|&d| {
            let u = branches.offset(d);
            let misfit = lin.misfit(&u, d);
            let x = &row.reference + u;
            let spread = (&x - &centroid).norm();
            (x, misfit, spread)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.2.total_cmp(&b.2)));

    match best {
        Some((x, _, _)) => SolveOutcome::checked(x),
        None => SolveOutcome::NumericalFailure,
    }
}

// ── Chan ──────────────────────────────────────────────────────────────────────

/// Two-stage Chan.
///
/// Stage one solves G·[u; d_ref] = k with G = [B | r], treating d_ref as
/// independent. Stage two enforces ‖u‖ = d_ref and keeps the branch whose
/// d_ref is nearest the stage-one value. When G is too poorly conditioned for
/// stage one to mean anything, the row goes through the misfit closure.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChanEstimator;

impl ChanEstimator {
    /// Stage one, or `None` if G is not conditioned well enough to trust.
    fn first_stage(lin: &LinearisedRow, dim: usize) -> Option<f64> {
        let n = lin.r.len();
        if n < dim + 1 {
            return None;
        }
        let g = DMatrix::from_fn(n, dim + 1, |i, j| if j < dim { lin.b[(i, j)] } else { lin.r[i] });
        if inverse_condition(&g) <= CHAN_MIN_INV_COND {
            return None;
        }
        pseudo_solve(&g, &lin.k).map(|theta| theta[dim]).filter(|d| d.is_finite())
    }
}

impl Estimator for ChanEstimator {
    fn name(&self) -> &'static str { "chan" }

    fn solve_row(&self, row: &[Option<f64>], anchors: &AnchorSet, reference_index: usize, _row_index: usize) -> SolveOutcome {
        let Some(reduced) = ReducedRow::new(row, anchors, reference_index) else {
            return SolveOutcome::Unsolvable;
        };
        let lin = LinearisedRow::new(&reduced);
        let Some(d_first) = Self::first_stage(&lin, reduced.dimension()) else {
            return range_constraint_closure(&reduced, &lin);
        };

        let branches = match RangeBranches::new(&lin) {
            Ok(b) => b,
            Err(outcome) => return outcome,
        };
        let d_ref = branches.roots.iter().copied()
            .min_by(|a, b| (a - d_first).abs().total_cmp(&(b - d_first).abs()));
        match d_ref {
            Some(d) => SolveOutcome::checked(&reduced.reference + branches.offset(d)),
            None => SolveOutcome::NumericalFailure,
        }
    }
}

// ── Fang ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct FangEstimator;

impl Estimator for FangEstimator {
    fn name(&self) -> &'static str { "fang" }

    fn solve_row(&self, row: &[Option<f64>], anchors: &AnchorSet, reference_index: usize, _row_index: usize) -> SolveOutcome {
        match ReducedRow::new(row, anchors, reference_index) {
            Some(reduced) => range_constraint_closure(&reduced, &LinearisedRow::new(&reduced)),
            None => SolveOutcome::Unsolvable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::fixtures::{box_3d, distance, noiseless_row, square_2d};
    use crate::estimators::LeastSquaresEstimator;

    fn solve(est: &dyn Estimator, truth: &[f64], anchors: &AnchorSet, reference: usize) -> DVector<f64> {
        let row = noiseless_row(truth, anchors, reference);
        est.solve_row(&row, anchors, reference, 0).into_position().expect("solvable row")
    }

    #[test]
    fn chan_fang_and_least_squares_agree_on_clean_geometry() {
        let anchors = square_2d();
        let ls = LeastSquaresEstimator { max_iter: 100, tolerance: 1e-4 };
        for truth in [[3.0, 7.0], [9.0, 1.0], [1.0, 1.0]] {
            let chan = solve(&ChanEstimator, &truth, &anchors, 0);
            let fang = solve(&FangEstimator, &truth, &anchors, 0);
            let lsq = solve(&ls, &truth, &anchors, 0);
            assert!(distance(&chan, &truth) < 1e-6, "chan {truth:?} -> {chan}");
            assert!(distance(&fang, &truth) < 1e-6, "fang {truth:?} -> {fang}");
            assert!((&chan - &lsq).norm() < 1e-3);
            assert!((&fang - &lsq).norm() < 1e-3);
        }
    }

    #[test]
    fn chan_falls_back_when_all_ranges_are_equal() {
        // every differential range is zero at the centre: [B | r] loses rank
        let anchors = square_2d();
        let p = solve(&ChanEstimator, &[5.0, 5.0], &anchors, 0);
        assert!(distance(&p, &[5.0, 5.0]) < 1e-6);
    }

    #[test]
    fn chan_stays_within_the_noise_under_perturbed_ranges() {
        let anchors = square_2d();
        for truth in [[4.8, 5.3], [3.0, 7.0], [6.5, 2.0], [2.0, 2.0]] {
            let clean = noiseless_row(&truth, &anchors, 0);
            for pattern in 0..8u32 {
                let row: Vec<Option<f64>> = clean.iter().enumerate()
                    .map(|(j, c)| c.map(|v| if (pattern >> j) & 1 == 1 { v + 0.05 } else { v - 0.05 }))
                    .collect();
                let chan = ChanEstimator.solve_row(&row, &anchors, 0, 0).into_position().unwrap();
                let fang = FangEstimator.solve_row(&row, &anchors, 0, 0).into_position().unwrap();
                assert!(distance(&chan, &truth) < 0.1, "{truth:?} pattern {pattern} -> {chan}");
                assert!((&chan - &fang).norm() < 1e-6);
            }
        }
    }

    #[test]
    fn chan_first_stage_rejects_a_noise_dominated_system() {
        // near the centre the r column of [B | r] is mostly noise
        let anchors = square_2d();
        let row: Vec<Option<f64>> = noiseless_row(&[4.8, 5.3], &anchors, 0).iter()
            .map(|c| c.map(|v| v + 0.05))
            .collect();
        let reduced = ReducedRow::new(&row, &anchors, 0).unwrap();
        let lin = LinearisedRow::new(&reduced);
        assert!(ChanEstimator::first_stage(&lin, 2).is_none());

        let clean = noiseless_row(&[2.0, 2.0], &anchors, 0);
        let reduced = ReducedRow::new(&clean, &anchors, 0).unwrap();
        let d_first = ChanEstimator::first_stage(&LinearisedRow::new(&reduced), 2).unwrap();
        assert!((d_first - 2.0 * 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn closed_forms_handle_3d() {
        let anchors = box_3d();
        for truth in [[4.0, 6.0, 2.5], [2.0, 3.0, 1.0]] {
            assert!(distance(&solve(&ChanEstimator, &truth, &anchors, 0), &truth) < 1e-6);
            assert!(distance(&solve(&FangEstimator, &truth, &anchors, 0), &truth) < 1e-6);
        }
    }

    #[test]
    fn fang_uses_a_reduced_row() {
        let anchors = square_2d();
        let mut row = noiseless_row(&[3.0, 7.0], &anchors, 0);
        row[2] = None;
        let p = FangEstimator.solve_row(&row, &anchors, 0, 0).into_position().unwrap();
        assert!(distance(&p, &[3.0, 7.0]) < 1e-6);
    }

    #[test]
    fn too_few_cells_is_unsolvable() {
        let anchors = square_2d();
        let row = [None, Some(2.0), None];
        assert_eq!(ChanEstimator.solve_row(&row, &anchors, 0, 0), SolveOutcome::Unsolvable);
        assert_eq!(FangEstimator.solve_row(&row, &anchors, 0, 0), SolveOutcome::Unsolvable);
    }

    #[test]
    fn collinear_anchors_fail_numerically() {
        let line = AnchorSet::new(2, vec![
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![1.0, 0.0]),
            DVector::from_vec(vec![2.0, 0.0]),
        ]).unwrap();
        let row = noiseless_row(&[1.0, 3.0], &line, 0);
        assert_eq!(FangEstimator.solve_row(&row, &line, 0, 0), SolveOutcome::NumericalFailure);
        assert_eq!(ChanEstimator.solve_row(&row, &line, 0, 0), SolveOutcome::NumericalFailure);
    }
}
