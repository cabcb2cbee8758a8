//! evaluation.rs — Accuracy of estimates against ground truth
//!
//! Undefined rows are excluded from every aggregate. When nothing is left,
//! RMSE and MAE are `None` rather than NaN.

use serde::Serialize;
use tdoa_types::{PositionEstimate, ProblemKind, ProblemMask, TargetSet};

use crate::tdoa_physics::euclidean_distance;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    /// Euclidean error per sample; `None` where the estimate is undefined
    pub per_point_error: Vec<Option<f64>>,
    pub valid_mask: Vec<bool>,
    pub valid_count: usize,
}

/// Compare row `i` of `estimates` with sample `i` of `truth`.
///
/// Rows past the end of either input count as undefined.
pub fn evaluate(estimates: &PositionEstimate, truth: &TargetSet) -> Evaluation {
    let per_point_error: Vec<Option<f64>> = truth.points.iter().enumerate()
        .map(|(i, p)| {
            estimates.get(i)
                .filter(|e| e.len() == p.len())
                .map(|e| euclidean_distance(e, p))
                .filter(|d| d.is_finite())
        })
        .collect();

    let valid: Vec<f64> = per_point_error.iter().flatten().copied().collect();
    let valid_count = valid.len();
    let (rmse, mae) = if valid_count == 0 {
        (None, None)
    } else {
        let n = valid_count as f64;
        let mse = valid.iter().map(|e| e * e).sum::<f64>() / n;
        (Some(mse.sqrt()), Some(valid.iter().sum::<f64>() / n))
    };

    Evaluation {
        rmse,
        mae,
        valid_mask: per_point_error.iter().map(Option::is_some).collect(),
        per_point_error,
        valid_count,
    }
}

/// Error statistics for the rows affected by one kind of impairment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindBreakdown {
    pub kind: ProblemKind,
    /// Rows with at least one cell of this kind (`clean`: rows with no impaired cell)
    pub rows: usize,
    pub valid: usize,
    pub mean_error: Option<f64>,
}

pub fn breakdown_by_kind(eval: &Evaluation, mask: &ProblemMask) -> Vec<KindBreakdown> {
    ProblemKind::ALL.into_iter()
        .map(|kind| {
            let selected: Vec<usize> = (0..mask.n_rows().min(eval.per_point_error.len()))
                .filter(|&i| {
                    let labels = mask.row(i);
                    if kind.is_clean() {
                        labels.iter().all(|k| k.is_clean())
                    } else {
                        labels.contains(&kind)
                    }
                })
                .collect();
            let errors: Vec<f64> = selected.iter().filter_map(|&i| eval.per_point_error[i]).collect();
            KindBreakdown {
                kind,
                rows: selected.len(),
                valid: errors.len(),
                mean_error: (!errors.is_empty()).then(|| errors.iter().sum::<f64>() / errors.len() as f64),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn truth(points: &[[f64; 2]]) -> TargetSet {
        TargetSet {
            dimension: 2,
            points: points.iter().map(|p| DVector::from_row_slice(p)).collect(),
            timestamps: None,
        }
    }

    fn estimates(rows: Vec<Option<[f64; 2]>>) -> PositionEstimate {
        PositionEstimate { dimension: 2, rows: rows.into_iter().map(|r| r.map(|p| DVector::from_row_slice(&p))).collect() }
    }

    #[test]
    fn undefined_rows_are_excluded() {
        let t = truth(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]);
        let e = estimates(vec![Some([3.0, 4.0]), None, Some([2.0, 2.0])]);
        let eval = evaluate(&e, &t);

        assert_eq!(eval.valid_mask, vec![true, false, true]);
        assert_eq!(eval.valid_count, 2);
        assert_eq!(eval.per_point_error, vec![Some(5.0), None, Some(0.0)]);
        assert_relative_eq!(eval.mae.unwrap(), 2.5);
        assert_relative_eq!(eval.rmse.unwrap(), (12.5f64).sqrt());
    }

    #[test]
    fn all_undefined_has_no_aggregate() {
        let t = truth(&[[0.0, 0.0], [1.0, 1.0]]);
        let eval = evaluate(&estimates(vec![None, None]), &t);
        assert_eq!(eval.valid_count, 0);
        assert!(eval.rmse.is_none() && eval.mae.is_none());
    }

    #[test]
    fn short_estimate_counts_as_undefined() {
        let t = truth(&[[0.0, 0.0], [1.0, 1.0]]);
        let eval = evaluate(&estimates(vec![Some([0.0, 0.0])]), &t);
        assert_eq!(eval.valid_mask, vec![true, false]);
    }

    #[test]
    fn breakdown_groups_rows_by_label() {
        use ProblemKind::*;
        let t = truth(&[[0.0, 0.0], [0.0, 0.0], [0.0, 0.0]]);
        let e = estimates(vec![Some([1.0, 0.0]), Some([3.0, 0.0]), None]);
        let eval = evaluate(&e, &t);
        let mask = ProblemMask::from_rows(vec![
            vec![Clean, Clean, Clean],
            vec![Nlos, Clean, Blockage],
            vec![Nlos, Nlos, Clean],
        ]).unwrap();

        let by_kind = breakdown_by_kind(&eval, &mask);
        let get = |k: ProblemKind| by_kind.iter().find(|b| b.kind == k).unwrap();
        assert_eq!((get(Clean).rows, get(Clean).mean_error), (1, Some(1.0)));
        assert_eq!((get(Nlos).rows, get(Nlos).valid, get(Nlos).mean_error), (2, 1, Some(3.0)));
        assert_eq!(get(Multipath).rows, 0);
        assert_eq!(get(Blockage).mean_error, Some(3.0));
    }
}
