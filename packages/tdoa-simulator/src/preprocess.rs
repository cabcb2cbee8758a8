//! preprocess.rs — Category-aware cleanup of impaired TDOA rows
//!
//! Strategies (closed set, selected by name in config):
//! - `mask`: every labelled cell becomes missing
//! - `adaptive`: NLOS cells become missing; multipath cells take the median
//!   of the row's clean cells; blocked cells take the mean of the row's clean
//!   cells when at least half the row is clean
//!
//! Rows are processed independently; nothing carries over between rows.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tdoa_types::{ProblemKind, ProblemMask, TdoaMatrix};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreprocessStrategy {
    Mask,
    #[default]
    Adaptive,
}

impl FromStr for PreprocessStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mask"     => Ok(Self::Mask),
            "adaptive" => Ok(Self::Adaptive),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Apply `strategy` to every row. The mask must have the TDOA matrix's shape.
pub fn preprocess_tdoa(
    tdoa: &TdoaMatrix,
    mask: &ProblemMask,
    strategy: PreprocessStrategy,
) -> Result<TdoaMatrix, ConfigError> {
    if tdoa.shape() != mask.shape() {
        return Err(ConfigError::ShapeMismatch { tdoa: tdoa.shape(), mask: mask.shape() });
    }
    let mut out = tdoa.clone();
    for i in 0..out.n_rows() {
        let labels = mask.row(i);
        match strategy {
            PreprocessStrategy::Mask => mask_row(out.row_mut(i), labels),
            PreprocessStrategy::Adaptive => adaptive_row(out.row_mut(i), labels),
        }
    }
    Ok(out)
}

fn mask_row(row: &mut [Option<f64>], labels: &[ProblemKind]) {
    for (cell, kind) in row.iter_mut().zip(labels) {
        if !kind.is_clean() {
            *cell = None;
        }
    }
}

fn adaptive_row(row: &mut [Option<f64>], labels: &[ProblemKind]) {
    let clean: Vec<f64> = row.iter().zip(labels)
        .filter(|(_, k)| k.is_clean())
        .filter_map(|(c, _)| *c)
        .collect();
    let median = median(&clean);
    let mean = if !clean.is_empty() && clean.len() >= row.len() / 2 {
        Some(clean.iter().sum::<f64>() / clean.len() as f64)
    } else {
        None
    };

    for (cell, kind) in row.iter_mut().zip(labels) {
        match kind {
            ProblemKind::Clean => {}
            ProblemKind::Nlos => *cell = None,
            ProblemKind::Multipath => *cell = median,
            ProblemKind::Blockage => *cell = mean,
        }
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] })
}
