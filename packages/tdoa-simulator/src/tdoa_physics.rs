//! tdoa_physics.rs — TDOA measurement simulation
//!
//! Simulates the measurement chain from ground truth to impaired observations:
//! 1. Compute true target-to-anchor ranges
//! 2. Difference every range against the reference anchor
//! 3. Add zero-mean Gaussian measurement noise to every cell
//! 4. Inject NLOS bias, multipath delay and blockage dropouts, labelling each
//!    affected cell in the problem mask
//! 5. Drop the reference column (identically zero) from both outputs
//!
//! Stages run in that order over the whole matrix. A later stage overwrites
//! the label of an earlier one on the same cell, so a cell that is both
//! NLOS-biased and blocked ends up labelled `Blockage`.

use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tdoa_types::{AnchorSet, DistanceMatrix, Grid, ProblemKind, ProblemMask, TargetSet, TdoaMatrix};
use tracing::debug;

use crate::config::{non_negative, ImpairmentConfig};
use crate::error::ConfigError;

/// Per-cell probability of an NLOS bias.
pub const NLOS_PROBABILITY: f64 = 0.2;
/// Per-cell probability of a multipath delay.
pub const MULTIPATH_PROBABILITY: f64 = 0.2;

// ── Geometry ──────────────────────────────────────────────────────────────────

pub fn euclidean_distance(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    (a - b).norm()
}

/// N targets × M anchors matrix of true distances.
pub fn compute_distances(targets: &TargetSet, anchors: &AnchorSet) -> DistanceMatrix {
    let rows = targets.points.iter()
        .map(|p| anchors.iter().map(|a| euclidean_distance(p, a)).collect())
        .collect();
    Grid::from_rows(rows).unwrap_or_else(|| Grid::filled(0, anchors.len(), 0.0))
}

/// Noise-free differential ranges of `position`, reference column removed.
pub fn differential_ranges(position: &DVector<f64>, anchors: &AnchorSet, reference_index: usize) -> Vec<f64> {
    let d_ref = anchors.get(reference_index).map_or(0.0, |a| euclidean_distance(position, a));
    anchors.iter().enumerate()
        .filter(|(i, _)| *i != reference_index)
        .map(|(_, a)| euclidean_distance(position, a) - d_ref)
        .collect()
}

// ── Simulator ─────────────────────────────────────────────────────────────────

/// Which impairment stages run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpairmentFlags {
    pub nlos: bool,
    pub multipath: bool,
    pub blockage: bool,
}

impl ImpairmentFlags {
    pub fn none() -> Self { Self::default() }
    pub fn all() -> Self { Self { nlos: true, multipath: true, blockage: true } }
}

impl From<&ImpairmentConfig> for ImpairmentFlags {
    fn from(cfg: &ImpairmentConfig) -> Self {
        Self { nlos: cfg.nlos, multipath: cfg.multipath, blockage: cfg.blockage }
    }
}

pub struct TdoaSimulator {
    noise: Normal<f64>,
    nlos_bias: Normal<f64>,
    multipath_delay: Normal<f64>,
    blockage_drop_prob: f64,
    rng: ChaCha8Rng,
}

impl TdoaSimulator {
    pub fn new(cfg: &ImpairmentConfig) -> Result<Self, ConfigError> {
        // rand_distr accepts a negative std, so the sign is checked here
        let normal = |name: &'static str, mean: f64, std: f64| {
            non_negative(name, std)?;
            Normal::new(mean, std).map_err(|e| ConfigError::invalid(name, e.to_string()))
        };
        if !(0.0..=1.0).contains(&cfg.blockage_drop_prob) {
            return Err(ConfigError::invalid("blockage_drop_prob", "must be within [0, 1]"));
        }
        Ok(Self {
            noise: normal("tdoa_noise_std", 0.0, cfg.tdoa_noise_std)?,
            nlos_bias: normal("nlos_bias_std", cfg.nlos_bias_mean, cfg.nlos_bias_std)?,
            multipath_delay: normal("multipath_delay_std", cfg.multipath_delay_mean, cfg.multipath_delay_std)?,
            blockage_drop_prob: cfg.blockage_drop_prob,
            rng: ChaCha8Rng::seed_from_u64(cfg.seed),
        })
    }

    /// Turn true distances into impaired TDOA observations plus labels.
    ///
    /// Both outputs are N × (M−1): the reference column is removed after
    /// injection.
    pub fn simulate_tdoa_measurements(
        &mut self,
        distances: &DistanceMatrix,
        flags: ImpairmentFlags,
        reference_index: usize,
    ) -> (TdoaMatrix, ProblemMask) {
        let (n, m) = distances.shape();
        let mut tdoa: Grid<Option<f64>> = Grid::filled(n, m, None);
        let mut mask = ProblemMask::filled(n, m, ProblemKind::Clean);

        for i in 0..n {
            let row = distances.row(i);
            let d_ref = row.get(reference_index).copied().unwrap_or(0.0);
            for (j, &d) in row.iter().enumerate() {
                tdoa.set(i, j, Some(d - d_ref + self.noise.sample(&mut self.rng)));
            }
        }

        if flags.nlos {
            self.inject(&mut tdoa, &mut mask, NLOS_PROBABILITY, ProblemKind::Nlos);
        }
        if flags.multipath {
            self.inject(&mut tdoa, &mut mask, MULTIPATH_PROBABILITY, ProblemKind::Multipath);
        }
        if flags.blockage {
            self.inject(&mut tdoa, &mut mask, self.blockage_drop_prob, ProblemKind::Blockage);
        }

        debug!(
            "simulated {n}x{m} TDOA: nlos={} multipath={} blockage={}",
            mask.count(ProblemKind::Nlos), mask.count(ProblemKind::Multipath), mask.count(ProblemKind::Blockage),
        );

        if reference_index < m {
            (tdoa.without_column(reference_index), mask.without_column(reference_index))
        } else {
            (tdoa, mask)
        }
    }

    /// Run one impairment stage over every cell independently.
    fn inject(&mut self, tdoa: &mut TdoaMatrix, mask: &mut ProblemMask, prob: f64, kind: ProblemKind) {
        let (n, m) = tdoa.shape();
        for i in 0..n {
            for j in 0..m {
                if !self.rng.gen_bool(prob) {
                    continue;
                }
                let cell = *tdoa.get(i, j);
                let value = match kind {
                    ProblemKind::Nlos => cell.map(|v| v + self.nlos_bias.sample(&mut self.rng)),
                    ProblemKind::Multipath => cell.map(|v| v + self.multipath_delay.sample(&mut self.rng).abs()),
                    ProblemKind::Blockage => None,
                    ProblemKind::Clean => cell,
                };
                tdoa.set(i, j, value);
                mask.set(i, j, kind);
            }
        }
    }
}
