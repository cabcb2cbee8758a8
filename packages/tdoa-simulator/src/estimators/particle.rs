//! particle.rs — Monte-Carlo TDOA estimator
//!
//! Per row: scatter particles uniformly over the workspace, then for a fixed
//! number of rounds weight each particle by exp(-Σ(pred - obs)² / bandwidth),
//! resample with replacement and diffuse with Gaussian noise. The estimate is
//! the mean of the final population.
//!
//! Needs every cell of the row; any missing measurement makes it unsolvable.

use nalgebra::DVector;
use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tdoa_types::AnchorSet;

use super::{row_rng, Estimator, SolveOutcome};
use crate::tdoa_physics::differential_ranges;

#[derive(Debug, Clone)]
pub struct ParticleFilterEstimator {
    pub particles: usize,
    pub iterations: usize,
    pub diffusion_std: f64,
    /// Kernel divisor for the squared range mismatch
    pub bandwidth: f64,
    /// Workspace extent per axis
    pub bounds: DVector<f64>,
    pub seed: u64,
}

/// Scale to sum 1. Falls back to uniform if the total is zero or any weight
/// is not finite.
fn normalise_weights(mut weights: Vec<f64>) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() || !(total > 0.0 && total.is_finite()) || weights.iter().any(|w| !w.is_finite()) {
        let n = weights.len().max(1);
        return vec![1.0 / n as f64; weights.len()];
    }
    for w in &mut weights {
        *w /= total;
    }
    weights
}

impl ParticleFilterEstimator {
    fn mismatch(&self, particle: &DVector<f64>, observed: &[f64], anchors: &AnchorSet, reference_index: usize) -> f64 {
        differential_ranges(particle, anchors, reference_index).iter()
            .zip(observed)
            .map(|(pred, obs)| (pred - obs).powi(2))
            .sum()
    }
}

impl Estimator for ParticleFilterEstimator {
    fn name(&self) -> &'static str { "particle_filter" }

    fn solve_row(&self, row: &[Option<f64>], anchors: &AnchorSet, reference_index: usize, row_index: usize) -> SolveOutcome {
        let Some(observed) = row.iter().map(|c| c.filter(|v| v.is_finite())).collect::<Option<Vec<f64>>>() else {
            return SolveOutcome::Unsolvable;
        };
        if reference_index >= anchors.len() || observed.len() + 1 != anchors.len() || self.particles == 0 {
            return SolveOutcome::Unsolvable;
        }
        let Ok(diffusion) = Normal::new(0.0, self.diffusion_std) else {
            return SolveOutcome::NumericalFailure;
        };

        let mut rng = row_rng(self.seed, row_index);
        let dim = self.bounds.len();
        let mut population: Vec<DVector<f64>> = (0..self.particles)
            .map(|_| DVector::from_iterator(dim, self.bounds.iter().map(|&hi| rng.gen::<f64>() * hi)))
            .collect();

        for _ in 0..self.iterations {
            let weights = normalise_weights(
                population.iter()
                    .map(|p| (-self.mismatch(p, &observed, anchors, reference_index) / self.bandwidth).exp())
                    .collect(),
            );
            let picker = match WeightedIndex::new(&weights) {
                Ok(picker) => picker,
                Err(_) => return SolveOutcome::NumericalFailure,
            };
            population = (0..self.particles)
                .map(|_| {
                    let mut p = population[picker.sample(&mut rng)].clone();
                    for v in p.iter_mut() {
                        *v += diffusion.sample(&mut rng);
                    }
                    p
                })
                .collect();
        }

        let mut mean = DVector::zeros(dim);
        for p in &population {
            mean += p;
        }
        SolveOutcome::checked(mean / self.particles as f64)
    }
}
