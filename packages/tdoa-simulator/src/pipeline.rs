//! pipeline.rs — One end-to-end bench run
//!
//! targets → distances → impaired TDOA + labels → (preprocess) → estimate →
//! evaluate. Every stage reads the same validated `SimConfig`; nothing is
//! carried between runs.

use std::time::Instant;

use serde::Serialize;
use tdoa_types::{PositionEstimate, ProblemKind, ProblemMask, TargetSet, TdoaMatrix};
use tracing::info;

use crate::config::SimConfig;
use crate::error::ConfigError;
use crate::estimators::{self, BatchSummary};
use crate::evaluation::{breakdown_by_kind, evaluate, Evaluation, KindBreakdown};
use crate::preprocess::{preprocess_tdoa, PreprocessStrategy};
use crate::tdoa_physics::{compute_distances, ImpairmentFlags, TdoaSimulator};
use crate::trajectory::{TrajectoryGenerator, TrajectoryKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProblemCounts {
    pub clean: usize,
    pub nlos: usize,
    pub multipath: usize,
    pub blockage: usize,
}

impl From<&ProblemMask> for ProblemCounts {
    fn from(mask: &ProblemMask) -> Self {
        Self {
            clean: mask.count(ProblemKind::Clean),
            nlos: mask.count(ProblemKind::Nlos),
            multipath: mask.count(ProblemKind::Multipath),
            blockage: mask.count(ProblemKind::Blockage),
        }
    }
}

/// Summary of one run, printable or serialisable as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub model: String,
    pub dimension: usize,
    pub num_targets: usize,
    pub trajectory: TrajectoryKind,
    pub impairments: ImpairmentFlags,
    /// `None` when preprocessing is disabled
    pub preprocessing: Option<PreprocessStrategy>,
    pub problems: ProblemCounts,
    /// Missing cells handed to the estimator
    pub missing_cells: usize,
    pub outcomes: BatchSummary,
    pub evaluation: Evaluation,
    pub by_kind: Vec<KindBreakdown>,
    pub elapsed_ms: f64,
}

/// Report plus the intermediate data it was computed from.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub report: RunReport,
    pub targets: TargetSet,
    /// Observations as simulated, before preprocessing
    pub raw_tdoa: TdoaMatrix,
    /// Observations as given to the estimator
    pub tdoa: TdoaMatrix,
    pub mask: ProblemMask,
    pub estimates: PositionEstimate,
}

pub struct Pipeline;

impl Pipeline {
    pub fn run(cfg: &SimConfig) -> Result<RunReport, ConfigError> {
        Self::execute(cfg).map(|out| out.report)
    }

    pub fn execute(cfg: &SimConfig) -> Result<RunOutput, ConfigError> {
        cfg.validate()?;
        let started = Instant::now();
        let estimator = estimators::from_config(cfg)?;
        let anchors = cfg.anchors();
        let reference_index = cfg.reference_index();
        let flags = ImpairmentFlags::from(&cfg.impairments);

        info!(
            "==> generating {} targets ({:?}, {}D)",
            cfg.targets.num_targets, cfg.targets.trajectory, cfg.workspace.dimension
        );
        let targets = TrajectoryGenerator::from_config(cfg).generate(cfg.targets.trajectory, cfg.targets.num_targets);
        let distances = compute_distances(&targets, &anchors);

        info!(
            "==> simulating TDOA (noise σ={}, nlos={}, multipath={}, blockage={})",
            cfg.impairments.tdoa_noise_std, flags.nlos, flags.multipath, flags.blockage
        );
        let (raw_tdoa, mask) = TdoaSimulator::new(&cfg.impairments)?
            .simulate_tdoa_measurements(&distances, flags, reference_index);
        let problems = ProblemCounts::from(&mask);

        let preprocessing = cfg.processing.enabled.then_some(cfg.processing.strategy);
        let tdoa = match preprocessing {
            Some(strategy) => {
                info!("==> preprocessing ({strategy:?})");
                preprocess_tdoa(&raw_tdoa, &mask, strategy)?
            }
            None => raw_tdoa.clone(),
        };

        info!("==> estimating with {}", estimator.name());
        let (estimates, outcomes) = estimator.estimate_with_summary(&tdoa, &anchors, reference_index);

        let evaluation = evaluate(&estimates, &targets);
        let by_kind = breakdown_by_kind(&evaluation, &mask);
        info!(
            "==> {} of {} samples positioned",
            evaluation.valid_count, targets.len()
        );

        let report = RunReport {
            model: estimator.name().to_string(),
            dimension: anchors.dimension(),
            num_targets: targets.len(),
            trajectory: cfg.targets.trajectory,
            impairments: flags,
            preprocessing,
            problems,
            missing_cells: tdoa.missing_count(),
            outcomes,
            evaluation,
            by_kind,
            elapsed_ms: started.elapsed().as_secs_f64() * 1e3,
        };
        Ok(RunOutput { report, targets, raw_tdoa, tdoa, mask, estimates })
    }
}
