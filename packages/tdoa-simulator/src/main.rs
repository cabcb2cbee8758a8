//! main.rs — TDOA positioning bench entry point
//!
//! Loads config.toml (or the bundled copy), applies command-line overrides,
//! runs one pipeline pass and reports accuracy either as log lines or as a
//! single JSON document on stdout (`--json`).

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use tdoa_simulator::config::Overrides;
use tdoa_simulator::estimators::EstimatorKind;
use tdoa_simulator::{Pipeline, RunReport, SimConfig};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tdoa-sim", about = "TDOA positioning bench: simulate, clean, estimate, evaluate")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Estimator: chan, fang, least_squares, least_squares_with_clock, taylor, particle_filter
    #[arg(short, long)]
    model: Option<String>,
    /// Spatial dimension (2 or 3)
    #[arg(short, long)]
    dimension: Option<usize>,
    /// Impairment preset: noiseless, clean, nlos, multipath, blockage, harsh
    #[arg(long)]
    preset: Option<String>,
    /// Inject NLOS bias
    #[arg(long)]
    nlos: bool,
    /// Inject multipath delay
    #[arg(long)]
    multipath: bool,
    /// Inject blockage dropouts
    #[arg(long)]
    blockage: bool,
    /// Run the preprocessor (true / false)
    #[arg(long)]
    process: Option<bool>,
    /// Preprocessing strategy: mask or adaptive
    #[arg(long)]
    strategy: Option<String>,
    /// Trajectory: line, circle, sinusoid, random, scatter
    #[arg(long)]
    trajectory: Option<String>,
    /// Master seed for targets, impairments and estimators
    #[arg(long)]
    seed: Option<u64>,
    /// Number of target samples
    #[arg(long)]
    targets: Option<usize>,
    /// Print the run report as JSON instead of log lines
    #[arg(long)]
    json: bool,
    /// List registered estimators and exit
    #[arg(long)]
    list_models: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            model: self.model.clone(),
            dimension: self.dimension,
            scenario: self.preset.clone(),
            nlos: self.nlos,
            multipath: self.multipath,
            blockage: self.blockage,
            process: self.process,
            strategy: self.strategy.clone(),
            trajectory: self.trajectory.clone(),
            seed: self.seed,
            targets: self.targets,
        }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tdoa_simulator=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.list_models {
        for (name, _) in EstimatorKind::REGISTRY {
            println!("{name}");
        }
        return Ok(());
    }

    let mut cfg = SimConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config))?;
    cfg.apply(&args.overrides()).context("applying command-line overrides")?;
    cfg.validate().context("invalid configuration")?;

    info!(
        "📡 TDOA bench — model={}, {}D, {} targets, {} anchors (reference {})",
        cfg.model.name, cfg.workspace.dimension, cfg.targets.num_targets,
        cfg.anchors().len(), cfg.reference_index()
    );

    let report = Pipeline::run(&cfg).context("pipeline run failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report).context("serialising report")?);
    } else {
        log_report(&report);
    }
    Ok(())
}

fn log_report(report: &RunReport) {
    let eval = &report.evaluation;
    let p = &report.problems;
    info!(
        "labels: clean={} nlos={} multipath={} blockage={} | missing after cleanup={}",
        p.clean, p.nlos, p.multipath, p.blockage, report.missing_cells
    );
    info!(
        "outcomes: solved={} unsolvable={} numerical_failure={}",
        report.outcomes.solved, report.outcomes.unsolvable, report.outcomes.numerical_failure
    );

    match (eval.rmse, eval.mae) {
        (Some(rmse), Some(mae)) => info!(
            "✅ {}: RMSE={rmse:.4} MAE={mae:.4} over {}/{} samples ({:.1} ms)",
            report.model, eval.valid_count, report.num_targets, report.elapsed_ms
        ),
        _ => warn!("{}: no sample could be positioned", report.model),
    }

    for b in &report.by_kind {
        if let Some(err) = b.mean_error {
            info!("  {:?}: rows={} mean error={err:.4}", b.kind, b.rows);
        }
    }
    for (i, err) in eval.per_point_error.iter().enumerate() {
        match err {
            Some(e) => info!("  sample {i:>4}: error={e:.4}"),
            None => info!("  sample {i:>4}: undefined"),
        }
    }
}
