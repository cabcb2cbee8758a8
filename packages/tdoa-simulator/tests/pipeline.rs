//! End-to-end runs through `Pipeline` with the bundled configuration.

use tdoa_simulator::config::Overrides;
use tdoa_simulator::{Pipeline, SimConfig};

fn config(o: Overrides) -> SimConfig {
    let mut cfg = SimConfig::bundled();
    cfg.apply(&o).unwrap();
    cfg
}

fn noiseless(model: &str, dimension: usize, trajectory: &str, targets: usize) -> SimConfig {
    config(Overrides {
        model: Some(model.into()),
        dimension: Some(dimension),
        scenario: Some("noiseless".into()),
        trajectory: Some(trajectory.into()),
        targets: Some(targets),
        ..Overrides::default()
    })
}

#[test]
fn deterministic_estimators_are_exact_on_noiseless_2d_paths() {
    for model in ["chan", "fang", "least_squares", "taylor"] {
        for trajectory in ["line", "circle", "sinusoid"] {
            let report = Pipeline::run(&noiseless(model, 2, trajectory, 40)).unwrap();
            assert_eq!(report.evaluation.valid_count, 40, "{model} on {trajectory}");
            let rmse = report.evaluation.rmse.unwrap();
            assert!(rmse < 1e-3, "{model} on {trajectory}: rmse {rmse}");
        }
    }
}

#[test]
fn clock_bias_variant_tracks_a_circle() {
    for dimension in [2, 3] {
        let report = Pipeline::run(&noiseless("least_squares_with_clock", dimension, "circle", 30)).unwrap();
        assert_eq!(report.evaluation.valid_count, 30);
        assert!(report.evaluation.rmse.unwrap() < 1e-3, "{dimension}D");
    }
}

#[test]
fn three_dimensional_circle_is_recovered() {
    for model in ["chan", "fang", "least_squares", "taylor"] {
        let report = Pipeline::run(&noiseless(model, 3, "circle", 30)).unwrap();
        assert_eq!(report.dimension, 3);
        assert_eq!(report.evaluation.valid_count, 30, "{model}");
        assert!(report.evaluation.rmse.unwrap() < 1e-3, "{model}");
    }
}

#[test]
fn every_estimator_stays_near_least_squares_under_measurement_noise() {
    let run = |model: &str| {
        let cfg = config(Overrides {
            model: Some(model.into()),
            scenario: Some("clean".into()),
            trajectory: Some("circle".into()),
            targets: Some(60),
            ..Overrides::default()
        });
        let report = Pipeline::run(&cfg).unwrap();
        assert_eq!(report.evaluation.valid_count, 60, "{model}");
        report.evaluation.rmse.unwrap()
    };

    let baseline = run("least_squares");
    assert!(baseline > 0.0 && baseline < 0.1, "least_squares rmse {baseline}");
    for (model, factor) in [
        ("chan", 2.0),
        ("fang", 2.0),
        ("taylor", 2.0),
        ("least_squares_with_clock", 4.0),
        ("particle_filter", 3.0),
    ] {
        let rmse = run(model);
        assert!(rmse < factor * baseline, "{model}: rmse {rmse} vs least_squares {baseline}");
    }
}

#[test]
fn clock_bias_variant_handles_dropped_cells() {
    let mut cfg = config(Overrides {
        model: Some("least_squares_with_clock".into()),
        scenario: Some("blockage".into()),
        process: Some(false),
        trajectory: Some("circle".into()),
        targets: Some(40),
        ..Overrides::default()
    });
    cfg.impairments.tdoa_noise_std = 0.0;
    cfg.impairments.blockage_drop_prob = 0.15;
    let out = Pipeline::execute(&cfg).unwrap();

    let mut reduced_rows = 0;
    for i in 0..out.tdoa.n_rows() {
        let missing = out.tdoa.row(i).iter().filter(|c| c.is_none()).count();
        let Some(err) = out.report.evaluation.per_point_error[i] else {
            assert!(missing >= 2, "row {i} undefined with {missing} missing cells");
            continue;
        };
        if missing == 1 {
            reduced_rows += 1;
        }
        assert!(err < 1e-3, "row {i} ({missing} missing): error {err}");
    }
    assert!(reduced_rows > 0);
}

#[test]
fn particle_filter_is_close_on_noiseless_data() {
    let report = Pipeline::run(&noiseless("particle_filter", 2, "circle", 10)).unwrap();
    assert_eq!(report.evaluation.valid_count, 10);
    assert!(report.evaluation.mae.unwrap() < 0.5);
}

#[test]
fn mask_strategy_drops_every_labelled_cell() {
    let cfg = config(Overrides {
        scenario: Some("harsh".into()),
        strategy: Some("mask".into()),
        targets: Some(60),
        ..Overrides::default()
    });
    let out = Pipeline::execute(&cfg).unwrap();
    let p = out.report.problems;

    assert_eq!(out.tdoa.shape(), (60, 3));
    assert_eq!(out.mask.shape(), out.tdoa.shape());
    assert_eq!(p.clean + p.nlos + p.multipath + p.blockage, 180);
    assert_eq!(out.report.missing_cells, p.nlos + p.multipath + p.blockage);
    assert_eq!(out.raw_tdoa.missing_count(), p.blockage);
}

#[test]
fn adaptive_strategy_keeps_more_cells_than_mask() {
    let base = Overrides { scenario: Some("harsh".into()), targets: Some(60), ..Overrides::default() };
    let adaptive = Pipeline::run(&config(Overrides { strategy: Some("adaptive".into()), ..base.clone() })).unwrap();
    let mask = Pipeline::run(&config(Overrides { strategy: Some("mask".into()), ..base })).unwrap();
    assert!(adaptive.missing_cells <= mask.missing_cells);
    assert_eq!(adaptive.problems, mask.problems);
}

#[test]
fn particle_filter_rejects_rows_with_dropouts() {
    let mut cfg = config(Overrides {
        model: Some("particle_filter".into()),
        scenario: Some("blockage".into()),
        process: Some(false),
        targets: Some(20),
        ..Overrides::default()
    });
    cfg.impairments.blockage_drop_prob = 0.3;
    let out = Pipeline::execute(&cfg).unwrap();

    let gapped: Vec<usize> = (0..out.tdoa.n_rows())
        .filter(|&i| out.tdoa.row(i).iter().any(Option::is_none))
        .collect();
    assert!(!gapped.is_empty());
    assert_eq!(out.report.outcomes.unsolvable, gapped.len());
    for i in gapped {
        assert!(out.estimates.rows[i].is_none());
        assert!(!out.report.evaluation.valid_mask[i]);
    }
}

#[test]
fn same_config_same_report() {
    let cfg = config(Overrides {
        model: Some("taylor".into()),
        scenario: Some("harsh".into()),
        trajectory: Some("random".into()),
        seed: Some(5),
        targets: Some(50),
        ..Overrides::default()
    });
    let a = Pipeline::run(&cfg).unwrap();
    let b = Pipeline::run(&cfg).unwrap();
    assert_eq!(a.evaluation, b.evaluation);
    assert_eq!(a.outcomes, b.outcomes);
}

#[test]
fn report_serialises_to_json() {
    let report = Pipeline::run(&noiseless("fang", 2, "scatter", 5)).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["model"], "fang");
    assert_eq!(json["trajectory"], "scatter");
    assert_eq!(json["preprocessing"], "adaptive");
    assert_eq!(json["evaluation"]["per_point_error"].as_array().unwrap().len(), 5);
}

#[test]
fn invalid_config_is_rejected_before_running() {
    let mut cfg = SimConfig::bundled();
    cfg.model.name = "kalman".into();
    assert!(Pipeline::run(&cfg).is_err());
}
