//! # tdoa-simulator
//!
//! TDOA positioning bench: simulate impaired time-difference-of-arrival
//! observations for targets moving among fixed anchors, clean them up, and
//! compare a family of position estimators against ground truth.
//!
//! Stage modules, in pipeline order:
//! - [`trajectory`]: ground-truth targets
//! - [`tdoa_physics`]: distances, TDOA differencing and impairment injection
//! - [`preprocess`]: category-aware cleanup driven by the problem mask
//! - [`estimators`]: Chan, Fang, least squares (with and without clock bias),
//!   Taylor series, particle filter
//! - [`evaluation`]: RMSE / MAE over defined estimates
//!
//! [`pipeline::Pipeline`] runs them end to end from one [`config::SimConfig`].

pub mod config;
pub mod error;
pub mod estimators;
pub mod evaluation;
pub mod pipeline;
pub mod preprocess;
pub mod scenarios;
pub mod tdoa_physics;
pub mod trajectory;

pub use config::{Overrides, SimConfig};
pub use error::ConfigError;
pub use estimators::{Estimator, EstimatorKind, SolveOutcome};
pub use evaluation::{evaluate, Evaluation};
pub use pipeline::{Pipeline, RunOutput, RunReport};
