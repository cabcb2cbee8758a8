//! error.rs — Batch-fatal configuration errors
//!
//! Per-sample numerical problems never show up here: they are absorbed by
//! the estimators and surface only as undefined positions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("dimension must be 2 or 3, got {0}")]
    InvalidDimension(usize),

    #[error("workspace extent `{axis}` must be finite and > 0, got {value}")]
    InvalidExtent { axis: &'static str, value: f64 },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("reference anchor index {index} out of range for {anchors} anchors")]
    ReferenceOutOfRange { index: usize, anchors: usize },

    #[error("problem mask shape {mask:?} does not match TDOA shape {tdoa:?}")]
    ShapeMismatch { tdoa: (usize, usize), mask: (usize, usize) },

    #[error("unknown model `{0}` (known: {1})")]
    UnknownModel(String, String),

    #[error("unknown preprocessing strategy `{0}` (expected `mask` or `adaptive`)")]
    UnknownStrategy(String),

    #[error("unknown trajectory `{0}` (expected line, circle, sinusoid, random or scatter)")]
    UnknownTrajectory(String),

    #[error("unknown scenario preset `{0}` (known: {1})")]
    UnknownScenario(String, String),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter { name, reason: reason.into() }
    }
}
