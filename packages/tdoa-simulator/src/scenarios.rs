//! scenarios.rs — Named impairment presets
//!
//! Each preset reproduces one measurement condition the estimators are
//! compared under. A preset only rewrites the `[impairments]` section; the
//! individual `--nlos` / `--multipath` / `--blockage` switches are applied on
//! top of it, so they can only add impairments.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ImpairmentConfig;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// No noise and no impairments (analytic TDOA)
    Noiseless,
    /// Gaussian measurement noise only
    Clean,
    /// Positive bias on roughly a fifth of the cells
    Nlos,
    /// Non-negative reflection delay on roughly a fifth of the cells
    Multipath,
    /// Random dropouts
    Blockage,
    /// Every impairment at once, with a higher dropout rate
    Harsh,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Self::Noiseless, Self::Clean, Self::Nlos, Self::Multipath, Self::Blockage, Self::Harsh,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Noiseless => "noiseless",
            Self::Clean     => "clean",
            Self::Nlos      => "nlos",
            Self::Multipath => "multipath",
            Self::Blockage  => "blockage",
            Self::Harsh     => "harsh",
        }
    }

    /// Overwrite the impairment switches (and, for the extremes, the noise
    /// and dropout levels). Bias and delay distributions are left alone.
    pub fn apply(self, imp: &mut ImpairmentConfig) {
        imp.nlos = matches!(self, Self::Nlos | Self::Harsh);
        imp.multipath = matches!(self, Self::Multipath | Self::Harsh);
        imp.blockage = matches!(self, Self::Blockage | Self::Harsh);
        match self {
            Self::Noiseless => imp.tdoa_noise_std = 0.0,
            Self::Harsh => imp.blockage_drop_prob = imp.blockage_drop_prob.max(0.25),
            _ => {}
        }
    }
}

impl FromStr for Scenario {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter()
            .find(|sc| sc.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|sc| sc.name()).collect();
                ConfigError::UnknownScenario(s.to_string(), known.join(", "))
            })
    }
}
