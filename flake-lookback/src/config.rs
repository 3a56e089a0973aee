// Copyright 2020 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::LookbackError;
use crate::error::Result;
use serde::Deserialize;
use serde::Serialize;

/// Tuning for a lookback analysis. Every field has a default, so a partial config file is
/// enough.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookbackConfig {
    /// Pass rates at or below this are a consistent failure.
    pub lower_flake_threshold: f64,
    /// Pass rates at or above this are stable.
    pub upper_flake_threshold: f64,
    /// How far below the upper bound the search may go when no lower bound is specified.
    pub max_commit_positions_to_look_back: i64,
    /// Maximum number of data points before the analysis gives up.
    pub max_rounds: usize,
    /// Probe the cutoff position once when a candidate overshoots it, instead of stopping with a
    /// long-standing flake right away.
    pub clamp_to_cutoff: bool,
}

impl Default for LookbackConfig {
    fn default() -> Self {
        LookbackConfig {
            lower_flake_threshold: 0.02,
            upper_flake_threshold: 0.98,
            max_commit_positions_to_look_back: 5000,
            max_rounds: 100,
            clamp_to_cutoff: true,
        }
    }
}

impl LookbackConfig {
    /// Checks that the thresholds are ordered within [0, 1] and that the limits are positive.
    pub fn validate(&self) -> Result<()> {
        let in_unit = |x: f64| (0.0..=1.0).contains(&x);
        if !in_unit(self.lower_flake_threshold) || !in_unit(self.upper_flake_threshold) {
            return Err(LookbackError::InvalidConfig(format!(
                "flake thresholds must be within [0, 1], got {} and {}",
                self.lower_flake_threshold, self.upper_flake_threshold
            )));
        }
        if self.lower_flake_threshold >= self.upper_flake_threshold {
            return Err(LookbackError::InvalidConfig(format!(
                "lower_flake_threshold {} must be below upper_flake_threshold {}",
                self.lower_flake_threshold, self.upper_flake_threshold
            )));
        }
        if self.max_commit_positions_to_look_back < 1 {
            return Err(LookbackError::InvalidConfig(
                "max_commit_positions_to_look_back must be positive".to_string(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(LookbackError::InvalidConfig(
                "max_rounds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
