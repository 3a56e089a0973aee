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

use crate::config::LookbackConfig;
use crate::data_point::CommitPositionRange;
use crate::data_point::RegressionRange;
use log::info;
use std::cmp;

/// What to do with a candidate commit position once the cutoff is known.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CutoffVerdict {
    /// The candidate is allowed.
    Allowed(i64),
    /// The candidate overshot the cutoff; probe the cutoff itself instead.
    Clamped(i64),
    /// The flake predates the cutoff.
    LongStandingFlake,
}

/// Bounds how far back the search may go.
#[derive(Clone, Debug, Default)]
pub struct CutoffPolicy {
    max_commit_positions_to_look_back: i64,
    clamp_to_cutoff: bool,
}

impl CutoffPolicy {
    pub fn new(config: &LookbackConfig) -> Self {
        CutoffPolicy {
            max_commit_positions_to_look_back: config.max_commit_positions_to_look_back,
            clamp_to_cutoff: config.clamp_to_cutoff,
        }
    }

    /// Returns the earliest commit position the search may probe. `latest_position` stands in
    /// for the upper bound when none is specified.
    pub fn earliest_allowed(&self, range: &CommitPositionRange, latest_position: i64) -> i64 {
        let upper = range.upper.unwrap_or(latest_position);
        let by_distance = upper.saturating_sub(self.max_commit_positions_to_look_back);
        cmp::max(cmp::max(range.lower.unwrap_or(0), by_distance), 0)
    }

    /// Returns true if `candidate` lies before the earliest allowed position.
    pub fn is_beyond_cutoff(&self, candidate: i64, earliest_allowed: i64) -> bool {
        candidate < earliest_allowed
    }

    /// Applies the cutoff to a candidate. Clamping only happens when enabled and when the cutoff
    /// position is still strictly inside the regression range, so it can never be a repeat.
    pub fn check(
        &self,
        candidate: i64,
        earliest_allowed: i64,
        regression_range: &RegressionRange,
    ) -> CutoffVerdict {
        if !self.is_beyond_cutoff(candidate, earliest_allowed) {
            return CutoffVerdict::Allowed(candidate);
        }
        if self.clamp_to_cutoff && regression_range.strictly_contains(earliest_allowed) {
            info!(
                "Candidate {} is before the cutoff, probing cutoff {} instead",
                candidate, earliest_allowed
            );
            return CutoffVerdict::Clamped(earliest_allowed);
        }
        info!(
            "Candidate {} is before the cutoff {}, treating as a long-standing flake",
            candidate, earliest_allowed
        );
        CutoffVerdict::LongStandingFlake
    }
}
