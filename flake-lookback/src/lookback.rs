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
use crate::data_point::CommitID;
use crate::data_point::DataPoint;
use crate::data_point::RegressionRange;
use crate::decision::InconclusiveReason;
use crate::error::LookbackError;
use crate::error::Result;
use log::debug;
use log::error;
use log::trace;
use std::cmp;

/// One step of the numeric search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookbackStep {
    /// Commit position to test next.
    Probe(i64),
    Culprit(CommitID),
    Stop(InconclusiveReason),
}

/// Returns the data points sorted by descending commit position.
///
/// Fails if two data points share a commit position.
pub fn sort_descending(data_points: &[DataPoint]) -> Result<Vec<DataPoint>> {
    let mut sorted = data_points.to_vec();
    sorted.sort_by(|a, b| b.commit_position.cmp(&a.commit_position));
    for pair in sorted.windows(2) {
        if pair[0].commit_position == pair[1].commit_position {
            return Err(LookbackError::DuplicateDataPoint(pair[0].commit_position));
        }
    }
    Ok(sorted)
}

/// Fails with `RepeatProbe` if the position already has a data point.
pub fn ensure_untested(data_points: &[DataPoint], commit_position: i64) -> Result<()> {
    if data_points
        .iter()
        .any(|p| p.commit_position == commit_position)
    {
        error!(
            "Refusing to rerun commit position {}, which already has a data point",
            commit_position
        );
        return Err(LookbackError::RepeatProbe(commit_position));
    }
    Ok(())
}

/// Binary search step within `(lower, upper]`. Concludes with `upper` once nothing lies between.
fn bisect_bracket(lower: &CommitID, upper: &CommitID) -> LookbackStep {
    // Widened, since the width of a bracket can exceed i64::MAX.
    let width = i128::from(upper.commit_position) - i128::from(lower.commit_position);
    if width <= 1 {
        return LookbackStep::Culprit(upper.clone());
    }
    let midpoint = i128::from(lower.commit_position) + width / 2;
    LookbackStep::Probe(midpoint as i64)
}

/// Searches backwards through history for the commit which introduced a flake.
#[derive(Clone, Debug, Default)]
pub struct LookbackSearchEngine {
    config: LookbackConfig,
}

impl LookbackSearchEngine {
    pub fn new(config: LookbackConfig) -> Self {
        LookbackSearchEngine { config }
    }

    pub fn config(&self) -> &LookbackConfig {
        &self.config
    }

    /// Computes the next commit position to test, or concludes the search.
    ///
    /// With `use_bisect`, the search is a plain binary search inside `regression_range`, which
    /// must have both ends. Otherwise the search backs off exponentially from the earliest
    /// failing data point until a passing one is found, then bisects.
    pub fn compute_next(
        &self,
        data_points: &[DataPoint],
        use_bisect: bool,
        regression_range: &RegressionRange,
    ) -> Result<LookbackStep> {
        let sorted = sort_descending(data_points)?;
        let step = if use_bisect {
            self.bisect(&sorted, regression_range)?
        } else {
            self.look_back(&sorted)?
        };
        if let LookbackStep::Probe(commit_position) = step {
            ensure_untested(&sorted, commit_position)?;
        }
        debug!("Lookback step: {:?}", step);
        Ok(step)
    }

    fn bisect(&self, sorted: &[DataPoint], range: &RegressionRange) -> Result<LookbackStep> {
        let (mut lower, mut upper) = match (&range.last_passed, &range.first_failed) {
            (Some(lower), Some(upper)) if lower.commit_position < upper.commit_position => {
                (lower.clone(), upper.clone())
            }
            _ => return Err(LookbackError::InvalidRegressionRange(range.to_string())),
        };
        // Points inside the range narrow it from the top, like RegressionRange does.
        let inside = sorted
            .iter()
            .filter(|p| range.strictly_contains(p.commit_position));
        for point in inside {
            if point.is_good(&self.config) {
                lower = point.commit_id();
                break;
            }
            upper = point.commit_id();
        }
        trace!(
            "Bisecting ({}, {}]",
            lower.commit_position,
            upper.commit_position
        );
        Ok(bisect_bracket(&lower, &upper))
    }

    fn look_back(&self, sorted: &[DataPoint]) -> Result<LookbackStep> {
        if sorted.is_empty() {
            return Err(LookbackError::NoDataPoints);
        }
        let range = RegressionRange::from_sorted_data_points(sorted, &self.config);
        trace!("Regression range from data points: {}", range);
        match (&range.last_passed, &range.first_failed) {
            (_, None) => Ok(LookbackStep::Stop(InconclusiveReason::NotReproducible)),
            (_, Some(upper)) if range.is_single_commit() => Ok(LookbackStep::Culprit(upper.clone())),
            (Some(lower), Some(upper)) => Ok(bisect_bracket(lower, upper)),
            (None, Some(earliest)) if earliest.commit_position <= 0 => {
                debug!(
                    "Flake reproduces at {}, the start of history",
                    earliest.commit_position
                );
                Ok(LookbackStep::Stop(InconclusiveReason::LongStandingFlake))
            }
            (None, Some(earliest)) => {
                let n = sorted.len();
                // Double the distance covered by the previous probe.
                let step = if n >= 2 {
                    sorted[n - 2]
                        .commit_position
                        .saturating_sub(earliest.commit_position)
                        .saturating_mul(2)
                } else {
                    1
                };
                trace!(
                    "No passing data point yet, stepping back {} from {}",
                    step,
                    earliest.commit_position
                );
                Ok(LookbackStep::Probe(cmp::max(
                    earliest.commit_position.saturating_sub(step),
                    0,
                )))
            }
        }
    }
}
