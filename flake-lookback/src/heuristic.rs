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

use crate::analysis::AnalysisState;
use crate::analysis::HeuristicStatus;
use crate::data_point::CommitID;
use crate::data_point::RegressionRange;
use crate::error::LookbackError;
use crate::error::Result;
use log::error;
use log::info;
use log::warn;

/// Content-based culprit suspicion, e.g. scoring the changes in the suspected build by the files
/// they touch.
pub trait HeuristicAnalyzer {
    /// Returns the commit most likely to have introduced the flake, if there is one.
    fn suspected_commit(&self, state: &AnalysisState) -> Option<CommitID>;
}

impl<F> HeuristicAnalyzer for F
where
    F: Fn(&AnalysisState) -> Option<CommitID>,
{
    fn suspected_commit(&self, state: &AnalysisState) -> Option<CommitID> {
        self(state)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeuristicOutcome {
    /// The heuristic already ran, or the regression range is not yet within one build cycle.
    Ineligible,
    /// The heuristic ran but gave nothing usable.
    Inconclusive,
    /// Test this commit next.
    Suspect(CommitID),
}

/// Runs heuristic analysis once the search has narrowed to a single build cycle, and prefers its
/// suspect over the numeric search.
pub struct HeuristicShortCircuit<'a> {
    analyzer: &'a dyn HeuristicAnalyzer,
}

impl<'a> HeuristicShortCircuit<'a> {
    pub fn new(analyzer: &'a dyn HeuristicAnalyzer) -> Self {
        HeuristicShortCircuit { analyzer }
    }

    /// Returns true if the heuristic has not run yet and the last suspected build range is a
    /// single build cycle containing `range`.
    pub fn is_eligible(state: &AnalysisState, range: &RegressionRange) -> bool {
        *state.heuristic_status() == HeuristicStatus::NotStarted
            && state
                .suspected_build_range()
                .map_or(false, |b| b.is_single_build_cycle() && b.contains(range))
    }

    /// Runs the heuristic if eligible. The returned state records that it ran, whatever the
    /// result, so it never runs twice for one analysis.
    pub fn maybe_run(
        &self,
        state: &AnalysisState,
        range: &RegressionRange,
    ) -> Result<(HeuristicOutcome, AnalysisState)> {
        if !Self::is_eligible(state, range) {
            return Ok((HeuristicOutcome::Ineligible, state.clone()));
        }
        let suspect = self.analyzer.suspected_commit(state);
        let state = state.with_heuristic_status(HeuristicStatus::Completed {
            suspect: suspect.clone(),
        });
        let suspect = match suspect {
            Some(suspect) => suspect,
            None => {
                info!("Heuristic analysis found no suspect in {}", range);
                return Ok((HeuristicOutcome::Inconclusive, state));
            }
        };
        if state.find_data_point(suspect.commit_position).is_some() {
            error!(
                "Heuristic suspect {} has already been tested",
                suspect.commit_position
            );
            return Err(LookbackError::HeuristicRepeat(suspect.commit_position));
        }
        if !range.strictly_contains(suspect.commit_position) {
            warn!(
                "Ignoring heuristic suspect {} outside regression range {}",
                suspect, range
            );
            return Ok((HeuristicOutcome::Inconclusive, state));
        }
        info!("Heuristic analysis suspects {}", suspect);
        Ok((HeuristicOutcome::Suspect(suspect), state))
    }

    /// Once the suspect has been tested and is the lowest failing commit, its parent decides the
    /// culprit in one more round.
    pub fn confirmation_probe(&self, state: &AnalysisState, range: &RegressionRange) -> Option<i64> {
        let suspect = state.heuristic_status().suspect()?;
        let first_failed = range.first_failed.as_ref()?;
        if first_failed.commit_position != suspect.commit_position {
            return None;
        }
        let parent = suspect.commit_position.checked_sub(1)?;
        if range.strictly_contains(parent) && state.find_data_point(parent).is_none() {
            Some(parent)
        } else {
            None
        }
    }
}
