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

use crate::boundary::ReferenceBuild;
use crate::boundary::SuspectedBuildRange;
use crate::config::LookbackConfig;
use crate::data_point::CommitID;
use crate::data_point::DataPoint;
use crate::data_point::RegressionRange;
use crate::error::LookbackError;
use crate::error::Result;
use im_rc::OrdMap;
use serde::Deserialize;
use serde::Serialize;
use std::convert::TryFrom;

/// Progress of the one-shot heuristic analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicStatus {
    NotStarted,
    Completed { suspect: Option<CommitID> },
}

impl Default for HeuristicStatus {
    fn default() -> Self {
        HeuristicStatus::NotStarted
    }
}

impl HeuristicStatus {
    /// Returns the suspect the heuristic reported, if it ran and found one.
    pub fn suspect(&self) -> Option<&CommitID> {
        match self {
            HeuristicStatus::Completed { suspect } => suspect.as_ref(),
            HeuristicStatus::NotStarted => None,
        }
    }
}

/// Snapshot of one flake analysis. Every modification returns a new snapshot; the data points
/// are kept in a persistent map so snapshots share structure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredAnalysis", into = "StoredAnalysis")]
pub struct AnalysisState {
    reference: ReferenceBuild,
    data_points: OrdMap<i64, DataPoint>,
    suspected_build_range: Option<SuspectedBuildRange>,
    heuristic_status: HeuristicStatus,
}

/// Serialized form of `AnalysisState`. Data points are a plain list and go through the same
/// checks as `with_data_point` when loaded.
#[derive(Serialize, Deserialize)]
struct StoredAnalysis {
    reference: ReferenceBuild,
    #[serde(default)]
    data_points: Vec<DataPoint>,
    #[serde(default)]
    suspected_build_range: Option<SuspectedBuildRange>,
    #[serde(default)]
    heuristic_status: HeuristicStatus,
}

impl TryFrom<StoredAnalysis> for AnalysisState {
    type Error = LookbackError;

    fn try_from(stored: StoredAnalysis) -> Result<Self> {
        let state = AnalysisState {
            reference: stored.reference,
            data_points: OrdMap::new(),
            suspected_build_range: stored.suspected_build_range,
            heuristic_status: stored.heuristic_status,
        };
        state.with_data_points(stored.data_points)
    }
}

impl From<AnalysisState> for StoredAnalysis {
    fn from(state: AnalysisState) -> Self {
        StoredAnalysis {
            data_points: state.data_points(),
            reference: state.reference,
            suspected_build_range: state.suspected_build_range,
            heuristic_status: state.heuristic_status,
        }
    }
}

impl AnalysisState {
    /// Creates an analysis with no data points for the flake noticed in `reference`.
    pub fn new(reference: ReferenceBuild) -> Self {
        AnalysisState {
            reference,
            data_points: OrdMap::new(),
            suspected_build_range: None,
            heuristic_status: HeuristicStatus::NotStarted,
        }
    }

    /// Returns a snapshot with the data point added.
    ///
    /// Fails if the commit position already has a data point.
    pub fn with_data_point(&self, data_point: DataPoint) -> Result<Self> {
        if self.data_points.contains_key(&data_point.commit_position) {
            return Err(LookbackError::DuplicateDataPoint(
                data_point.commit_position,
            ));
        }
        let mut state = self.clone();
        state
            .data_points
            .insert(data_point.commit_position, data_point);
        Ok(state)
    }

    /// Returns a snapshot with every data point added, failing on the first repeated position.
    pub fn with_data_points<I: IntoIterator<Item = DataPoint>>(&self, data_points: I) -> Result<Self> {
        data_points
            .into_iter()
            .try_fold(self.clone(), |state, p| state.with_data_point(p))
    }

    /// Returns a snapshot recording the builds last found to bracket the regression.
    pub fn with_suspected_build_range(&self, range: SuspectedBuildRange) -> Self {
        AnalysisState {
            suspected_build_range: Some(range),
            ..self.clone()
        }
    }

    /// Returns a snapshot with the heuristic status replaced.
    pub fn with_heuristic_status(&self, status: HeuristicStatus) -> Self {
        AnalysisState {
            heuristic_status: status,
            ..self.clone()
        }
    }

    pub fn reference(&self) -> &ReferenceBuild {
        &self.reference
    }

    /// Returns the data points, most recent first.
    pub fn data_points(&self) -> Vec<DataPoint> {
        self.data_points.values().rev().cloned().collect()
    }

    /// Returns the number of data points.
    pub fn len(&self) -> usize {
        self.data_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_points.is_empty()
    }

    /// Returns the data point at `commit_position`, if one was recorded.
    pub fn find_data_point(&self, commit_position: i64) -> Option<&DataPoint> {
        self.data_points.get(&commit_position)
    }

    /// Returns the highest commit position with a data point.
    pub fn latest_commit_position(&self) -> Option<i64> {
        self.data_points.get_max().map(|(k, _)| *k)
    }

    /// Returns the narrowest bracket around the regression given the data points so far.
    pub fn regression_range(&self, config: &LookbackConfig) -> RegressionRange {
        RegressionRange::from_sorted_data_points(&self.data_points(), config)
    }

    pub fn suspected_build_range(&self) -> Option<&SuspectedBuildRange> {
        self.suspected_build_range.as_ref()
    }

    pub fn heuristic_status(&self) -> &HeuristicStatus {
        &self.heuristic_status
    }
}
