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

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LookbackError>;

/// Errors returned by a lookback round.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookbackError {
    #[error("no data points to search from")]
    NoDataPoints,

    #[error("commit position {0} already has a data point")]
    DuplicateDataPoint(i64),

    #[error("regression range needs both a passing and a failing commit: {0}")]
    InvalidRegressionRange(String),

    /// The search asked to rerun a commit position that already has a data point.
    #[error("next commit position {0} has already been tested")]
    RepeatProbe(i64),

    /// Heuristic analysis suggested a commit position that already has a data point.
    #[error("heuristic suspect at commit position {0} has already been tested")]
    HeuristicRepeat(i64),

    #[error("no builds bracket commit position {0}")]
    NoBoundingBuild(i64),

    #[error("build index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("no revision known for commit position {0}")]
    RevisionNotFound(i64),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Failure of the indexed target lookup. Only `NotIndexed` is recoverable through the legacy
/// build lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexLookupError {
    #[error("builder has no indexed targets bracketing the commit position")]
    NotIndexed,

    #[error("{0}")]
    Unavailable(String),
}

impl From<IndexLookupError> for LookbackError {
    fn from(err: IndexLookupError) -> Self {
        LookbackError::IndexUnavailable(err.to_string())
    }
}
