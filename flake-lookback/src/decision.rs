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

use crate::data_point::CommitID;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Why an analysis stopped without a culprit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconclusiveReason {
    /// The flake predates the earliest commit position the search may probe.
    LongStandingFlake,
    /// The most recent data point does not show the flake.
    NotReproducible,
    /// The analysis ran out of rounds.
    RoundLimitReached,
}

impl fmt::Display for InconclusiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InconclusiveReason::LongStandingFlake => "long-standing flake",
            InconclusiveReason::NotReproducible => "flake not reproducible",
            InconclusiveReason::RoundLimitReached => "round limit reached",
        })
    }
}

/// Result of one analysis round. At most one of `next_commit_id()` and `culprit_commit_id()` is
/// populated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchDecision {
    /// Run the test at this commit, then call again.
    Next(CommitID),
    /// The search concluded.
    Culprit(CommitID),
    Inconclusive(InconclusiveReason),
}

impl SearchDecision {
    /// Returns the commit to test next, if the analysis continues.
    pub fn next_commit_id(&self) -> Option<&CommitID> {
        match self {
            SearchDecision::Next(commit) => Some(commit),
            _ => None,
        }
    }

    /// Returns the culprit, if one was found.
    pub fn culprit_commit_id(&self) -> Option<&CommitID> {
        match self {
            SearchDecision::Culprit(commit) => Some(commit),
            _ => None,
        }
    }

    /// Returns true if no further rounds are needed.
    pub fn is_final(&self) -> bool {
        !matches!(self, SearchDecision::Next(_))
    }
}

impl fmt::Display for SearchDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchDecision::Next(commit) => write!(f, "next {}", commit),
            SearchDecision::Culprit(commit) => write!(f, "culprit {}", commit),
            SearchDecision::Inconclusive(reason) => write!(f, "inconclusive: {}", reason),
        }
    }
}
