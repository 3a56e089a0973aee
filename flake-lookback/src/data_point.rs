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
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Pass rate recorded when the test did not exist at the commit.
pub const PASS_RATE_TEST_NOT_FOUND: f64 = -1.0;

/// A commit, identified both by its position in history and by its revision.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitID {
    pub commit_position: i64,
    pub revision: String,
}

impl CommitID {
    /// Creates a commit ID.
    pub fn new<S: Into<String>>(commit_position: i64, revision: S) -> Self {
        CommitID {
            commit_position,
            revision: revision.into(),
        }
    }
}

impl fmt::Display for CommitID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.commit_position, self.revision)
    }
}

/// How a data point behaved across its reruns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The test did not exist yet.
    Missing,
    Stable,
    Flaky,
    /// The test failed (nearly) every run.
    Failed,
}

impl Outcome {
    /// Returns true if the flake is known to be absent at this outcome.
    pub fn is_good(self) -> bool {
        match self {
            Outcome::Missing | Outcome::Stable => true,
            Outcome::Flaky | Outcome::Failed => false,
        }
    }
}

/// One rerun sample of the test at a single commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub commit_position: i64,
    pub revision: String,
    /// Fraction of passing runs, or `PASS_RATE_TEST_NOT_FOUND`.
    pub pass_rate: f64,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub build_number: Option<u64>,
}

impl DataPoint {
    /// Creates a data point with no iteration count or build number.
    pub fn new<S: Into<String>>(commit_position: i64, revision: S, pass_rate: f64) -> Self {
        DataPoint {
            commit_position,
            revision: revision.into(),
            pass_rate,
            iterations: 0,
            build_number: None,
        }
    }

    pub fn with_build_number(mut self, build_number: u64) -> Self {
        self.build_number = Some(build_number);
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn commit_id(&self) -> CommitID {
        CommitID::new(self.commit_position, self.revision.clone())
    }

    /// Classifies the pass rate against the configured flake thresholds.
    pub fn outcome(&self, config: &LookbackConfig) -> Outcome {
        if self.pass_rate < 0.0 {
            Outcome::Missing
        } else if self.pass_rate >= config.upper_flake_threshold {
            Outcome::Stable
        } else if self.pass_rate <= config.lower_flake_threshold {
            Outcome::Failed
        } else {
            Outcome::Flaky
        }
    }

    /// Returns true if the flake was absent at this commit.
    pub fn is_good(&self, config: &LookbackConfig) -> bool {
        self.outcome(config).is_good()
    }
}

/// Overall commit positions an analysis may search. Either side may be unbounded.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPositionRange {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
}

impl CommitPositionRange {
    pub fn new(lower: Option<i64>, upper: Option<i64>) -> Self {
        CommitPositionRange { lower, upper }
    }
}

/// Bounds of a commit range given as full commit IDs. Either side may be unbounded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIDRange {
    pub lower: Option<CommitID>,
    pub upper: Option<CommitID>,
}

impl CommitIDRange {
    /// Returns the same range with revisions dropped.
    pub fn positions(&self) -> CommitPositionRange {
        CommitPositionRange {
            lower: self.lower.as_ref().map(|c| c.commit_position),
            upper: self.upper.as_ref().map(|c| c.commit_position),
        }
    }
}

/// The narrowest known bracket around the change which introduced the flake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionRange {
    /// Most recent commit where the flake was absent.
    pub last_passed: Option<CommitID>,
    /// Commit just above `last_passed` where the flake was observed.
    pub first_failed: Option<CommitID>,
}

impl RegressionRange {
    pub fn new(last_passed: Option<CommitID>, first_failed: Option<CommitID>) -> Self {
        RegressionRange {
            last_passed,
            first_failed,
        }
    }

    /// Derives the range from data points sorted by descending commit position. Only the most
    /// recent good point matters; anything below it is ignored.
    pub fn from_sorted_data_points(data_points: &[DataPoint], config: &LookbackConfig) -> Self {
        match data_points.iter().position(|p| p.is_good(config)) {
            Some(0) => RegressionRange::new(Some(data_points[0].commit_id()), None),
            Some(i) => RegressionRange::new(
                Some(data_points[i].commit_id()),
                Some(data_points[i - 1].commit_id()),
            ),
            None => RegressionRange::new(None, data_points.last().map(DataPoint::commit_id)),
        }
    }

    /// Returns true if both ends are known and adjacent, i.e. the failing end is the culprit.
    pub fn is_single_commit(&self) -> bool {
        match (&self.last_passed, &self.first_failed) {
            (Some(lower), Some(upper)) => {
                lower.commit_position.checked_add(1) == Some(upper.commit_position)
            }
            _ => false,
        }
    }

    /// Returns true if the position is strictly inside the range. Unknown ends are unbounded.
    pub fn strictly_contains(&self, commit_position: i64) -> bool {
        let above = self
            .last_passed
            .as_ref()
            .map_or(true, |c| commit_position > c.commit_position);
        let below = self
            .first_failed
            .as_ref()
            .map_or(true, |c| commit_position < c.commit_position);
        above && below
    }
}

impl fmt::Display for RegressionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = |c: &Option<CommitID>| {
            c.as_ref()
                .map_or_else(|| "?".to_string(), |c| c.commit_position.to_string())
        };
        write!(f, "({}, {}]", end(&self.last_passed), end(&self.first_failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(commit_position: i64, pass_rate: f64) -> DataPoint {
        DataPoint::new(commit_position, format!("r{}", commit_position), pass_rate)
    }

    #[test]
    fn outcomes() {
        let config = LookbackConfig::default();
        assert_eq!(point(1, PASS_RATE_TEST_NOT_FOUND).outcome(&config), Outcome::Missing);
        assert_eq!(point(1, 1.0).outcome(&config), Outcome::Stable);
        assert_eq!(point(1, 0.98).outcome(&config), Outcome::Stable);
        assert_eq!(point(1, 0.5).outcome(&config), Outcome::Flaky);
        assert_eq!(point(1, 0.02).outcome(&config), Outcome::Failed);
        assert_eq!(point(1, 0.0).outcome(&config), Outcome::Failed);
    }

    #[test]
    fn range_with_passing_point() {
        let config = LookbackConfig::default();
        let points = vec![point(200, 0.5), point(150, 0.6), point(100, 1.0), point(50, 0.5)];
        let range = RegressionRange::from_sorted_data_points(&points, &config);
        assert_eq!(range.last_passed, Some(CommitID::new(100, "r100")));
        assert_eq!(range.first_failed, Some(CommitID::new(150, "r150")));
        assert_eq!(range.to_string(), "(100, 150]");
    }

    #[test]
    fn range_without_passing_point() {
        let config = LookbackConfig::default();
        let points = vec![point(500, 0.5), point(499, 0.5)];
        let range = RegressionRange::from_sorted_data_points(&points, &config);
        assert_eq!(range.last_passed, None);
        assert_eq!(range.first_failed, Some(CommitID::new(499, "r499")));
    }

    #[test]
    fn range_latest_passing() {
        let config = LookbackConfig::default();
        let points = vec![point(500, 1.0), point(499, 0.5)];
        let range = RegressionRange::from_sorted_data_points(&points, &config);
        assert_eq!(range.first_failed, None);
    }

    #[test]
    fn missing_test_counts_as_passing() {
        let config = LookbackConfig::default();
        let points = vec![point(20, 0.4), point(10, PASS_RATE_TEST_NOT_FOUND)];
        let range = RegressionRange::from_sorted_data_points(&points, &config);
        assert_eq!(range.last_passed, Some(CommitID::new(10, "r10")));
    }

    #[test]
    fn single_commit() {
        let range = RegressionRange::new(Some(CommitID::new(9, "a")), Some(CommitID::new(10, "b")));
        assert!(range.is_single_commit());
        assert!(!range.strictly_contains(9));
        assert!(!range.strictly_contains(10));
        let range = RegressionRange::new(Some(CommitID::new(8, "a")), Some(CommitID::new(10, "b")));
        assert!(!range.is_single_commit());
        assert!(range.strictly_contains(9));
        let range = RegressionRange::new(
            Some(CommitID::new(i64::MIN, "a")),
            Some(CommitID::new(i64::MAX, "b")),
        );
        assert!(!range.is_single_commit());
    }

    #[test]
    fn id_range_positions() {
        let range = CommitIDRange {
            lower: None,
            upper: Some(CommitID::new(42, "r42")),
        };
        assert_eq!(range.positions(), CommitPositionRange::new(None, Some(42)));
        assert_eq!(CommitIDRange::default().positions(), CommitPositionRange::default());
    }
}
