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
use crate::data_point::RegressionRange;
use crate::error::IndexLookupError;
use crate::error::LookbackError;
use crate::error::Result;
use log::debug;
use log::error;
use log::warn;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Identifies a CI builder.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuilderRef {
    pub master_name: String,
    pub builder_name: String,
}

impl BuilderRef {
    pub fn new<S: Into<String>, T: Into<String>>(master_name: S, builder_name: T) -> Self {
        BuilderRef {
            master_name: master_name.into(),
            builder_name: builder_name.into(),
        }
    }
}

impl fmt::Display for BuilderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.master_name, self.builder_name)
    }
}

/// The build in which the flake was first noticed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceBuild {
    pub builder: BuilderRef,
    pub step_name: String,
    pub build_number: u64,
}

/// Which build target's index to consult.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub isolate_target_name: String,
}

/// A completed CI build and the commit it was built at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub build_number: u64,
    pub commit_position: i64,
    pub revision: String,
}

impl BuildInfo {
    pub fn commit_id(&self) -> CommitID {
        CommitID::new(self.commit_position, self.revision.clone())
    }
}

/// Two builds bracketing a commit position: `lower.commit_position < position <=
/// upper.commit_position`. `lower` is `None` when `upper` is the oldest build available, so the
/// position only has an upper bound.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildBounds {
    #[serde(default)]
    pub lower: Option<BuildInfo>,
    pub upper: BuildInfo,
}

/// The pair of builds most likely to contain the culprit.
pub type SuspectedBuildRange = BuildBounds;

impl BuildBounds {
    /// Returns true if the commit position first landed in the upper build.
    pub fn brackets(&self, commit_position: i64) -> bool {
        self.lower
            .as_ref()
            .map_or(true, |lower| lower.commit_position < commit_position)
            && commit_position <= self.upper.commit_position
    }

    /// Returns true if no other build lies between the two bounds, i.e. every commit in between
    /// first landed in the upper build.
    pub fn is_single_build_cycle(&self) -> bool {
        self.lower
            .as_ref()
            .and_then(|lower| lower.build_number.checked_add(1))
            == Some(self.upper.build_number)
    }

    /// Returns true if both ends of the regression range are known and lie within the builds.
    pub fn contains(&self, range: &RegressionRange) -> bool {
        match (&range.last_passed, &range.first_failed) {
            (Some(last_passed), Some(first_failed)) => {
                self.lower
                    .as_ref()
                    .map_or(true, |lower| last_passed.commit_position >= lower.commit_position)
                    && first_failed.commit_position <= self.upper.commit_position
            }
            _ => false,
        }
    }
}

/// Looks up indexed build targets. This is the accurate path.
pub trait IndexedTargetLookup {
    fn bounding_indexed_targets(
        &self,
        builder: &BuilderRef,
        target_name: &str,
        commit_position: i64,
    ) -> std::result::Result<BuildBounds, IndexLookupError>;
}

/// Scans build info directly, for builders without an index.
pub trait LegacyBuildLookup {
    /// Returns `None` if no build contains the position.
    fn valid_bounding_builds(
        &self,
        builder: &BuilderRef,
        step_name: &str,
        upper_bound_hint: Option<u64>,
        commit_position: i64,
    ) -> Result<Option<BuildBounds>>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoundarySource {
    Indexed,
    Legacy,
}

/// Builds bracketing a candidate, and where they came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundaryResolution {
    pub bounds: BuildBounds,
    pub source: BoundarySource,
}

/// Rounds raw commit positions onto the builds that actually ran.
pub struct CommitBoundaryResolver<'a> {
    indexed: &'a dyn IndexedTargetLookup,
    legacy: &'a dyn LegacyBuildLookup,
}

impl<'a> CommitBoundaryResolver<'a> {
    /// Creates a resolver which tries `indexed` first and falls back to `legacy`.
    pub fn new(indexed: &'a dyn IndexedTargetLookup, legacy: &'a dyn LegacyBuildLookup) -> Self {
        CommitBoundaryResolver { indexed, legacy }
    }

    /// Finds the builds bracketing `ideal_commit_position`. The legacy lookup is only attempted
    /// when the builder is not indexed.
    pub fn round_to_build_boundary(
        &self,
        ideal_commit_position: i64,
        reference: &ReferenceBuild,
        step_metadata: &StepMetadata,
    ) -> Result<BoundaryResolution> {
        let (bounds, source) = match self.indexed.bounding_indexed_targets(
            &reference.builder,
            &step_metadata.isolate_target_name,
            ideal_commit_position,
        ) {
            Ok(bounds) => (bounds, BoundarySource::Indexed),
            Err(IndexLookupError::NotIndexed) => {
                warn!(
                    "No indexed targets of {} on {} bracket {}, falling back to build info",
                    step_metadata.isolate_target_name, reference.builder, ideal_commit_position
                );
                let bounds = self
                    .legacy
                    .valid_bounding_builds(
                        &reference.builder,
                        &reference.step_name,
                        Some(reference.build_number),
                        ideal_commit_position,
                    )?
                    .ok_or(LookbackError::NoBoundingBuild(ideal_commit_position))?;
                (bounds, BoundarySource::Legacy)
            }
            Err(err) => return Err(err.into()),
        };
        if !bounds.brackets(ideal_commit_position) {
            error!(
                "{:?} lookup returned builds at {:?} and {} which do not bracket {}",
                source,
                bounds.lower.as_ref().map(|b| b.commit_position),
                bounds.upper.commit_position,
                ideal_commit_position
            );
            return Err(LookbackError::NoBoundingBuild(ideal_commit_position));
        }
        debug!(
            "Commit position {} lies in builds ({:?}, {}]",
            ideal_commit_position,
            bounds.lower.as_ref().map(|b| b.build_number),
            bounds.upper.build_number
        );
        Ok(BoundaryResolution { bounds, source })
    }
}
