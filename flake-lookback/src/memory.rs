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

use crate::boundary::BuildBounds;
use crate::boundary::BuildInfo;
use crate::boundary::BuilderRef;
use crate::boundary::IndexedTargetLookup;
use crate::boundary::LegacyBuildLookup;
use crate::error::IndexLookupError;
use crate::error::LookbackError;
use crate::error::Result;
use crate::pipeline::RevisionLookup;
use log::trace;
use std::collections::BTreeMap;

/// Builds and commit history held in memory, for replaying recorded analyses and for simulation.
/// Build numbers are assumed to increase with commit position.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBuildIndex {
    builds: BTreeMap<u64, BuildInfo>,
    revisions: BTreeMap<i64, String>,
    indexed: bool,
}

impl InMemoryBuildIndex {
    /// Creates an empty index. When `indexed` is false, only the legacy build lookup succeeds.
    pub fn new(indexed: bool) -> Self {
        InMemoryBuildIndex {
            indexed,
            ..InMemoryBuildIndex::default()
        }
    }

    /// Creates a history of commits `first..=latest` with a build at every `interval` commits
    /// counting down from `latest`. Revisions are synthesized from the commit positions.
    pub fn synthetic(first: i64, latest: i64, interval: i64, indexed: bool) -> Self {
        let mut index = InMemoryBuildIndex::new(indexed);
        for commit_position in first..=latest {
            index.add_revision(commit_position, synthetic_revision(commit_position));
        }
        let mut build_positions = (first..=latest)
            .rev()
            .step_by(interval.max(1) as usize)
            .collect::<Vec<_>>();
        build_positions.reverse();
        for (build_number, commit_position) in build_positions.into_iter().enumerate() {
            index.add_build(BuildInfo {
                build_number: build_number as u64 + 1,
                commit_position,
                revision: synthetic_revision(commit_position),
            });
        }
        index
    }

    /// Adds a build, recording its revision as well.
    pub fn add_build(&mut self, build: BuildInfo) {
        self.revisions
            .insert(build.commit_position, build.revision.clone());
        self.builds.insert(build.build_number, build);
    }

    pub fn add_revision<S: Into<String>>(&mut self, commit_position: i64, revision: S) {
        self.revisions.insert(commit_position, revision.into());
    }

    pub fn builds(&self) -> impl Iterator<Item = &BuildInfo> {
        self.builds.values()
    }

    pub fn build(&self, build_number: u64) -> Option<&BuildInfo> {
        self.builds.get(&build_number)
    }

    /// Returns the build with the highest build number.
    pub fn latest_build(&self) -> Option<&BuildInfo> {
        self.builds.values().next_back()
    }

    fn bounds_for(&self, commit_position: i64, max_build: Option<u64>) -> Option<BuildBounds> {
        let builds = self
            .builds
            .range(..=max_build.unwrap_or(u64::MAX))
            .map(|(_, b)| b);
        let mut lower = None;
        for build in builds {
            if build.commit_position < commit_position {
                lower = Some(build);
            } else {
                trace!(
                    "Build {} at {} is the first at or after {}",
                    build.build_number,
                    build.commit_position,
                    commit_position
                );
                return Some(BuildBounds {
                    lower: lower.cloned(),
                    upper: build.clone(),
                });
            }
        }
        None
    }
}

/// Revision used for commits in a synthetic history.
pub fn synthetic_revision(commit_position: i64) -> String {
    format!("{:040x}", commit_position)
}

impl IndexedTargetLookup for InMemoryBuildIndex {
    fn bounding_indexed_targets(
        &self,
        _builder: &BuilderRef,
        _target_name: &str,
        commit_position: i64,
    ) -> std::result::Result<BuildBounds, IndexLookupError> {
        if !self.indexed {
            return Err(IndexLookupError::NotIndexed);
        }
        self.bounds_for(commit_position, None)
            .ok_or(IndexLookupError::NotIndexed)
    }
}

impl LegacyBuildLookup for InMemoryBuildIndex {
    fn valid_bounding_builds(
        &self,
        _builder: &BuilderRef,
        _step_name: &str,
        upper_bound_hint: Option<u64>,
        commit_position: i64,
    ) -> Result<Option<BuildBounds>> {
        Ok(self.bounds_for(commit_position, upper_bound_hint))
    }
}

impl RevisionLookup for InMemoryBuildIndex {
    fn revision_for(&self, commit_position: i64) -> Result<String> {
        self.revisions
            .get(&commit_position)
            .cloned()
            .ok_or(LookbackError::RevisionNotFound(commit_position))
    }
}
