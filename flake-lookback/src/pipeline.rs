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
use crate::boundary::CommitBoundaryResolver;
use crate::boundary::IndexedTargetLookup;
use crate::boundary::LegacyBuildLookup;
use crate::boundary::StepMetadata;
use crate::config::LookbackConfig;
use crate::cutoff::CutoffPolicy;
use crate::cutoff::CutoffVerdict;
use crate::data_point::CommitID;
use crate::data_point::CommitPositionRange;
use crate::data_point::DataPoint;
use crate::decision::InconclusiveReason;
use crate::decision::SearchDecision;
use crate::error::Result;
use crate::heuristic::HeuristicAnalyzer;
use crate::heuristic::HeuristicOutcome;
use crate::heuristic::HeuristicShortCircuit;
use crate::lookback::ensure_untested;
use crate::lookback::LookbackSearchEngine;
use crate::lookback::LookbackStep;
use log::debug;
use log::info;
use serde::Deserialize;
use serde::Serialize;

/// Maps commit positions to revisions.
pub trait RevisionLookup {
    fn revision_for(&self, commit_position: i64) -> Result<String>;
}

/// Per-round parameters supplied by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInput {
    #[serde(default)]
    pub commit_position_range: CommitPositionRange,
    #[serde(default)]
    pub step_metadata: StepMetadata,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoundOutput {
    pub decision: SearchDecision,
    /// The analysis with any bookkeeping from this round. Data points are never added here.
    pub state: AnalysisState,
}

impl RoundOutput {
    fn new(decision: SearchDecision, state: AnalysisState) -> Self {
        RoundOutput { decision, state }
    }
}

/// Decides what to test next in a flake analysis. Each call to `run` is one round: the caller
/// runs the test at the returned commit, adds the data point, and calls again.
pub struct NextCommitPositionPipeline<'a> {
    engine: LookbackSearchEngine,
    cutoff: CutoffPolicy,
    resolver: CommitBoundaryResolver<'a>,
    heuristic: HeuristicShortCircuit<'a>,
    revisions: &'a dyn RevisionLookup,
}

impl<'a> NextCommitPositionPipeline<'a> {
    /// Creates a pipeline, failing if `config` is invalid.
    pub fn new(
        config: LookbackConfig,
        indexed: &'a dyn IndexedTargetLookup,
        legacy: &'a dyn LegacyBuildLookup,
        heuristic: &'a dyn HeuristicAnalyzer,
        revisions: &'a dyn RevisionLookup,
    ) -> Result<Self> {
        config.validate()?;
        Ok(NextCommitPositionPipeline {
            cutoff: CutoffPolicy::new(&config),
            engine: LookbackSearchEngine::new(config),
            resolver: CommitBoundaryResolver::new(indexed, legacy),
            heuristic: HeuristicShortCircuit::new(heuristic),
            revisions,
        })
    }

    pub fn config(&self) -> &LookbackConfig {
        self.engine.config()
    }

    pub fn run(&self, state: &AnalysisState, input: &RoundInput) -> Result<RoundOutput> {
        let config = self.engine.config();
        if state.len() >= config.max_rounds {
            info!("Giving up after {} data points", state.len());
            return Ok(RoundOutput::new(
                SearchDecision::Inconclusive(InconclusiveReason::RoundLimitReached),
                state.clone(),
            ));
        }
        let data_points = state.data_points();
        let range = state.regression_range(config);
        let use_bisect = state
            .suspected_build_range()
            .map_or(false, |b| b.is_single_build_cycle() && b.contains(&range));
        debug!("Regression range {}, bisect: {}", range, use_bisect);

        if let Some(parent) = self.heuristic.confirmation_probe(state, &range) {
            info!("Confirming heuristic suspect by testing its parent {}", parent);
            return self.next(parent, state.clone(), &data_points);
        }

        let candidate = match self.engine.compute_next(&data_points, use_bisect, &range)? {
            LookbackStep::Probe(commit_position) => commit_position,
            LookbackStep::Culprit(culprit) => {
                info!("Culprit found: {}", culprit);
                return Ok(RoundOutput::new(
                    SearchDecision::Culprit(culprit),
                    state.clone(),
                ));
            }
            LookbackStep::Stop(reason) => {
                info!("Analysis stopped: {}", reason);
                return Ok(RoundOutput::new(
                    SearchDecision::Inconclusive(reason),
                    state.clone(),
                ));
            }
        };

        let latest = state.latest_commit_position().unwrap_or(candidate);
        let earliest_allowed = self
            .cutoff
            .earliest_allowed(&input.commit_position_range, latest);
        let candidate = match self.cutoff.check(candidate, earliest_allowed, &range) {
            CutoffVerdict::Allowed(p) | CutoffVerdict::Clamped(p) => p,
            CutoffVerdict::LongStandingFlake => {
                return Ok(RoundOutput::new(
                    SearchDecision::Inconclusive(InconclusiveReason::LongStandingFlake),
                    state.clone(),
                ));
            }
        };

        let (outcome, state) = self.heuristic.maybe_run(state, &range)?;
        if let HeuristicOutcome::Suspect(suspect) = outcome {
            info!(
                "Testing heuristic suspect {} instead of {}",
                suspect, candidate
            );
            ensure_untested(&data_points, suspect.commit_position)?;
            return Ok(RoundOutput::new(SearchDecision::Next(suspect), state));
        }

        if use_bisect {
            return self.next(candidate, state, &data_points);
        }

        let resolution =
            self.resolver
                .round_to_build_boundary(candidate, state.reference(), &input.step_metadata)?;
        let upper = resolution.bounds.upper.commit_id();
        let before_oldest_build = resolution.bounds.lower.is_none();
        let state = state.with_suspected_build_range(resolution.bounds);
        if range.strictly_contains(upper.commit_position) {
            ensure_untested(&data_points, upper.commit_position)?;
            info!("Next commit {} rounded from {}", upper, candidate);
            return Ok(RoundOutput::new(SearchDecision::Next(upper), state));
        }
        if before_oldest_build && range.last_passed.is_none() {
            info!(
                "Flake reproduces at or before the oldest build {}, treating as a long-standing flake",
                upper
            );
            return Ok(RoundOutput::new(
                SearchDecision::Inconclusive(InconclusiveReason::LongStandingFlake),
                state,
            ));
        }
        // The build holding the candidate has been tested already, so the regression lies in a
        // single build cycle.
        debug!(
            "Build at {} already tested, testing {} directly",
            upper.commit_position, candidate
        );
        self.next(candidate, state, &data_points)
    }

    fn next(
        &self,
        commit_position: i64,
        state: AnalysisState,
        data_points: &[DataPoint],
    ) -> Result<RoundOutput> {
        ensure_untested(data_points, commit_position)?;
        let revision = self.revisions.revision_for(commit_position)?;
        let commit = CommitID::new(commit_position, revision);
        info!("Next commit {}", commit);
        Ok(RoundOutput::new(SearchDecision::Next(commit), state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BuildBounds;
    use crate::boundary::BuilderRef;
    use crate::boundary::ReferenceBuild;
    use crate::error::LookbackError;
    use crate::memory::synthetic_revision;
    use crate::memory::InMemoryBuildIndex;

    fn flaky(commit_position: i64) -> DataPoint {
        DataPoint::new(commit_position, synthetic_revision(commit_position), 0.5)
    }

    fn stable(commit_position: i64) -> DataPoint {
        DataPoint::new(commit_position, synthetic_revision(commit_position), 1.0)
    }

    fn commit(commit_position: i64) -> CommitID {
        CommitID::new(commit_position, synthetic_revision(commit_position))
    }

    fn no_heuristic(_: &AnalysisState) -> Option<CommitID> {
        None
    }

    fn state(index: &InMemoryBuildIndex, points: Vec<DataPoint>) -> AnalysisState {
        AnalysisState::new(ReferenceBuild {
            builder: BuilderRef::new("chromium.linux", "Linux Tests"),
            step_name: "browser_tests".to_string(),
            build_number: index.latest_build().map_or(0, |b| b.build_number),
        })
        .with_data_points(points)
        .unwrap()
    }

    fn run_round(
        index: &InMemoryBuildIndex,
        heuristic: &dyn HeuristicAnalyzer,
        state: &AnalysisState,
        input: &RoundInput,
    ) -> Result<RoundOutput> {
        NextCommitPositionPipeline::new(LookbackConfig::default(), index, index, heuristic, index)?
            .run(state, input)
    }

    #[test]
    fn rounds_to_upper_build() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 10, true);
        let state = state(&index, vec![flaky(1000), flaky(990), flaky(970)]);
        // 970 - 40 = 930, which is a build.
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(930)));
        let state = state.with_data_point(flaky(930)).unwrap();
        // 930 - 80 = 850.
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(850)));
        let bounds = output.state.suspected_build_range().unwrap();
        assert_eq!(bounds.lower.as_ref().map(|b| b.commit_position), Some(840));
        assert_eq!(bounds.upper.commit_position, 850);
    }

    #[test]
    fn rounds_up_to_containing_build() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 10, true);
        let state = state(&index, vec![flaky(1000), stable(960)]);
        // Midpoint 980 is a build; after 980 passes the midpoint 990 is too.
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(980)));
        let state = state.with_data_point(stable(980)).unwrap();
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(990)));
        let state = output.state.with_data_point(flaky(990)).unwrap();
        // (980, 990] is a single build cycle, so the search bisects raw commits.
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(985)));
    }

    #[test]
    fn candidate_inside_tested_build_is_used_directly() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 10, true);
        let state = state(&index, vec![flaky(1000)]);
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(999)));
    }

    #[test]
    fn legacy_fallback() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 10, false);
        let state = state(&index, vec![flaky(1000), flaky(990), flaky(970)]);
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(930)));
        assert!(output.state.suspected_build_range().is_some());
    }

    #[test]
    fn no_bounding_build() {
        let mut index = InMemoryBuildIndex::new(false);
        for commit_position in 1..=1000 {
            index.add_revision(commit_position, synthetic_revision(commit_position));
        }
        let state = state(&index, vec![flaky(1000), flaky(990), flaky(970)]);
        assert_eq!(
            run_round(&index, &no_heuristic, &state, &RoundInput::default()),
            Err(LookbackError::NoBoundingBuild(930))
        );
    }

    #[test]
    fn cutoff() {
        let index = InMemoryBuildIndex::synthetic(1, 2000, 10, true);
        let state = state(&index, vec![flaky(1050), flaky(1000)]);
        let input = RoundInput {
            commit_position_range: CommitPositionRange::new(Some(1000), None),
            ..RoundInput::default()
        };
        // 1000 - 100 = 900, before the lower bound, which already reproduces the flake.
        let output = run_round(&index, &no_heuristic, &state, &input).unwrap();
        assert_eq!(
            output.decision,
            SearchDecision::Inconclusive(InconclusiveReason::LongStandingFlake)
        );
        assert_eq!(output.decision.next_commit_id(), None);
        assert_eq!(output.decision.culprit_commit_id(), None);
    }

    #[test]
    fn clamps_to_cutoff() {
        let index = InMemoryBuildIndex::synthetic(1, 2000, 10, true);
        let input = RoundInput {
            commit_position_range: CommitPositionRange::new(Some(1000), None),
            ..RoundInput::default()
        };
        let state = state(&index, vec![flaky(1100), flaky(1050)]);
        // 1050 - 100 = 950 overshoots, so the cutoff itself is tested.
        let output = run_round(&index, &no_heuristic, &state, &input).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(1000)));
        let state = state.with_data_point(flaky(1000)).unwrap();
        let output = run_round(&index, &no_heuristic, &state, &input).unwrap();
        assert_eq!(
            output.decision,
            SearchDecision::Inconclusive(InconclusiveReason::LongStandingFlake)
        );
    }

    #[test]
    fn stops_at_cutoff_without_clamping() {
        let index = InMemoryBuildIndex::synthetic(1, 2000, 10, true);
        let config = LookbackConfig {
            clamp_to_cutoff: false,
            ..LookbackConfig::default()
        };
        let pipeline =
            NextCommitPositionPipeline::new(config, &index, &index, &no_heuristic, &index).unwrap();
        let input = RoundInput {
            commit_position_range: CommitPositionRange::new(Some(1000), None),
            ..RoundInput::default()
        };
        let state = state(&index, vec![flaky(1100), flaky(1050)]);
        let output = pipeline.run(&state, &input).unwrap();
        assert_eq!(
            output.decision,
            SearchDecision::Inconclusive(InconclusiveReason::LongStandingFlake)
        );
    }

    #[test]
    fn rounds_up_to_oldest_build() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 10, true);
        // 20 - 20 = 0, which only the oldest build at 10 contains.
        let state = state(&index, vec![flaky(30), flaky(20)]);
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(10)));
        assert_eq!(
            output.state.suspected_build_range().map(|b| b.lower.is_none()),
            Some(true)
        );
    }

    #[test]
    fn flaky_at_oldest_build() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 10, true);
        let state = state(&index, vec![flaky(30), flaky(10)]);
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(
            output.decision,
            SearchDecision::Inconclusive(InconclusiveReason::LongStandingFlake)
        );
    }

    #[test]
    fn heuristic_takes_priority() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 80, true);
        // Builds at 120 and 200 are adjacent; the numeric midpoint would be 160.
        let lower = index.builds().find(|b| b.commit_position == 120).unwrap().clone();
        let upper = index.builds().find(|b| b.commit_position == 200).unwrap().clone();
        let state = state(&index, vec![stable(120), flaky(200)])
            .with_suspected_build_range(BuildBounds {
                lower: Some(lower),
                upper,
            });
        let suspect = |_: &AnalysisState| Some(commit(175));
        let output = run_round(&index, &suspect, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(175)));

        // The suspect fails, so its parent is tested next.
        let state = output.state.with_data_point(flaky(175)).unwrap();
        let output = run_round(&index, &suspect, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(174)));

        let state = output.state.with_data_point(stable(174)).unwrap();
        let output = run_round(&index, &suspect, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Culprit(commit(175)));
    }

    #[test]
    fn heuristic_without_suspect_falls_back_to_bisect() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 80, true);
        let lower = index.builds().find(|b| b.commit_position == 120).unwrap().clone();
        let upper = index.builds().find(|b| b.commit_position == 200).unwrap().clone();
        let state = state(&index, vec![stable(120), flaky(200)])
            .with_suspected_build_range(BuildBounds {
                lower: Some(lower),
                upper,
            });
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(output.decision, SearchDecision::Next(commit(160)));
    }

    #[test]
    fn heuristic_repeat_is_an_error() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 80, true);
        let lower = index.builds().find(|b| b.commit_position == 120).unwrap().clone();
        let upper = index.builds().find(|b| b.commit_position == 200).unwrap().clone();
        let state = state(&index, vec![stable(120), flaky(200)])
            .with_suspected_build_range(BuildBounds {
                lower: Some(lower),
                upper,
            });
        let suspect = |_: &AnalysisState| Some(commit(120));
        assert_eq!(
            run_round(&index, &suspect, &state, &RoundInput::default()),
            Err(LookbackError::HeuristicRepeat(120))
        );
    }

    #[test]
    fn round_limit() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 10, true);
        let config = LookbackConfig {
            max_rounds: 2,
            ..LookbackConfig::default()
        };
        let pipeline =
            NextCommitPositionPipeline::new(config, &index, &index, &no_heuristic, &index).unwrap();
        let state = state(&index, vec![flaky(1000), flaky(999)]);
        let output = pipeline.run(&state, &RoundInput::default()).unwrap();
        assert_eq!(
            output.decision,
            SearchDecision::Inconclusive(InconclusiveReason::RoundLimitReached)
        );
    }

    #[test]
    fn invalid_config_rejected() {
        let index = InMemoryBuildIndex::default();
        let config = LookbackConfig {
            max_rounds: 0,
            ..LookbackConfig::default()
        };
        assert!(matches!(
            NextCommitPositionPipeline::new(config, &index, &index, &no_heuristic, &index),
            Err(LookbackError::InvalidConfig(_))
        ));
    }

    #[test]
    fn not_reproducible() {
        let index = InMemoryBuildIndex::synthetic(1, 1000, 10, true);
        let state = state(&index, vec![stable(1000)]);
        let output = run_round(&index, &no_heuristic, &state, &RoundInput::default()).unwrap();
        assert_eq!(
            output.decision,
            SearchDecision::Inconclusive(InconclusiveReason::NotReproducible)
        );
    }
}
