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

//! Finds the commit which introduced a flaky test.
//!
//! The caller reruns the test at commits chosen by `NextCommitPositionPipeline`, one round at a
//! time. Each round looks at the data points gathered so far and either names the next commit to
//! test, names the culprit, or gives up. The search backs off exponentially from the failing end
//! until it finds a commit where the test is stable, then bisects, rounding to real builds while
//! the range spans several builds and consulting heuristic analysis once it fits in one.
//!
//! ```
//! use flake_lookback::*;
//!
//! let history = InMemoryBuildIndex::synthetic(1, 1000, 10, true);
//! let no_heuristic = |_: &AnalysisState| -> Option<CommitID> { None };
//! let pipeline = NextCommitPositionPipeline::new(
//!     LookbackConfig::default(),
//!     &history,
//!     &history,
//!     &no_heuristic,
//!     &history,
//! )
//! .unwrap();
//! let state = AnalysisState::new(ReferenceBuild::default())
//!     .with_data_point(DataPoint::new(1000, synthetic_revision(1000), 0.6))
//!     .unwrap();
//! let output = pipeline.run(&state, &RoundInput::default()).unwrap();
//! assert_eq!(output.decision.next_commit_id().unwrap().commit_position, 999);
//! ```

mod analysis;
pub use analysis::*;
mod boundary;
pub use boundary::*;
mod config;
pub use config::*;
mod cutoff;
pub use cutoff::*;
mod data_point;
pub use data_point::*;
mod decision;
pub use decision::*;
mod error;
pub use error::*;
mod heuristic;
pub use heuristic::*;
mod lookback;
pub use lookback::*;
mod memory;
pub use memory::*;
mod pipeline;
pub use pipeline::*;
