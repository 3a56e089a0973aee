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

use clap::App;
use clap::Arg;
use clap::ArgMatches;
use clap::SubCommand;
use flake_lookback::AnalysisState;
use flake_lookback::BuildInfo;
use flake_lookback::BuilderRef;
use flake_lookback::CommitID;
use flake_lookback::CommitIDRange;
use flake_lookback::DataPoint;
use flake_lookback::InMemoryBuildIndex;
use flake_lookback::LookbackConfig;
use flake_lookback::NextCommitPositionPipeline;
use flake_lookback::ReferenceBuild;
use flake_lookback::RoundInput;
use flake_lookback::StepMetadata;
use flake_lookback::synthetic_revision;
use log::info;
use log::trace;
use serde::Deserialize;
use serde::Serialize;
use simplelog::Config;
use simplelog::LevelFilter;
use simplelog::TermLogger;
use simplelog::TerminalMode;
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::time::Instant;

/// A recorded analysis together with the build history needed to run the next round.
#[derive(Debug, Serialize, Deserialize)]
struct AnalysisFile {
    state: AnalysisState,
    #[serde(default)]
    requested_range: CommitIDRange,
    #[serde(default)]
    step_metadata: StepMetadata,
    #[serde(default)]
    indexed: bool,
    builds: Vec<BuildInfo>,
    #[serde(default)]
    revisions: BTreeMap<i64, String>,
    #[serde(default)]
    heuristic_suspect: Option<CommitID>,
}

impl AnalysisFile {
    fn build_index(&self) -> InMemoryBuildIndex {
        let mut index = InMemoryBuildIndex::new(self.indexed);
        for build in &self.builds {
            index.add_build(build.clone());
        }
        for (commit_position, revision) in &self.revisions {
            index.add_revision(*commit_position, revision.as_str());
        }
        index
    }
}

fn load_config(path: Option<&str>) -> Result<LookbackConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => {
            info!("Loading config from {}", path);
            toml::from_str::<LookbackConfig>(&fs::read_to_string(path)?)?
        }
        None => LookbackConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn parse_arg<T>(matches: &ArgMatches, name: &str) -> Result<T, Box<dyn Error>>
where
    T: std::str::FromStr,
    T::Err: Error + 'static,
{
    let value = matches
        .value_of(name)
        .ok_or_else(|| format!("missing argument {}", name))?;
    Ok(value.parse::<T>()?)
}

fn run_next(config: LookbackConfig, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let path = matches
        .value_of("analysis")
        .ok_or("missing analysis file")?;
    let mut file: AnalysisFile = serde_json::from_str(&fs::read_to_string(path)?)?;
    let index = file.build_index();
    let suspect = file.heuristic_suspect.clone();
    let heuristic = move |_: &AnalysisState| -> Option<CommitID> { suspect.clone() };
    let pipeline = NextCommitPositionPipeline::new(config, &index, &index, &heuristic, &index)?;
    let input = RoundInput {
        commit_position_range: file.requested_range.positions(),
        step_metadata: file.step_metadata.clone(),
    };
    let output = pipeline.run(&file.state, &input)?;
    println!("{}", serde_json::to_string_pretty(&output.decision)?);
    if matches.is_present("write") {
        file.state = output.state;
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        info!("Updated {}", path);
    }
    Ok(())
}

fn run_simulation(config: LookbackConfig, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let latest = parse_arg::<i64>(matches, "latest")?;
    let culprit = parse_arg::<i64>(matches, "culprit")?;
    let build_interval = parse_arg::<i64>(matches, "build-interval")?;
    let flaky_pass_rate = parse_arg::<f64>(matches, "flaky-pass-rate")?;
    let suspect = match matches.value_of("heuristic-suspect") {
        Some(s) => {
            let commit_position = s.parse::<i64>()?;
            Some(CommitID::new(
                commit_position,
                synthetic_revision(commit_position),
            ))
        }
        None => None,
    };
    let index =
        InMemoryBuildIndex::synthetic(1, latest, build_interval, !matches.is_present("unindexed"));
    let heuristic = move |_: &AnalysisState| -> Option<CommitID> { suspect.clone() };
    let pipeline = NextCommitPositionPipeline::new(config, &index, &index, &heuristic, &index)?;
    let pass_rate = |commit_position: i64| {
        if commit_position >= culprit {
            flaky_pass_rate
        } else {
            1.0
        }
    };

    let reference = ReferenceBuild {
        builder: BuilderRef::new("simulated", "simulated"),
        step_name: "simulated_tests".to_string(),
        build_number: index.latest_build().map_or(0, |b| b.build_number),
    };
    let mut state = AnalysisState::new(reference).with_data_point(DataPoint::new(
        latest,
        synthetic_revision(latest),
        pass_rate(latest),
    ))?;
    let mut rounds = 0;
    loop {
        rounds += 1;
        let output = pipeline.run(&state, &RoundInput::default())?;
        trace!("Regression range {}", output.state.regression_range(pipeline.config()));
        let next = match output.decision.next_commit_id() {
            Some(next) => next.clone(),
            None => {
                println!(
                    "Analysis finished after {} rounds: {}",
                    rounds, output.decision
                );
                return Ok(());
            }
        };
        let rate = pass_rate(next.commit_position);
        println!("Reporting {} with pass rate {}", next.commit_position, rate);
        state = output
            .state
            .with_data_point(DataPoint::new(next.commit_position, next.revision, rate))?;
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let matches = App::new("flake-lookback")
        .version("1.0")
        .author("Adam Crume <acrume@google.com>")
        .about("Finds the commit which introduced a flaky test, one round at a time.")
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("More verbose output")
                .multiple(true)
                .global(true),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .global(true)
                .help("TOML file overriding the default thresholds and limits"),
        )
        .subcommand(
            SubCommand::with_name("next")
                .about("Runs one round of a recorded analysis and prints the decision as JSON")
                .arg(
                    Arg::with_name("write")
                        .long("write")
                        .help("Stores the updated analysis state back into the file"),
                )
                .arg(
                    Arg::with_name("analysis")
                        .help("JSON file holding the analysis and its builds")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("simulate")
                .about("Runs a whole analysis against a synthetic history")
                .arg(
                    Arg::with_name("latest")
                        .long("latest")
                        .help("Commit position where the flake was detected")
                        .default_value("5000"),
                )
                .arg(
                    Arg::with_name("culprit")
                        .long("culprit")
                        .help("Commit position which introduced the flake")
                        .takes_value(true)
                        .required(true),
                )
                .arg(
                    Arg::with_name("build-interval")
                        .long("build-interval")
                        .help("Number of commits per build")
                        .default_value("10"),
                )
                .arg(
                    Arg::with_name("flaky-pass-rate")
                        .long("flaky-pass-rate")
                        .help("Pass rate at and after the culprit")
                        .default_value("0.7"),
                )
                .arg(
                    Arg::with_name("heuristic-suspect")
                        .long("heuristic-suspect")
                        .help("Commit position reported by heuristic analysis")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("unindexed")
                        .long("unindexed")
                        .help("Only allow the legacy build lookup"),
                ),
        )
        .get_matches();
    let level_filter = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(level_filter, Config::default(), TerminalMode::Mixed)?;
    let config = load_config(matches.value_of("config"))?;
    match matches.subcommand() {
        ("next", Some(sub)) => run_next(config, sub)?,
        ("simulate", Some(sub)) => run_simulation(config, sub)?,
        _ => return Err(matches.usage().into()),
    }
    info!("Elapsed time: {} seconds", start.elapsed().as_secs_f64());
    Ok(())
}
