use std::path::{Path, PathBuf};

use log::info;
use runman_core::errors::RunmanError;
use runman_core::{MetricEngine, Pipeline};
use serde::{Deserialize, Serialize};

use crate::config::{load_config, BaseConfiguration};
use crate::dispatch::{run_sweep, RunOpts, SweepReport};
use crate::mutate::{validate_paths, PathIssue};
use crate::params::{ParameterSpec, Sweep};

/// Input files and options of one sweep invocation.
#[derive(Debug, Clone)]
pub struct SweepRequest {
    pub config: PathBuf,
    pub parameters: PathBuf,
    pub out: PathBuf,
    pub opts: RunOpts,
}

/// Result of checking a configuration and parameter document pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub combinations: usize,
    pub runs_num: u64,
    pub total_runs: usize,
    pub invalid_paths: Vec<PathIssue>,
}

fn prepare<P: Pipeline, M: MetricEngine>(
    config: &Path,
    parameters: &Path,
) -> Result<(BaseConfiguration<P, M>, Sweep), RunmanError> {
    let mut base = load_config::<P, M, _>(config)?;
    if !base.resolve_ground_truth() {
        info!("no ground truth available, runs will record an empty set");
    }
    let spec = ParameterSpec::load(parameters)?;
    let sweep = Sweep::new(&spec)?;
    Ok((base, sweep))
}

/// Loads both documents, expands the sweep and checks every path.
pub fn validate<P: Pipeline, M: MetricEngine>(
    config: &Path,
    parameters: &Path,
) -> Result<ValidationReport, RunmanError> {
    let (_, sweep) = prepare::<P, M>(config, parameters)?;
    let invalid_paths = validate_paths(&sweep, &P::field_registry());
    Ok(ValidationReport {
        combinations: sweep.len(),
        runs_num: sweep.runs_num(),
        total_runs: sweep.total_runs(),
        invalid_paths,
    })
}

/// Loads both documents and executes the whole sweep.
pub fn run<P: Pipeline, M: MetricEngine>(request: &SweepRequest) -> Result<SweepReport, RunmanError> {
    let (base, sweep) = prepare::<P, M>(&request.config, &request.parameters)?;
    info!(
        "sweep of {} combination(s) x {} repetition(s) = {} run(s)",
        sweep.len(),
        sweep.runs_num(),
        sweep.total_runs()
    );
    run_sweep(&base, &sweep, &request.out, &request.opts)
}
