use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::{
    Detection, FieldRegistry, GroundTruthPath, GroundTruthSource, Metric, MetricEngine, Pipeline,
    SweepProvenance, Track,
};
use serde::{Deserialize, Serialize};

use crate::config::BaseConfiguration;
use crate::hash::stable_hash_string;
use crate::manifest::{allocate_sweep_root, RunIndex, SweepManifest};
use crate::mutate::{materialize, validate_paths, RunConfiguration};
use crate::params::{ParameterCombination, Sweep};
use crate::persist::{RunPersister, RunState, RunStatus};
use crate::serde::to_canonical_json_bytes;

/// Options governing sweep execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOpts {
    /// Worker threads; 0 uses the available hardware parallelism.
    pub workers: usize,
    /// Treat unresolved parameter paths as fatal.
    pub strict_paths: bool,
    /// Prefix of the timestamped sweep root directory.
    pub dir_prefix: String,
    /// Ground-truth setting forwarded from the command line. Recorded only.
    pub groundtruth_setting: Option<u64>,
}

impl Default for RunOpts {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1),
            strict_paths: false,
            dir_prefix: "metrics".to_string(),
            groundtruth_setting: None,
        }
    }
}

/// Outcome of one run as recorded in the sweep report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub index: RunIndex,
    /// Run directory relative to the sweep root.
    pub dir: String,
    pub parameters: serde_json::Value,
    pub state: RunState,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunmanError>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    /// Write failures logged while persisting the run.
    #[serde(default)]
    pub persistence_failures: Vec<RunmanError>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }
}

/// Aggregate result of a sweep, written to `sweep_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub root: PathBuf,
    pub provenance: SweepProvenance,
    pub total_runs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_secs: f64,
    /// Per-run summaries ordered by run ordinal.
    pub runs: Vec<RunSummary>,
}

impl SweepReport {
    pub fn run(&self, simulation: usize, repetition: u64) -> Option<&RunSummary> {
        self.runs.iter().find(|run| {
            run.index.simulation == simulation && run.index.repetition == repetition
        })
    }
}

struct SweepContext<'a, P: Pipeline, M> {
    base: &'a BaseConfiguration<P, M>,
    sweep: &'a Sweep,
    registry: &'a FieldRegistry<P>,
    invalid: &'a BTreeSet<String>,
    root: &'a Path,
}

#[derive(Default)]
struct RunData {
    ground_truth: Vec<GroundTruthPath>,
    detections: Vec<Detection>,
    tracks: BTreeMap<u64, Track>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "run panicked".to_string()
    }
}

fn sweep_provenance<P: Pipeline, M: MetricEngine>(
    base: &BaseConfiguration<P, M>,
    sweep: &Sweep,
    created_at: String,
) -> Result<SweepProvenance, RunmanError> {
    let config = (&base.pipeline, &base.ground_truth, &base.metric_engine);
    let mut tool_versions = BTreeMap::new();
    tool_versions.insert(
        "runman-exp".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    Ok(SweepProvenance {
        config_hash: stable_hash_string(&config)?,
        parameters_hash: stable_hash_string(sweep.spec())?,
        created_at,
        tool_versions,
        ..SweepProvenance::default()
    })
}

/// Executes every run of `sweep` against `base`, writing results below `out`.
///
/// Configuration problems abort before anything runs. Once dispatch starts
/// the call always returns a report: failed runs are recorded, not raised.
pub fn run_sweep<P, M>(
    base: &BaseConfiguration<P, M>,
    sweep: &Sweep,
    out: &Path,
    opts: &RunOpts,
) -> Result<SweepReport, RunmanError>
where
    P: Pipeline,
    M: MetricEngine,
{
    let registry = P::field_registry();
    let issues = validate_paths(sweep, &registry);
    if let Some(first) = issues.first() {
        if opts.strict_paths {
            return Err(RunmanError::Configuration(
                ErrorInfo::new("parameter-path", first.reason.clone())
                    .with_context("path", first.path.clone())
                    .with_context("stage", "parameters")
                    .with_hint("drop --strict-paths to record the affected runs as failed"),
            ));
        }
        for issue in &issues {
            warn!(
                "parameter path {} does not resolve ({}); runs using it will fail",
                issue.path, issue.reason
            );
        }
    }
    if let Some(setting) = opts.groundtruth_setting {
        debug!("groundtruth setting {setting} accepted");
    }

    let started = Local::now();
    let root = allocate_sweep_root(out, &opts.dir_prefix, &started)?;
    let provenance = sweep_provenance(base, sweep, started.to_rfc3339())?;
    let invalid: BTreeSet<String> = issues.iter().map(|issue| issue.path.clone()).collect();
    let manifest = SweepManifest::new(sweep, provenance.clone(), issues);
    if let Err(err) = manifest.write(&root) {
        error!("could not write sweep manifest: {err}");
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.workers)
        .build()
        .map_err(|err| {
            RunmanError::Configuration(
                ErrorInfo::new("thread-pool", err.to_string())
                    .with_context("workers", opts.workers.to_string()),
            )
        })?;
    info!(
        "dispatching {} run(s) over {} worker(s) into {}",
        sweep.total_runs(),
        pool.current_num_threads(),
        root.display()
    );

    let context = SweepContext {
        base,
        sweep,
        registry: &registry,
        invalid: &invalid,
        root: &root,
    };
    let clock = Instant::now();
    let mut runs: Vec<RunSummary> = pool.install(|| {
        (0..sweep.total_runs())
            .into_par_iter()
            .map(|ordinal| execute_run(&context, ordinal))
            .collect()
    });
    runs.sort_by_key(|run| run.index.ordinal);
    let duration_secs = clock.elapsed().as_secs_f64();

    let succeeded = runs.iter().filter(|run| run.succeeded()).count();
    info!(
        "{succeeded}/{} simulations completed successfully in {duration_secs:.3}s",
        runs.len()
    );
    let report = SweepReport {
        root: root.clone(),
        provenance,
        total_runs: runs.len(),
        succeeded,
        failed: runs.len() - succeeded,
        duration_secs,
        runs,
    };
    let report_path = root.join("sweep_report.json");
    let written = to_canonical_json_bytes(&report)
        .and_then(|bytes| {
            fs::write(&report_path, bytes).map_err(|err| {
                RunmanError::Persistence(ErrorInfo::new("report-write", err.to_string()))
            })
        });
    if let Err(err) = written {
        error!("could not write sweep report: {err}");
    }
    Ok(report)
}

fn execute_run<P: Pipeline, M: MetricEngine>(
    context: &SweepContext<'_, P, M>,
    ordinal: usize,
) -> RunSummary {
    let index = RunIndex::from_ordinal(ordinal, context.sweep.runs_num());
    let started = Local::now();
    let clock = Instant::now();
    let mut persister = RunPersister::create(context.root, &index);
    let mut data = RunData::default();

    let combination = context.sweep.combination(index.simulation);
    let outcome = match &combination {
        None => Err(RunmanError::RunExecution(
            ErrorInfo::new("run-index", "run index outside the sweep")
                .with_context("ordinal", ordinal.to_string()),
        )),
        Some(combination) => {
            persister.write_parameters(combination);
            match combination
                .assignments
                .iter()
                .find(|assignment| context.invalid.contains(&assignment.path))
            {
                Some(assignment) => Err(RunmanError::ParameterPath(
                    ErrorInfo::new("parameter-path", "parameter path does not resolve")
                        .with_context("path", assignment.path.clone())
                        .with_context("combination", combination.index.to_string()),
                )),
                None => panic::catch_unwind(AssertUnwindSafe(|| {
                    drive(context, combination, index, &mut persister, &mut data)
                }))
                .unwrap_or_else(|payload| {
                    Err(RunmanError::RunExecution(
                        ErrorInfo::new("run-panic", panic_message(payload.as_ref()))
                            .with_context("ordinal", ordinal.to_string()),
                    ))
                }),
            }
        }
    };
    persister.write_groundtruth(&data.ground_truth);
    persister.write_detections(&data.detections);
    let metrics = match &outcome {
        Ok(Some(generated)) => {
            persister.write_metrics(generated);
            generated.clone()
        }
        _ => Vec::new(),
    };

    let duration_secs = clock.elapsed().as_secs_f64();
    let started_at = started.to_rfc3339();
    let dir = index.relative_dir().display().to_string();
    let total = context.sweep.total_runs();
    let status = match outcome {
        Ok(_) => {
            info!(
                "{}: simulation {}/{} ran successfully in {:.3}s. parameters located {}",
                started.format("%d/%m/%Y %H:%M:%S"),
                ordinal + 1,
                total,
                duration_secs,
                persister.dir().display()
            );
            RunStatus::succeeded(index, started_at, duration_secs)
        }
        Err(err) => {
            warn!(
                "{}: simulation {}/{} failed after {:.3}s: {}. parameters located {}",
                started.format("%d/%m/%Y %H:%M:%S"),
                ordinal + 1,
                total,
                duration_secs,
                err,
                persister.dir().display()
            );
            RunStatus::failed(index, started_at, duration_secs, err)
        }
    };
    persister.write_status(&status);
    let persistence_failures = persister.finish();

    RunSummary {
        index,
        dir,
        parameters: combination
            .map(|combination| combination.to_object())
            .unwrap_or(serde_json::Value::Null),
        state: status.state,
        duration_secs,
        error: status.error,
        metrics,
        persistence_failures,
    }
}

/// Runs one configuration to exhaustion. Returns the metrics when a metric
/// engine is configured.
fn drive<P: Pipeline, M: MetricEngine>(
    context: &SweepContext<'_, P, M>,
    combination: &ParameterCombination,
    index: RunIndex,
    persister: &mut RunPersister,
    data: &mut RunData,
) -> Result<Option<Vec<Metric>>, RunmanError> {
    let mut run: RunConfiguration<P, M> =
        materialize(context.base, combination, context.registry)?;
    run.reseed(index.repetition);
    persister.write_config(run.snapshot());

    let stepped = step_all(&mut run, persister, data);
    if let Some(ground_truth) = &run.ground_truth {
        data.ground_truth = ground_truth.paths().to_vec();
    }
    stepped?;

    let Some(engine) = &run.metric_engine else {
        return Ok(None);
    };
    let tracks: Vec<Track> = data.tracks.values().cloned().collect();
    engine
        .generate(&data.ground_truth, &data.detections, &tracks)
        .map(Some)
        .map_err(RunmanError::into_run_execution)
}

fn step_all<P: Pipeline, M: MetricEngine>(
    run: &mut RunConfiguration<P, M>,
    persister: &mut RunPersister,
    data: &mut RunData,
) -> Result<(), RunmanError> {
    while let Some(step) = run
        .pipeline
        .advance()
        .map_err(RunmanError::into_run_execution)?
    {
        if let Some(ground_truth) = run.ground_truth.as_mut() {
            ground_truth
                .advance_to(step.timestamp)
                .map_err(RunmanError::into_run_execution)?;
        }
        data.detections
            .extend(run.pipeline.detections().iter().cloned());
        persister.append_tracks(step.timestamp, &step.tracks);
        for track in step.tracks {
            data.tracks.insert(track.id, track);
        }
    }
    Ok(())
}
