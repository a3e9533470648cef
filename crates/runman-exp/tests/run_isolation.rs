//! Failure containment with a scripted pipeline that errors or panics on demand.

use std::fs;

use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::field::{FieldRegistry, Parameterised};
use runman_core::{field_registry, Detection, Pipeline, StepOutput, Track, TrackState};
use runman_exp::{run_sweep, BaseConfiguration, ParameterSpec, RunOpts, RunState, Sweep};
use runman_track::{GroundTruthSimulator, MetricManager};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScriptedPipeline {
    steps: u32,
    /// Step at which `advance` returns an error; 0 never fails.
    #[serde(default)]
    fail_at: u32,
    /// Step at which `advance` panics; 0 never panics.
    #[serde(default)]
    panic_at: u32,
    #[serde(skip)]
    cursor: u32,
}

impl Parameterised for ScriptedPipeline {
    fn field_registry() -> FieldRegistry<Self> {
        field_registry! {
            "steps" => steps,
            "fail_at" => fail_at,
            "panic_at" => panic_at,
        }
    }
}

impl Pipeline for ScriptedPipeline {
    const ROOT_ALIAS: &'static str = "scripted";

    type GroundTruth = GroundTruthSimulator;

    fn advance(&mut self) -> Result<Option<StepOutput>, RunmanError> {
        if self.cursor >= self.steps {
            return Ok(None);
        }
        self.cursor += 1;
        if self.cursor == self.fail_at {
            return Err(RunmanError::RunExecution(ErrorInfo::new(
                "scripted-failure",
                "step failed on purpose",
            )));
        }
        if self.cursor == self.panic_at {
            panic!("scripted panic at step {}", self.cursor);
        }
        let timestamp = f64::from(self.cursor);
        Ok(Some(StepOutput {
            timestamp,
            tracks: vec![Track {
                id: 0,
                states: (1..=self.cursor)
                    .map(|step| TrackState {
                        timestamp: f64::from(step),
                        mean: [f64::from(step), 1.0, 0.0, 0.0],
                        covar_trace: 1.0,
                    })
                    .collect(),
            }],
        }))
    }

    fn detections(&self) -> &[Detection] {
        &[]
    }

    fn embedded_groundtruth(&self) -> Option<&GroundTruthSimulator> {
        None
    }
}

type Base = BaseConfiguration<ScriptedPipeline, MetricManager>;

fn sweep(parameters: &str) -> Sweep {
    let spec = ParameterSpec::from_json_slice(parameters.as_bytes()).expect("spec");
    Sweep::new(&spec).expect("sweep")
}

fn opts() -> RunOpts {
    RunOpts {
        workers: 3,
        ..RunOpts::default()
    }
}

#[test]
fn mid_run_error_keeps_streamed_tracks_and_spares_other_runs() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let base = Base::from_yaml_str("- steps: 5\n- generators: [{type: basic}]\n").expect("base");
    let report = run_sweep(
        &base,
        &sweep(r#"{"parameters":[{"path":"scripted.fail_at","values":[0,4]}]}"#),
        temp.path(),
        &opts(),
    )
    .expect("sweep");

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    let healthy = report.run(0, 0).expect("healthy");
    assert_eq!(healthy.state, RunState::Succeeded);
    assert!(!healthy.metrics.is_empty());

    let broken = report.run(1, 0).expect("broken");
    assert_eq!(broken.state, RunState::Failed);
    assert_eq!(
        broken.error.as_ref().map(|err| err.info().code.as_str()),
        Some("scripted-failure")
    );
    let dir = report.root.join(&broken.dir);
    let tracks = fs::read_to_string(dir.join("tracks.csv")).expect("tracks");
    assert_eq!(tracks.lines().count(), 4);
    assert!(!dir.join("metrics.csv").exists());
    assert!(dir.join("error.json").exists());
}

#[test]
fn panicking_run_is_contained() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let base = Base::from_yaml_str("- steps: 3\n").expect("base");
    let report = run_sweep(
        &base,
        &sweep(r#"{"parameters":[{"path":"scripted.panic_at","values":[0,2,0]}],"runs_num":2}"#),
        temp.path(),
        &opts(),
    )
    .expect("sweep");

    assert_eq!(report.total_runs, 6);
    assert_eq!(report.succeeded, 4);
    for repetition in 0..2 {
        let run = report.run(1, repetition).expect("panicked run");
        let err = run.error.as_ref().expect("error");
        assert_eq!(err.family(), "run-execution");
        assert_eq!(err.info().code, "run-panic");
        assert!(err.info().message.contains("scripted panic"));
    }
    assert!(report.run(2, 1).expect("last").succeeded());
}

#[test]
fn wrong_value_type_fails_only_that_run() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let base = Base::from_yaml_str("- steps: 2\n").expect("base");
    let report = run_sweep(
        &base,
        &sweep(r#"{"parameters":[{"path":"scripted.steps","values":[1,"two"]}]}"#),
        temp.path(),
        &opts(),
    )
    .expect("sweep");
    assert!(report.run(0, 0).expect("first").succeeded());
    let err = report
        .run(1, 0)
        .and_then(|run| run.error.as_ref())
        .expect("error");
    assert_eq!(err.info().code, "parameter-value");
}
