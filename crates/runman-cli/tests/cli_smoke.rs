use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::Value;

const CONFIG: &str = r#"
- detector:
    seed: 5
    groundtruth: &truth
      seed: 3
      number_steps: 4
- *truth
- generators:
    - type: basic
"#;

fn write_inputs(dir: &Path, parameters: &str) {
    fs::write(dir.join("config.yaml"), CONFIG).expect("config");
    fs::write(dir.join("parameters.json"), parameters).expect("parameters");
}

fn runman(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_runman"));
    command
        .current_dir(dir)
        .env_remove("RUNMAN_CONFIG")
        .env_remove("RUNMAN_PARAMETERS")
        .env_remove("RUNMAN_OUT")
        .env_remove("RUNMAN_WORKERS")
        .env_remove("RUNMAN_LOG");
    command
}

#[test]
fn validate_prints_run_counts() {
    let temp = tempfile::tempdir().expect("tmp dir");
    write_inputs(
        temp.path(),
        r#"{"parameters":[{"path":"tracker.initiator.min_points","values":[2,3]}],"runs_num":2}"#,
    );
    let output = runman(temp.path())
        .args(["validate", "--config", "config.yaml", "--parameters", "parameters.json"])
        .output()
        .expect("run validate");
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["combinations"], 2);
    assert_eq!(report["total_runs"], 4);
}

#[test]
fn run_writes_results_and_log_lines() {
    let temp = tempfile::tempdir().expect("tmp dir");
    write_inputs(
        temp.path(),
        r#"{"parameters":[{"path":"tracker.nope.value","values":[1]}]}"#,
    );
    let output = runman(temp.path())
        .args(["run", "--parameters", "parameters.json", "--out", "results"])
        .env("RUNMAN_CONFIG", "config.yaml")
        .env("RUNMAN_WORKERS", "1")
        .output()
        .expect("run sweep");
    assert!(output.status.success(), "run failures are not fatal");
    let log = fs::read_to_string(temp.path().join("simulation.log")).expect("log");
    assert!(log.contains("simulation 1/1 failed"));
    assert!(log.contains("0/1 simulations completed successfully"));
    let roots: Vec<_> = fs::read_dir(temp.path().join("results"))
        .expect("results")
        .collect();
    assert_eq!(roots.len(), 1);
}

#[test]
fn malformed_configuration_exits_non_zero() {
    let temp = tempfile::tempdir().expect("tmp dir");
    write_inputs(temp.path(), r#"{"parameters":[]}"#);
    fs::write(temp.path().join("config.yaml"), "[]").expect("config");
    let output = runman(temp.path())
        .args(["run", "--config", "config.yaml", "--parameters", "parameters.json"])
        .output()
        .expect("run sweep");
    assert!(!output.status.success());
}
