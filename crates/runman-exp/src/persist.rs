//! Per-run result files.
//!
//! Every write goes through [`RunPersister`], which logs and collects
//! failures instead of returning them: a run that fails to persist keeps
//! the outcome it actually had.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::error;
use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::{Detection, GroundTruthPath, Metric, MetricScope, Timestamp, Track};
use serde::{Deserialize, Serialize};

use crate::manifest::RunIndex;
use crate::params::ParameterCombination;
use crate::serde::to_canonical_json_bytes;

/// Final state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Succeeded,
    Failed,
}

/// Status record written to `status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub index: RunIndex,
    pub state: RunState,
    /// Wall-clock start of the run, RFC 3339.
    pub started_at: String,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunmanError>,
}

impl RunStatus {
    pub fn succeeded(index: RunIndex, started_at: String, duration_secs: f64) -> Self {
        Self {
            index,
            state: RunState::Succeeded,
            started_at,
            duration_secs,
            error: None,
        }
    }

    pub fn failed(
        index: RunIndex,
        started_at: String,
        duration_secs: f64,
        error: RunmanError,
    ) -> Self {
        Self {
            index,
            state: RunState::Failed,
            started_at,
            duration_secs,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
struct ParameterRow<'a> {
    path: &'a str,
    value: String,
}

#[derive(Debug, Serialize)]
struct TrackRow {
    track_id: u64,
    timestamp: Timestamp,
    x: f64,
    vx: f64,
    y: f64,
    vy: f64,
    covar_trace: f64,
}

#[derive(Debug, Serialize)]
struct GroundTruthRow {
    path_id: u64,
    timestamp: Timestamp,
    x: f64,
    vx: f64,
    y: f64,
    vy: f64,
}

#[derive(Debug, Serialize)]
struct DetectionRow {
    timestamp: Timestamp,
    x: f64,
    y: f64,
    truth_id: Option<u64>,
}

#[derive(Debug, Serialize)]
struct MetricRow<'a> {
    generator: &'a str,
    title: &'a str,
    value: f64,
    start: Timestamp,
    end: Timestamp,
}

impl<'a> From<&'a Metric> for MetricRow<'a> {
    fn from(metric: &'a Metric) -> Self {
        let (start, end) = match metric.scope {
            MetricScope::SingleTime { timestamp } => (timestamp, timestamp),
            MetricScope::TimeRange { start, end } => (start, end),
        };
        Self {
            generator: &metric.generator,
            title: &metric.title,
            value: metric.value,
            start,
            end,
        }
    }
}

fn csv_error(code: &str, err: impl ToString, path: &Path) -> RunmanError {
    RunmanError::Persistence(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

fn write_csv<R: Serialize>(
    path: &Path,
    rows: impl IntoIterator<Item = R>,
) -> Result<(), RunmanError> {
    let mut writer = csv::Writer::from_path(path).map_err(|err| csv_error("csv-open", err, path))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| csv_error("csv-write", err, path))?;
    }
    writer.flush().map_err(|err| csv_error("csv-flush", err, path))
}

/// Writes the result files of one run directory.
pub struct RunPersister {
    dir: PathBuf,
    tracks: Option<csv::Writer<File>>,
    failures: Vec<RunmanError>,
}

impl RunPersister {
    /// Creates the run directory below `root`.
    pub fn create(root: &Path, index: &RunIndex) -> Self {
        let dir = root.join(index.relative_dir());
        let mut persister = Self {
            dir,
            tracks: None,
            failures: Vec::new(),
        };
        if let Err(err) = fs::create_dir_all(&persister.dir) {
            let failure = csv_error("run-dir", err, &persister.dir);
            persister.record(failure);
        }
        persister
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persistence failures recorded so far.
    pub fn failures(&self) -> &[RunmanError] {
        &self.failures
    }

    fn record(&mut self, err: RunmanError) {
        error!("persistence failure in {}: {err}", self.dir.display());
        self.failures.push(err);
    }

    fn guard(&mut self, result: Result<(), RunmanError>) {
        if let Err(err) = result {
            let err = match err {
                RunmanError::Persistence(info) => RunmanError::Persistence(info),
                other => RunmanError::Persistence(other.info().clone()),
            };
            self.record(err);
        }
    }

    pub fn write_parameters(&mut self, combination: &ParameterCombination) {
        let path = self.dir.join("parameters.csv");
        let rows = combination.assignments.iter().map(|assignment| ParameterRow {
            path: &assignment.path,
            value: assignment.value.to_string(),
        });
        let result = write_csv(&path, rows);
        self.guard(result);
    }

    /// Writes the effective configuration snapshot.
    pub fn write_config(&mut self, snapshot: Result<serde_yaml::Value, RunmanError>) {
        let path = self.dir.join("config.yaml");
        let result = snapshot.and_then(|value| {
            let text = crate::serde::to_yaml_string(&value)?;
            fs::write(&path, text).map_err(|err| csv_error("config-write", err, &path))
        });
        self.guard(result);
    }

    /// Appends the latest state of every active track and flushes.
    pub fn append_tracks(&mut self, timestamp: Timestamp, tracks: &[Track]) {
        let path = self.dir.join("tracks.csv");
        if self.tracks.is_none() {
            match csv::Writer::from_path(&path) {
                Ok(writer) => self.tracks = Some(writer),
                Err(err) => {
                    self.record(csv_error("csv-open", err, &path));
                    return;
                }
            }
        }
        let Some(writer) = self.tracks.as_mut() else {
            return;
        };
        let mut result = Ok(());
        for track in tracks {
            let Some(state) = track.state_at(timestamp).or_else(|| track.last_state()) else {
                continue;
            };
            let row = TrackRow {
                track_id: track.id,
                timestamp: state.timestamp,
                x: state.mean[0],
                vx: state.mean[1],
                y: state.mean[2],
                vy: state.mean[3],
                covar_trace: state.covar_trace,
            };
            if let Err(err) = writer.serialize(row) {
                result = Err(csv_error("csv-write", err, &path));
                break;
            }
        }
        if result.is_ok() {
            result = writer
                .flush()
                .map_err(|err| csv_error("csv-flush", err, &path));
        }
        self.guard(result);
    }

    pub fn write_groundtruth(&mut self, paths: &[GroundTruthPath]) {
        let path = self.dir.join("groundtruth.csv");
        let rows = paths.iter().flat_map(|truth| {
            truth.states.iter().map(move |state| GroundTruthRow {
                path_id: truth.id,
                timestamp: state.timestamp,
                x: state.state[0],
                vx: state.state[1],
                y: state.state[2],
                vy: state.state[3],
            })
        });
        let result = write_csv(&path, rows);
        self.guard(result);
    }

    pub fn write_detections(&mut self, detections: &[Detection]) {
        let path = self.dir.join("detections.csv");
        let rows = detections.iter().map(|detection| DetectionRow {
            timestamp: detection.timestamp,
            x: detection.measurement[0],
            y: detection.measurement[1],
            truth_id: detection.truth_id,
        });
        let result = write_csv(&path, rows);
        self.guard(result);
    }

    pub fn write_metrics(&mut self, metrics: &[Metric]) {
        let path = self.dir.join("metrics.csv");
        let result = write_csv(&path, metrics.iter().map(MetricRow::from));
        self.guard(result);
    }

    fn write_json<T: Serialize>(&mut self, name: &str, value: &T) {
        let path = self.dir.join(name);
        let result = to_canonical_json_bytes(value).and_then(|bytes| {
            fs::write(&path, bytes).map_err(|err| csv_error("json-write", err, &path))
        });
        self.guard(result);
    }

    /// Writes `status.json`, plus `error.json` for a failed run.
    pub fn write_status(&mut self, status: &RunStatus) {
        if let Some(err) = &status.error {
            self.write_json("error.json", err);
        }
        self.write_json("status.json", status);
    }

    /// Flushes the track stream and returns every recorded failure.
    pub fn finish(mut self) -> Vec<RunmanError> {
        if let Some(mut writer) = self.tracks.take() {
            let path = self.dir.join("tracks.csv");
            if let Err(err) = writer.flush() {
                self.record(csv_error("csv-flush", err, &path));
            }
        }
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runman_core::TrackState;

    fn track(id: u64, times: &[f64]) -> Track {
        Track {
            id,
            states: times
                .iter()
                .map(|&timestamp| TrackState {
                    timestamp,
                    mean: [timestamp, 1.0, 0.0, 0.0],
                    covar_trace: 2.0,
                })
                .collect(),
        }
    }

    #[test]
    fn tracks_are_visible_on_disk_after_each_step() {
        let root = tempfile::tempdir().expect("tempdir");
        let index = RunIndex::from_ordinal(0, 1);
        let mut persister = RunPersister::create(root.path(), &index);
        persister.append_tracks(0.0, &[track(0, &[0.0])]);
        let path = persister.dir().join("tracks.csv");
        let after_first = fs::read_to_string(&path).expect("tracks");
        assert_eq!(after_first.lines().count(), 2);
        persister.append_tracks(1.0, &[track(0, &[0.0, 1.0]), track(1, &[1.0])]);
        let after_second = fs::read_to_string(&path).expect("tracks");
        assert_eq!(after_second.lines().count(), 4);
        assert!(after_second.starts_with("track_id,timestamp,x,vx,y,vy,covar_trace"));
        assert!(persister.finish().is_empty());
    }

    #[test]
    fn unwritable_directory_is_recorded_not_raised() {
        let root = tempfile::tempdir().expect("tempdir");
        let blocker = root.path().join("blocked");
        fs::write(&blocker, b"file").expect("blocker");
        let index = RunIndex::from_ordinal(0, 1);
        let mut persister = RunPersister::create(&blocker, &index);
        persister.write_detections(&[]);
        persister.write_status(&RunStatus::succeeded(index, "now".into(), 0.0));
        let failures = persister.finish();
        assert!(failures.len() >= 3);
        assert!(failures.iter().all(|err| err.family() == "persistence"));
    }

    #[test]
    fn failed_status_writes_error_record() {
        let root = tempfile::tempdir().expect("tempdir");
        let index = RunIndex::from_ordinal(2, 1);
        let mut persister = RunPersister::create(root.path(), &index);
        let error = RunmanError::RunExecution(ErrorInfo::new("boom", "step failed"));
        persister.write_status(&RunStatus::failed(index, "now".into(), 0.5, error));
        let dir = root.path().join("simulation_2").join("run_0");
        let status = fs::read_to_string(dir.join("status.json")).expect("status");
        assert!(status.contains("\"failed\""));
        assert!(dir.join("error.json").exists());
        assert!(persister.finish().is_empty());
    }
}
