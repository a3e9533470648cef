use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::SweepProvenance;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mutate::PathIssue;
use crate::params::Sweep;
use crate::serde::to_canonical_json_bytes;

/// Timestamp layout of sweep root directory names.
pub const ROOT_TIME_FORMAT: &str = "%d_%m_%Y_%H_%M_%S";

fn persistence_error(code: &str, err: impl ToString, path: &Path) -> RunmanError {
    RunmanError::Persistence(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Position of one run in the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunIndex {
    /// Position among all runs, repetitions of a combination adjacent.
    pub ordinal: usize,
    /// Combination index.
    pub simulation: usize,
    pub repetition: u64,
}

impl RunIndex {
    pub fn from_ordinal(ordinal: usize, runs_num: u64) -> Self {
        let runs = usize::try_from(runs_num.max(1)).unwrap_or(usize::MAX);
        Self {
            ordinal,
            simulation: ordinal / runs,
            repetition: (ordinal % runs) as u64,
        }
    }

    /// Directory of the run below the sweep root.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(format!("simulation_{}", self.simulation))
            .join(format!("run_{}", self.repetition))
    }
}

/// Creates a fresh `<out>/<prefix>_<timestamp>` directory.
///
/// A numeric suffix is appended when a sweep started within the same second
/// already claimed the name.
pub fn allocate_sweep_root(
    out: &Path,
    prefix: &str,
    started: &DateTime<Local>,
) -> Result<PathBuf, RunmanError> {
    fs::create_dir_all(out).map_err(|err| persistence_error("sweep-out-dir", err, out))?;
    let stem = format!("{prefix}_{}", started.format(ROOT_TIME_FORMAT));
    let mut candidate = out.join(&stem);
    let mut suffix = 0u32;
    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                suffix += 1;
                candidate = out.join(format!("{stem}_{suffix}"));
            }
            Err(err) => return Err(persistence_error("sweep-root", err, &candidate)),
        }
    }
}

/// Manifest entry describing one planned run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: RunIndex,
    /// Run directory relative to the sweep root.
    pub dir: String,
    pub parameters: Value,
}

/// Plan of a sweep, written before any run is dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepManifest {
    pub provenance: SweepProvenance,
    pub combinations: usize,
    pub runs_num: u64,
    pub total_runs: usize,
    pub parameter_paths: Vec<String>,
    #[serde(default)]
    pub invalid_paths: Vec<PathIssue>,
    pub runs: Vec<ManifestEntry>,
}

impl SweepManifest {
    pub fn new(sweep: &Sweep, provenance: SweepProvenance, invalid_paths: Vec<PathIssue>) -> Self {
        let runs = (0..sweep.total_runs())
            .map(|ordinal| {
                let index = RunIndex::from_ordinal(ordinal, sweep.runs_num());
                let parameters = sweep
                    .combination(index.simulation)
                    .map(|combination| combination.to_object())
                    .unwrap_or(Value::Null);
                ManifestEntry {
                    index,
                    dir: index.relative_dir().display().to_string(),
                    parameters,
                }
            })
            .collect();
        Self {
            provenance,
            combinations: sweep.len(),
            runs_num: sweep.runs_num(),
            total_runs: sweep.total_runs(),
            parameter_paths: sweep.paths().to_vec(),
            invalid_paths,
            runs,
        }
    }

    pub fn write(&self, root: &Path) -> Result<(), RunmanError> {
        let path = root.join("manifest.json");
        let bytes = to_canonical_json_bytes(self)?;
        fs::write(&path, bytes).map_err(|err| persistence_error("manifest-write", err, &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSpec;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn run_index_groups_repetitions_by_combination() {
        let index = RunIndex::from_ordinal(7, 3);
        assert_eq!(index.simulation, 2);
        assert_eq!(index.repetition, 1);
        assert_eq!(
            index.relative_dir(),
            PathBuf::from("simulation_2").join("run_1")
        );
    }

    #[test]
    fn sweep_roots_are_unique_within_a_second() {
        let out = tempfile::tempdir().expect("tempdir");
        let started = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("time");
        let first = allocate_sweep_root(out.path(), "metrics", &started).expect("first");
        let second = allocate_sweep_root(out.path(), "metrics", &started).expect("second");
        assert_eq!(
            first.file_name().and_then(|name| name.to_str()),
            Some("metrics_09_03_2024_14_05_07")
        );
        assert_eq!(
            second.file_name().and_then(|name| name.to_str()),
            Some("metrics_09_03_2024_14_05_07_1")
        );
    }

    #[test]
    fn manifest_lists_every_run() {
        let spec: ParameterSpec = serde_json::from_value(json!({
            "parameters": [{"path": "tracker.a", "values": [1, 2]}],
            "runs_num": 2
        }))
        .expect("spec");
        let sweep = Sweep::new(&spec).expect("sweep");
        let manifest = SweepManifest::new(&sweep, SweepProvenance::default(), Vec::new());
        assert_eq!(manifest.runs.len(), 4);
        assert_eq!(manifest.runs[3].index.simulation, 1);
        assert_eq!(manifest.runs[3].parameters, json!({"tracker.a": 2}));
    }
}
