//! Parameter-sweep orchestration: expands a parameter document into runs,
//! executes them in parallel over cloned pipeline configurations and
//! persists each run's results.

mod config;
mod dispatch;
mod hash;
mod manifest;
mod mutate;
mod params;
mod persist;
mod runner;
mod serde;

pub use config::{load_config, BaseConfiguration, ConfigShape};
pub use dispatch::{run_sweep, RunOpts, RunSummary, SweepReport};
pub use hash::stable_hash_string;
pub use manifest::{allocate_sweep_root, ManifestEntry, RunIndex, SweepManifest, ROOT_TIME_FORMAT};
pub use mutate::{materialize, strip_root_alias, validate_paths, PathIssue, RunConfiguration};
pub use params::{
    Assignment, Combinations, ParameterCombination, ParameterDecl, ParameterSpec, Sweep,
    ValueKind, ValueRule,
};
pub use persist::{RunPersister, RunState, RunStatus};
pub use runner::{run, validate, SweepRequest, ValidationReport};

pub use self::serde::{from_json_slice, to_canonical_json_bytes, to_yaml_string};
