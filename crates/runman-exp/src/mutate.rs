//! Deep-copies the base configuration and applies one parameter combination.

use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::{FieldRegistry, GroundTruthSource, MetricEngine, Pipeline};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::config::BaseConfiguration;
use crate::params::{ParameterCombination, Sweep};

/// Independent configuration triple executed by exactly one run.
#[derive(Debug, Clone)]
pub struct RunConfiguration<P: Pipeline, M> {
    pub pipeline: P,
    pub ground_truth: Option<P::GroundTruth>,
    pub metric_engine: Option<M>,
    ground_truth_embedded: bool,
}

impl<P: Pipeline, M: MetricEngine> RunConfiguration<P, M> {
    /// Re-derives the random streams for repetition `repetition`.
    ///
    /// Repetition 0 keeps the configured seeds.
    pub fn reseed(&mut self, repetition: u64) {
        if repetition == 0 {
            return;
        }
        self.pipeline.reseed(repetition);
        if self.ground_truth_embedded {
            self.ground_truth = self.pipeline.embedded_groundtruth().cloned();
        } else if let Some(ground_truth) = self.ground_truth.as_mut() {
            ground_truth.reseed(repetition);
        }
    }

    /// Effective configuration as a YAML sequence the loader accepts again.
    pub fn snapshot(&self) -> Result<Value, RunmanError> {
        let to_value = |value: Result<Value, serde_yaml::Error>| {
            value.map_err(|err| {
                RunmanError::Serde(ErrorInfo::new("yaml_serialize", err.to_string()))
            })
        };
        let mut entries = vec![to_value(serde_yaml::to_value(&self.pipeline))?];
        if let Some(ground_truth) = &self.ground_truth {
            entries.push(to_value(serde_yaml::to_value(ground_truth))?);
        }
        if let Some(metric_engine) = &self.metric_engine {
            entries.push(to_value(serde_yaml::to_value(metric_engine))?);
        }
        Ok(Value::Sequence(entries))
    }
}

/// Removes the pipeline's root alias from a dotted parameter path.
pub fn strip_root_alias<'a>(path: &'a str, alias: &str) -> Option<&'a str> {
    path.strip_prefix(alias)?.strip_prefix('.')
}

/// Declared path that does not resolve against the pipeline's registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathIssue {
    pub path: String,
    pub reason: String,
}

/// Checks every swept path against the registry of `P`.
pub fn validate_paths<P: Pipeline>(sweep: &Sweep, registry: &FieldRegistry<P>) -> Vec<PathIssue> {
    sweep
        .paths()
        .iter()
        .filter_map(|path| {
            let reason = match strip_root_alias(path, P::ROOT_ALIAS) {
                None => format!("path must start with `{}.`", P::ROOT_ALIAS),
                Some(field) if !registry.contains(field) => {
                    format!("`{field}` is not a sweepable field")
                }
                Some(_) => return None,
            };
            Some(PathIssue {
                path: path.clone(),
                reason,
            })
        })
        .collect()
}

/// Builds the configuration of one run from the base triple.
///
/// The base is never modified; every call returns a fresh deep copy with the
/// combination applied to the pipeline.
pub fn materialize<P: Pipeline, M: MetricEngine>(
    base: &BaseConfiguration<P, M>,
    combination: &ParameterCombination,
    registry: &FieldRegistry<P>,
) -> Result<RunConfiguration<P, M>, RunmanError> {
    let mut pipeline = base.pipeline.clone();
    for assignment in &combination.assignments {
        let tagged = |err: RunmanError| match err {
            RunmanError::ParameterPath(info) => RunmanError::ParameterPath(
                info.with_context("combination", combination.index.to_string()),
            ),
            other => other,
        };
        let field = strip_root_alias(&assignment.path, P::ROOT_ALIAS).ok_or_else(|| {
            RunmanError::ParameterPath(
                ErrorInfo::new("parameter-path", "parameter path has the wrong root")
                    .with_context("path", assignment.path.clone())
                    .with_context("root", P::ROOT_ALIAS),
            )
        });
        let field = field.map_err(tagged)?;
        registry
            .set(&mut pipeline, field, &assignment.value)
            .map_err(|err| match err {
                RunmanError::ParameterPath(info) => RunmanError::ParameterPath(
                    info.with_context("path", assignment.path.clone()),
                ),
                other => other,
            })
            .map_err(tagged)?;
    }
    let ground_truth = if base.ground_truth_embedded {
        pipeline.embedded_groundtruth().cloned()
    } else {
        base.ground_truth.clone()
    };
    Ok(RunConfiguration {
        pipeline,
        ground_truth,
        metric_engine: base.metric_engine.clone(),
        ground_truth_embedded: base.ground_truth_embedded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSpec;
    use runman_core::Parameterised;
    use runman_track::{MetricManager, MultiTargetTracker};
    use serde_json::json;

    type Base = BaseConfiguration<MultiTargetTracker, MetricManager>;

    fn base() -> Base {
        let mut base = Base::from_yaml_str(
            "- detector:\n    groundtruth:\n      seed: 2\n      number_steps: 6\n",
        )
        .expect("base");
        base.resolve_ground_truth();
        base
    }

    fn sweep(parameters: serde_json::Value) -> Sweep {
        let spec: ParameterSpec =
            serde_json::from_value(json!({ "parameters": parameters })).expect("spec");
        Sweep::new(&spec).expect("sweep")
    }

    #[test]
    fn strip_root_alias_requires_a_dot() {
        assert_eq!(strip_root_alias("tracker.a.b", "tracker"), Some("a.b"));
        assert_eq!(strip_root_alias("trackerx.a", "tracker"), None);
        assert_eq!(strip_root_alias("tracker", "tracker"), None);
    }

    #[test]
    fn validate_paths_reports_unknown_and_misrooted_paths() {
        let registry = MultiTargetTracker::field_registry();
        let sweep = sweep(json!([
            {"path": "tracker.initiator.min_points", "values": [2]},
            {"path": "tracker.initiator.nonexistent_field", "values": [1]},
            {"path": "detector.seed", "values": [1]}
        ]));
        let issues = validate_paths(&sweep, &registry);
        let paths: Vec<_> = issues.iter().map(|issue| issue.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["tracker.initiator.nonexistent_field", "detector.seed"]
        );
    }

    #[test]
    fn materialized_copies_are_isolated() {
        let base = base();
        let registry = MultiTargetTracker::field_registry();
        let sweep = sweep(json!([
            {"path": "tracker.initiator.min_points", "values": [3, 4]},
            {"path": "tracker.detector.groundtruth.number_steps", "values": [9]}
        ]));
        let first = materialize(&base, &sweep.combination(0).expect("c0"), &registry)
            .expect("first");
        let second = materialize(&base, &sweep.combination(1).expect("c1"), &registry)
            .expect("second");
        assert_eq!(first.pipeline.initiator.min_points, 3);
        assert_eq!(second.pipeline.initiator.min_points, 4);
        assert_eq!(base.pipeline.initiator.min_points, 2);
        assert_eq!(base.pipeline.detector.groundtruth.number_steps, 6);
        let ground_truth = first.ground_truth.as_ref().expect("gt");
        assert_eq!(ground_truth.number_steps, 9);
        assert_eq!(base.ground_truth.as_ref().expect("base gt").number_steps, 6);
    }

    #[test]
    fn unknown_path_fails_the_run_configuration() {
        let base = base();
        let registry = MultiTargetTracker::field_registry();
        let sweep = sweep(json!([
            {"path": "tracker.initiator.nonexistent_field", "values": [1]}
        ]));
        let err = materialize(&base, &sweep.combination(0).expect("c0"), &registry)
            .expect_err("bad path");
        assert_eq!(err.family(), "parameter-path");
        assert_eq!(
            err.info().context.get("path").map(String::as_str),
            Some("tracker.initiator.nonexistent_field")
        );
        assert_eq!(
            err.info().context.get("combination").map(String::as_str),
            Some("0")
        );
    }

    #[test]
    fn wrong_value_type_is_a_parameter_error() {
        let base = base();
        let registry = MultiTargetTracker::field_registry();
        let sweep = sweep(json!([
            {"path": "tracker.initiator.min_points", "values": ["many"]}
        ]));
        let err = materialize(&base, &sweep.combination(0).expect("c0"), &registry)
            .expect_err("bad value");
        assert_eq!(err.info().code, "parameter-value");
    }

    #[test]
    fn snapshot_reloads_to_the_same_configuration() {
        let base = base();
        let registry = MultiTargetTracker::field_registry();
        let sweep = sweep(json!([
            {"path": "tracker.deleter.covar_trace_thresh", "values": [42.0]}
        ]));
        let run = materialize(&base, &sweep.combination(0).expect("c0"), &registry)
            .expect("run");
        let text = serde_yaml::to_string(&run.snapshot().expect("snapshot")).expect("yaml");
        let reloaded = Base::from_yaml_str(&text).expect("reload");
        assert_eq!(reloaded.pipeline, run.pipeline);
        assert!(reloaded.ground_truth_embedded);
    }
}
