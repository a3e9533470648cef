use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::ParamValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound on the points a single range rule may expand to.
pub const MAX_RANGE_POINTS: usize = 1_000_000;

fn config_error(code: &str, message: impl Into<String>, path: &str) -> RunmanError {
    RunmanError::Configuration(ErrorInfo::new(code, message).with_context("path", path))
}

/// Parameter document: `{"parameters": [...], "runs_num": N}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(default)]
    pub parameters: Vec<ParameterDecl>,
    /// Repeated executions of every combination.
    #[serde(default = "ParameterSpec::default_runs_num")]
    pub runs_num: u64,
}

impl ParameterSpec {
    const fn default_runs_num() -> u64 {
        1
    }

    /// Parses a parameter document from JSON bytes.
    pub fn from_json_slice(data: &[u8]) -> Result<Self, RunmanError> {
        crate::serde::from_json_slice(data).map_err(|err| {
            RunmanError::Configuration(
                ErrorInfo::new("parameters-parse", err.info().message.clone())
                    .with_context("stage", "parameters"),
            )
        })
    }

    /// Reads and parses a parameter document from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RunmanError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| {
            RunmanError::Configuration(
                ErrorInfo::new("parameters-read", err.to_string())
                    .with_context("stage", "parameters")
                    .with_context("file", path.display().to_string()),
            )
        })?;
        Self::from_json_slice(&bytes)
    }
}

/// Value kind coerced onto every candidate of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "number")]
    Float,
    Bool,
    #[serde(alias = "str")]
    String,
}

/// Candidate-generation rule of a declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueRule {
    /// Explicit discrete set.
    Values { values: Vec<Value> },
    /// `min, min + step, ...` up to and including `max`.
    Step {
        #[serde(alias = "value_min")]
        min: f64,
        #[serde(alias = "value_max")]
        max: f64,
        step: f64,
    },
    /// `count` evenly spaced values including both ends.
    Count {
        #[serde(alias = "value_min")]
        min: f64,
        #[serde(alias = "value_max")]
        max: f64,
        #[serde(alias = "n_samples")]
        count: usize,
    },
}

/// One swept parameter: a dotted path plus its candidate rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub path: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValueKind>,
    #[serde(flatten)]
    pub rule: ValueRule,
}

impl ParameterDecl {
    /// Expands the declaration into its candidate values.
    pub fn candidates(&self) -> Result<Vec<Value>, RunmanError> {
        let raw = match &self.rule {
            ValueRule::Values { values } => values.clone(),
            ValueRule::Step { min, max, step } => self.stepped(*min, *max, *step)?,
            ValueRule::Count { min, max, count } => self.spaced(*min, *max, *count)?,
        };
        // rounding to integers may collapse neighbouring range points
        let collapse = self.kind == Some(ValueKind::Int)
            && !matches!(self.rule, ValueRule::Values { .. });
        let mut candidates = Vec::with_capacity(raw.len());
        for value in raw {
            let coerced = self.coerce(value)?;
            if !collapse || candidates.last() != Some(&coerced) {
                candidates.push(coerced);
            }
        }
        if candidates.is_empty() {
            return Err(config_error(
                "parameter-empty",
                "parameter declares no candidate values",
                &self.path,
            ));
        }
        Ok(candidates)
    }

    fn check_bounds(&self, min: f64, max: f64) -> Result<(), RunmanError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(config_error(
                "parameter-range",
                "range bounds must be finite",
                &self.path,
            ));
        }
        if min > max {
            return Err(config_error(
                "parameter-range",
                format!("range minimum {min} exceeds maximum {max}"),
                &self.path,
            ));
        }
        Ok(())
    }

    fn stepped(&self, min: f64, max: f64, step: f64) -> Result<Vec<Value>, RunmanError> {
        self.check_bounds(min, max)?;
        if !(step > 0.0) || !step.is_finite() {
            return Err(config_error(
                "parameter-step",
                "range step must be positive",
                &self.path,
            ));
        }
        let span = ((max - min) / step * (1.0 + 1e-9)).floor();
        self.check_points(span + 1.0)?;
        let points = span as usize + 1;
        Ok((0..points)
            .map(|idx| Value::from(min + idx as f64 * step))
            .collect())
    }

    fn check_points(&self, points: f64) -> Result<(), RunmanError> {
        if !points.is_finite() || points > MAX_RANGE_POINTS as f64 {
            return Err(RunmanError::Configuration(
                ErrorInfo::new("sweep-overflow", "range expands to too many points")
                    .with_context("path", self.path.clone())
                    .with_context("points", points.to_string())
                    .with_hint(format!("keep each range below {MAX_RANGE_POINTS} points")),
            ));
        }
        Ok(())
    }

    fn spaced(&self, min: f64, max: f64, count: usize) -> Result<Vec<Value>, RunmanError> {
        self.check_bounds(min, max)?;
        self.check_points(count as f64)?;
        Ok(match count {
            0 => Vec::new(),
            1 => vec![Value::from(min)],
            _ => {
                let width = (max - min) / (count - 1) as f64;
                (0..count)
                    .map(|idx| {
                        if idx == count - 1 {
                            Value::from(max)
                        } else {
                            Value::from(min + idx as f64 * width)
                        }
                    })
                    .collect()
            }
        })
    }

    fn coerce(&self, value: Value) -> Result<Value, RunmanError> {
        let Some(kind) = self.kind else {
            return Ok(value);
        };
        let coerced = match kind {
            ValueKind::Int => value.as_f64().map(|raw| Value::from(raw.round() as i64)),
            ValueKind::Float => value.as_f64().map(Value::from),
            ValueKind::Bool => value.as_bool().map(Value::Bool),
            ValueKind::String => value.as_str().map(|raw| Value::String(raw.to_string())),
        };
        coerced.ok_or_else(|| {
            RunmanError::Configuration(
                ErrorInfo::new("parameter-kind", "candidate value does not match declared type")
                    .with_context("path", self.path.clone())
                    .with_context("type", format!("{kind:?}").to_lowercase())
                    .with_context("value", value.to_string()),
            )
        })
    }
}

/// One concrete `(path, value)` pair of a combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub path: String,
    pub value: ParamValue,
}

/// Concrete value assignment for every swept path, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterCombination {
    /// Position of the combination in the sweep.
    pub index: usize,
    pub assignments: Vec<Assignment>,
}

impl ParameterCombination {
    pub fn get(&self, path: &str) -> Option<&ParamValue> {
        self.assignments
            .iter()
            .find(|assignment| assignment.path == path)
            .map(|assignment| &assignment.value)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// JSON object view used in manifests and log records.
    pub fn to_object(&self) -> Value {
        let map: Map<String, Value> = self
            .assignments
            .iter()
            .map(|assignment| (assignment.path.clone(), assignment.value.clone()))
            .collect();
        Value::Object(map)
    }
}

/// Lazy Cartesian product over every declared parameter.
///
/// Combinations are decoded on demand from their index, the last declared
/// parameter varying fastest, so a sweep can be iterated repeatedly or
/// addressed at random without materialising the full product.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    spec: ParameterSpec,
    paths: Vec<String>,
    candidates: Vec<Vec<Value>>,
    len: usize,
    total_runs: usize,
}

impl Sweep {
    /// Expands `spec`, validating every declaration.
    pub fn new(spec: &ParameterSpec) -> Result<Self, RunmanError> {
        if spec.runs_num == 0 {
            return Err(RunmanError::Configuration(
                ErrorInfo::new("runs-num", "runs_num must be at least 1")
                    .with_context("stage", "parameters"),
            ));
        }
        let mut seen = BTreeSet::new();
        let mut paths = Vec::with_capacity(spec.parameters.len());
        let mut candidates = Vec::with_capacity(spec.parameters.len());
        let mut len = 1usize;
        for decl in &spec.parameters {
            if !seen.insert(decl.path.as_str()) {
                return Err(config_error(
                    "parameter-duplicate",
                    "parameter path declared more than once",
                    &decl.path,
                ));
            }
            let values = decl.candidates()?;
            len = len.checked_mul(values.len()).ok_or_else(|| {
                config_error("sweep-overflow", "combination count overflows", &decl.path)
            })?;
            paths.push(decl.path.clone());
            candidates.push(values);
        }
        let total_runs = usize::try_from(spec.runs_num)
            .ok()
            .and_then(|runs| len.checked_mul(runs))
            .ok_or_else(|| {
                RunmanError::Configuration(ErrorInfo::new(
                    "sweep-overflow",
                    "total run count overflows",
                ))
            })?;
        Ok(Self {
            spec: spec.clone(),
            paths,
            candidates,
            len,
            total_runs,
        })
    }

    /// Number of combinations; at least one.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn runs_num(&self) -> u64 {
        self.spec.runs_num
    }

    /// Combinations multiplied by repetitions.
    pub fn total_runs(&self) -> usize {
        self.total_runs
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn spec(&self) -> &ParameterSpec {
        &self.spec
    }

    /// Candidate values of the parameter declared at position `idx`.
    pub fn candidates(&self, idx: usize) -> Option<&[Value]> {
        self.candidates.get(idx).map(Vec::as_slice)
    }

    /// Decodes the combination at `index`.
    pub fn combination(&self, index: usize) -> Option<ParameterCombination> {
        if index >= self.len {
            return None;
        }
        let mut remainder = index;
        let mut assignments = Vec::with_capacity(self.paths.len());
        for (path, values) in self.paths.iter().zip(&self.candidates).rev() {
            let digit = remainder % values.len();
            remainder /= values.len();
            assignments.push(Assignment {
                path: path.clone(),
                value: values[digit].clone(),
            });
        }
        assignments.reverse();
        Some(ParameterCombination { index, assignments })
    }

    pub fn iter(&self) -> Combinations<'_> {
        Combinations {
            sweep: self,
            next: 0,
        }
    }
}

impl<'a> IntoIterator for &'a Sweep {
    type Item = ParameterCombination;
    type IntoIter = Combinations<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the combinations of a [`Sweep`].
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    sweep: &'a Sweep,
    next: usize,
}

impl Iterator for Combinations<'_> {
    type Item = ParameterCombination;

    fn next(&mut self) -> Option<Self::Item> {
        let combination = self.sweep.combination(self.next)?;
        self.next += 1;
        Some(combination)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sweep.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Combinations<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: Value) -> ParameterSpec {
        serde_json::from_value(value).expect("spec")
    }

    #[test]
    fn malformed_document_is_a_configuration_error() {
        let spec = ParameterSpec::from_json_slice(br#"{"parameters": [{"path": "tracker.a"}]}"#);
        let err = spec.expect_err("missing rule");
        assert!(err.is_fatal());
        assert_eq!(err.info().code, "parameters-parse");
        assert_eq!(err.info().context.get("stage").map(String::as_str), Some("parameters"));
        let parsed = ParameterSpec::from_json_slice(br#"{"runs_num": 4}"#).expect("defaults");
        assert!(parsed.parameters.is_empty());
        assert_eq!(parsed.runs_num, 4);
    }

    #[test]
    fn empty_parameter_list_yields_one_empty_combination() {
        let sweep = Sweep::new(&spec(json!({"parameters": []}))).expect("sweep");
        assert_eq!(sweep.len(), 1);
        assert_eq!(sweep.total_runs(), 1);
        let all: Vec<_> = sweep.iter().collect();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_empty());
    }

    #[test]
    fn product_of_explicit_and_ranged_parameters() {
        let sweep = Sweep::new(&spec(json!({
            "parameters": [
                {"path": "tracker.initiator.min_points", "values": [2, 3]},
                {"path": "tracker.updater.measurement_noise", "min": 0.5, "max": 1.5, "step": 0.5},
                {"path": "tracker.deleter.covar_trace_thresh", "value_min": 10, "value_max": 20, "n_samples": 1}
            ],
            "runs_num": 2
        })))
        .expect("sweep");
        assert_eq!(sweep.len(), 6);
        assert_eq!(sweep.total_runs(), 12);
        let first = sweep.combination(0).expect("first");
        assert_eq!(first.get("tracker.initiator.min_points"), Some(&json!(2)));
        assert_eq!(first.get("tracker.updater.measurement_noise"), Some(&json!(0.5)));
        assert_eq!(first.get("tracker.deleter.covar_trace_thresh"), Some(&json!(10.0)));
        let last = sweep.combination(5).expect("last");
        assert_eq!(last.get("tracker.initiator.min_points"), Some(&json!(3)));
        assert_eq!(last.get("tracker.updater.measurement_noise"), Some(&json!(1.5)));
        assert!(sweep.combination(6).is_none());
    }

    #[test]
    fn count_rule_includes_both_ends_and_int_kind_rounds() {
        let decl: ParameterDecl = serde_json::from_value(json!({
            "path": "tracker.initiator.min_points",
            "type": "int",
            "min": 1,
            "max": 3,
            "count": 5
        }))
        .expect("decl");
        assert_eq!(
            decl.candidates().expect("candidates"),
            vec![json!(1), json!(2), json!(3)]
        );
    }

    #[test]
    fn explicit_duplicates_are_kept_but_int_ranges_collapse() {
        let decl = |value: Value| -> ParameterDecl { serde_json::from_value(value).expect("decl") };
        let repeated = decl(json!({"path": "tracker.a", "type": "int", "values": [2, 2]}));
        assert_eq!(repeated.candidates().expect("repeated"), vec![json!(2), json!(2)]);
        let spread = decl(json!({"path": "tracker.a", "values": [2, 3, 2]}));
        assert_eq!(spread.candidates().expect("spread").len(), 3);
        let ranged = decl(json!({"path": "tracker.a", "type": "int", "min": 0, "max": 1, "step": 0.25}));
        assert_eq!(ranged.candidates().expect("ranged"), vec![json!(0), json!(1)]);
        let floats = decl(json!({"path": "tracker.a", "min": 0, "max": 1, "step": 0.25}));
        assert_eq!(floats.candidates().expect("floats").len(), 5);
    }

    #[test]
    fn oversized_ranges_are_rejected_before_expansion() {
        for bad in [
            json!({"path": "tracker.a", "min": 0, "max": 1e20, "step": 1}),
            json!({"path": "tracker.a", "min": 0, "max": 1e9, "step": 1}),
            json!({"path": "tracker.a", "min": 0, "max": 1, "step": 1e-300}),
            json!({"path": "tracker.a", "min": 0, "max": 1, "count": MAX_RANGE_POINTS + 1}),
            json!({"path": "tracker.a", "min": 0, "max": 1, "count": u64::MAX}),
        ] {
            let err = Sweep::new(&spec(json!({"parameters": [bad]}))).expect_err("oversized");
            assert!(err.is_fatal());
            assert_eq!(err.info().code, "sweep-overflow");
            assert_eq!(err.info().context.get("path").map(String::as_str), Some("tracker.a"));
        }
        let widest = spec(json!({"parameters": [
            {"path": "tracker.a", "min": 1, "max": MAX_RANGE_POINTS, "step": 1}
        ]}));
        assert_eq!(Sweep::new(&widest).expect("at cap").len(), MAX_RANGE_POINTS);
    }

    #[test]
    fn zero_candidates_is_a_configuration_error() {
        for bad in [
            json!({"parameters": [{"path": "tracker.a", "values": []}]}),
            json!({"parameters": [{"path": "tracker.a", "min": 0, "max": 1, "count": 0}]}),
            json!({"parameters": [{"path": "tracker.a", "min": 2, "max": 1, "step": 1}]}),
            json!({"parameters": [{"path": "tracker.a", "min": 0, "max": 1, "step": 0}]}),
        ] {
            let err = Sweep::new(&spec(bad)).expect_err("invalid");
            assert!(err.is_fatal());
            assert_eq!(err.info().context.get("path").map(String::as_str), Some("tracker.a"));
        }
    }

    #[test]
    fn duplicate_paths_and_zero_runs_are_rejected() {
        let duplicate = spec(json!({"parameters": [
            {"path": "tracker.a", "values": [1]},
            {"path": "tracker.a", "values": [2]}
        ]}));
        assert_eq!(
            Sweep::new(&duplicate).expect_err("duplicate").info().code,
            "parameter-duplicate"
        );
        let zero = spec(json!({"parameters": [], "runs_num": 0}));
        assert_eq!(Sweep::new(&zero).expect_err("zero").info().code, "runs-num");
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let err = Sweep::new(&spec(json!({"parameters": [
            {"path": "tracker.a", "type": "bool", "values": [1]}
        ]})))
        .expect_err("mismatch");
        assert_eq!(err.info().code, "parameter-kind");
    }

    #[test]
    fn iteration_is_restartable() {
        let sweep = Sweep::new(&spec(json!({"parameters": [
            {"path": "tracker.a", "values": [1, 2, 3]},
            {"path": "tracker.b", "values": ["x", "y"]}
        ]})))
        .expect("sweep");
        let first: Vec<_> = sweep.iter().collect();
        let second: Vec<_> = (&sweep).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(sweep.iter().len(), 6);
    }
}
