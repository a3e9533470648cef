use std::fs;
use std::path::Path;

use log::{debug, info};
use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::{MetricEngine, Pipeline};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value;

fn stage_error(stage: &str, code: &str, message: impl Into<String>) -> RunmanError {
    RunmanError::Configuration(ErrorInfo::new(code, message).with_context("stage", stage))
}

fn parse_entry<T: DeserializeOwned>(stage: &str, entry: Value) -> Result<T, RunmanError> {
    serde_yaml::from_value(entry)
        .map_err(|err| stage_error(stage, "config-structure", err.to_string()))
}

fn documents(text: &str) -> Result<Vec<Value>, RunmanError> {
    let mut entries = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let mut value = Value::deserialize(document)
            .map_err(|err| stage_error("document", "config-parse", err.to_string()))?;
        value
            .apply_merge()
            .map_err(|err| stage_error("document", "config-parse", err.to_string()))?;
        entries.push(value);
    }
    Ok(match entries.len() {
        1 => match entries.pop() {
            Some(Value::Sequence(items)) => items,
            Some(Value::Null) => Vec::new(),
            Some(single) => vec![single],
            None => Vec::new(),
        },
        _ => entries,
    })
}

/// Arrangement of the configuration document, resolved from its entry count.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigShape<P: Pipeline, M> {
    /// `(pipeline, ground_truth, metric_engine)`.
    Full {
        pipeline: P,
        ground_truth: P::GroundTruth,
        metric_engine: M,
    },
    /// `(pipeline, ground_truth)`; the ground truth is the pipeline's embedded one.
    WithGroundTruth {
        pipeline: P,
        ground_truth: P::GroundTruth,
    },
    /// `(pipeline, metric_engine)`.
    WithMetrics { pipeline: P, metric_engine: M },
    PipelineOnly { pipeline: P },
}

impl<P: Pipeline, M: MetricEngine> ConfigShape<P, M> {
    /// Parses a YAML document holding one, two or three structures.
    ///
    /// The structures may be given as a top-level sequence or as separate
    /// YAML documents; a lone mapping is read as a pipeline-only document.
    pub fn parse(text: &str) -> Result<Self, RunmanError> {
        let mut entries = documents(text)?.into_iter();
        let count = entries.len();
        if !(1..=3).contains(&count) {
            return Err(RunmanError::Configuration(
                ErrorInfo::new(
                    "config-shape",
                    format!("expected 1, 2 or 3 structures, found {count}"),
                )
                .with_context("stage", "shape")
                .with_hint("list the pipeline, then optionally ground truth and metric engine"),
            ));
        }
        let pipeline: P = match entries.next() {
            Some(entry) => parse_entry("pipeline", entry)?,
            None => return Err(stage_error("shape", "config-shape", "missing pipeline")),
        };
        match (entries.next(), entries.next()) {
            (None, _) => Ok(ConfigShape::PipelineOnly { pipeline }),
            (Some(second), None) => {
                let candidate = serde_yaml::from_value::<P::GroundTruth>(second.clone()).ok();
                match candidate {
                    Some(ground_truth)
                        if pipeline.embedded_groundtruth() == Some(&ground_truth) =>
                    {
                        Ok(ConfigShape::WithGroundTruth {
                            pipeline,
                            ground_truth,
                        })
                    }
                    _ => {
                        let metric_engine = parse_entry("metric_engine", second)?;
                        Ok(ConfigShape::WithMetrics {
                            pipeline,
                            metric_engine,
                        })
                    }
                }
            }
            (Some(second), Some(third)) => Ok(ConfigShape::Full {
                pipeline,
                ground_truth: parse_entry("ground_truth", second)?,
                metric_engine: parse_entry("metric_engine", third)?,
            }),
        }
    }

    /// Number of structures the shape was resolved from.
    pub fn arity(&self) -> usize {
        match self {
            ConfigShape::Full { .. } => 3,
            ConfigShape::WithGroundTruth { .. } | ConfigShape::WithMetrics { .. } => 2,
            ConfigShape::PipelineOnly { .. } => 1,
        }
    }
}

/// Loaded `(pipeline, ground truth, metric engine)` triple that every run
/// is derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseConfiguration<P: Pipeline, M> {
    pub pipeline: P,
    pub ground_truth: Option<P::GroundTruth>,
    pub metric_engine: Option<M>,
    /// Ground truth is the one embedded in the pipeline's detector, so run
    /// copies re-derive it from the mutated pipeline.
    pub ground_truth_embedded: bool,
}

impl<P: Pipeline, M: MetricEngine> From<ConfigShape<P, M>> for BaseConfiguration<P, M> {
    fn from(shape: ConfigShape<P, M>) -> Self {
        let (pipeline, ground_truth, metric_engine) = match shape {
            ConfigShape::Full {
                pipeline,
                ground_truth,
                metric_engine,
            } => (pipeline, Some(ground_truth), Some(metric_engine)),
            ConfigShape::WithGroundTruth {
                pipeline,
                ground_truth,
            } => (pipeline, Some(ground_truth), None),
            ConfigShape::WithMetrics {
                pipeline,
                metric_engine,
            } => (pipeline, None, Some(metric_engine)),
            ConfigShape::PipelineOnly { pipeline } => (pipeline, None, None),
        };
        let ground_truth_embedded = match (&ground_truth, pipeline.embedded_groundtruth()) {
            (Some(external), Some(embedded)) => external == embedded,
            _ => false,
        };
        Self {
            pipeline,
            ground_truth,
            metric_engine,
            ground_truth_embedded,
        }
    }
}

impl<P: Pipeline, M: MetricEngine> BaseConfiguration<P, M> {
    /// Parses a configuration document from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, RunmanError> {
        let shape = ConfigShape::<P, M>::parse(text)?;
        debug!("configuration resolved from {} structure(s)", shape.arity());
        Ok(shape.into())
    }

    /// Falls back to the pipeline's embedded ground truth when none was given.
    ///
    /// Returns true when a ground-truth source is available afterwards.
    pub fn resolve_ground_truth(&mut self) -> bool {
        if self.ground_truth.is_some() {
            return true;
        }
        match self.pipeline.embedded_groundtruth() {
            Some(embedded) => {
                info!("no ground truth configured, using the one embedded in the pipeline");
                self.ground_truth = Some(embedded.clone());
                self.ground_truth_embedded = true;
                true
            }
            None => false,
        }
    }
}

/// Reads and parses the configuration document at `path`.
pub fn load_config<P, M, Q>(path: Q) -> Result<BaseConfiguration<P, M>, RunmanError>
where
    P: Pipeline,
    M: MetricEngine,
    Q: AsRef<Path>,
{
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|err| {
        RunmanError::Configuration(
            ErrorInfo::new("config-read", err.to_string())
                .with_context("stage", "document")
                .with_context("file", path.display().to_string()),
        )
    })?;
    BaseConfiguration::from_yaml_str(&text)
}
