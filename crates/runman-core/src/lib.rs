#![deny(missing_docs)]
#![doc = "Core traits and data types for the runman parameter-sweep engine."]

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod errors;
pub mod field;
pub mod provenance;
pub mod rng;
mod types;

pub use errors::{ErrorInfo, RunmanError};
pub use field::{FieldAccessor, FieldRegistry, ParamField, ParamValue, Parameterised};
pub use provenance::{SchemaVersion, SweepProvenance};
pub use rng::{derive_substream_seed, repetition_seed, RngHandle};
pub use types::{
    Detection, GroundTruthPath, GroundTruthState, KinematicState, Metric, MetricScope,
    StepOutput, Timestamp, Track, TrackState,
};

/// Source of reference trajectories a run's estimates are compared against.
///
/// Implementations are plain values: cloning one yields a fully independent
/// source that advances on its own.
pub trait GroundTruthSource:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned
{
    /// Advances the source until every sample up to `timestamp` is available.
    fn advance_to(&mut self, timestamp: Timestamp) -> Result<(), RunmanError>;

    /// Paths generated so far.
    fn paths(&self) -> &[GroundTruthPath];

    /// Re-derives internal seeds for repetition `substream` of a run.
    fn reseed(&mut self, _substream: u64) {}
}

/// Estimation pipeline driven step by step by the sweep executor.
///
/// Cloning a pipeline must produce a deep, independent copy of the whole
/// object graph, including any embedded ground-truth source.
pub trait Pipeline:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + Parameterised
{
    /// Leading segment of every dotted parameter path aimed at this pipeline.
    const ROOT_ALIAS: &'static str;

    /// Ground-truth source type the pipeline's detector may embed.
    type GroundTruth: GroundTruthSource;

    /// Advances the pipeline one step. Returns `Ok(None)` once exhausted.
    fn advance(&mut self) -> Result<Option<StepOutput>, RunmanError>;

    /// Detections produced by the most recent step.
    fn detections(&self) -> &[Detection];

    /// Ground-truth source embedded in the pipeline's detection stage.
    fn embedded_groundtruth(&self) -> Option<&Self::GroundTruth>;

    /// Re-derives internal seeds for repetition `substream` of a run.
    fn reseed(&mut self, _substream: u64) {}
}

/// Computes quality metrics from a finished run's accumulated data.
pub trait MetricEngine: Clone + Debug + Send + Sync + Serialize + DeserializeOwned {
    /// Generates metrics for the supplied ground truth, detections and tracks.
    fn generate(
        &self,
        groundtruth: &[GroundTruthPath],
        detections: &[Detection],
        tracks: &[Track],
    ) -> Result<Vec<Metric>, RunmanError>;
}
