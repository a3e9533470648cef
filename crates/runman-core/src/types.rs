use serde::{Deserialize, Serialize};

/// Simulated time in seconds since the start of a run.
pub type Timestamp = f64;

/// Kinematic state of a target in the plane, ordered as `[x, vx, y, vy]`.
pub type KinematicState = [f64; 4];

/// One sample of a ground-truth trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthState {
    /// Simulated time of the sample.
    pub timestamp: Timestamp,
    /// Kinematic state at `timestamp`.
    pub state: KinematicState,
}

/// Reference trajectory of a single target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthPath {
    /// Identifier unique within a run.
    pub id: u64,
    /// Samples ordered by simulated time.
    pub states: Vec<GroundTruthState>,
}

impl GroundTruthPath {
    /// Returns the sample recorded at `timestamp`, if any.
    pub fn state_at(&self, timestamp: Timestamp) -> Option<&GroundTruthState> {
        self.states
            .iter()
            .find(|state| (state.timestamp - timestamp).abs() < 1e-9)
    }
}

/// Position measurement produced by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Simulated time of the measurement.
    pub timestamp: Timestamp,
    /// Measured position `[x, y]`.
    pub measurement: [f64; 2],
    /// Ground-truth path that produced the detection; `None` for clutter.
    pub truth_id: Option<u64>,
}

/// Filtered estimate of a track at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    /// Simulated time of the estimate.
    pub timestamp: Timestamp,
    /// Posterior mean.
    pub mean: KinematicState,
    /// Trace of the posterior covariance.
    pub covar_trace: f64,
}

/// Estimated trajectory maintained by a tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Identifier unique within a run.
    pub id: u64,
    /// Estimates ordered by simulated time.
    pub states: Vec<TrackState>,
}

impl Track {
    /// Most recent estimate held by the track.
    pub fn last_state(&self) -> Option<&TrackState> {
        self.states.last()
    }

    /// Returns the estimate recorded at `timestamp`, if any.
    pub fn state_at(&self, timestamp: Timestamp) -> Option<&TrackState> {
        self.states
            .iter()
            .find(|state| (state.timestamp - timestamp).abs() < 1e-9)
    }
}

/// Time scope a metric value applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum MetricScope {
    /// Metric evaluated at a single timestamp.
    SingleTime {
        /// Timestamp of the evaluation.
        timestamp: Timestamp,
    },
    /// Metric evaluated over a range of time, typically a whole run.
    TimeRange {
        /// Inclusive start of the range.
        start: Timestamp,
        /// Inclusive end of the range.
        end: Timestamp,
    },
}

/// Quality measure produced by a metric engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Name of the metric.
    pub title: String,
    /// Value of the metric.
    pub value: f64,
    /// Generator that produced the metric.
    pub generator: String,
    /// Time scope of the value.
    pub scope: MetricScope,
}

/// Output of one pipeline step: the step's timestamp and its active tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// Simulated time of the step.
    pub timestamp: Timestamp,
    /// Tracks alive after the step.
    pub tracks: Vec<Track>,
}
