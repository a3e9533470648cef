use rand::Rng;
use rand_distr::{Distribution, Normal, Poisson};
use serde::{Deserialize, Serialize};

use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::rng::{repetition_seed, RngHandle};
use runman_core::{Detection, GroundTruthSource, Timestamp};

use crate::groundtruth::GroundTruthSimulator;

fn config_error(field: &str, message: &str) -> RunmanError {
    RunmanError::RunExecution(ErrorInfo::new("detector-config", message).with_context("field", field))
}

/// Position sensor observing an embedded ground-truth simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detector {
    /// Ground truth observed by the sensor.
    pub groundtruth: GroundTruthSimulator,
    /// Seed for measurement noise, missed detections and clutter.
    #[serde(default)]
    pub seed: u64,
    /// Standard deviation of the position measurement noise.
    #[serde(default = "Detector::default_measurement_noise")]
    pub measurement_noise: f64,
    /// Probability that an alive target is detected at a scan.
    #[serde(default = "Detector::default_detection_probability")]
    pub detection_probability: f64,
    /// Expected number of clutter detections per scan.
    #[serde(default)]
    pub clutter_rate: f64,
    /// Surveillance region `[x_min, x_max, y_min, y_max]` used for clutter.
    #[serde(default = "Detector::default_clutter_area")]
    pub clutter_area: [f64; 4],
    #[serde(skip)]
    state: DetectorState,
}

#[derive(Debug, Clone, Default)]
struct DetectorState {
    rng: Option<RngHandle>,
    detections: Vec<Detection>,
}

impl Detector {
    fn default_measurement_noise() -> f64 {
        1.0
    }

    fn default_detection_probability() -> f64 {
        0.9
    }

    fn default_clutter_area() -> [f64; 4] {
        [-100.0, 100.0, -100.0, 100.0]
    }

    /// Creates a detector with default sensor settings around `groundtruth`.
    pub fn new(groundtruth: GroundTruthSimulator) -> Self {
        Self {
            groundtruth,
            seed: 0,
            measurement_noise: Self::default_measurement_noise(),
            detection_probability: Self::default_detection_probability(),
            clutter_rate: 0.0,
            clutter_area: Self::default_clutter_area(),
            state: DetectorState::default(),
        }
    }

    /// Detections produced by the latest scan.
    pub fn detections(&self) -> &[Detection] {
        &self.state.detections
    }

    /// Advances the ground truth one step and measures it.
    ///
    /// Returns the scan timestamp, or `None` once the ground truth is
    /// exhausted.
    pub fn scan(&mut self) -> Result<Option<Timestamp>, RunmanError> {
        self.validate()?;
        let Some(timestamp) = self.groundtruth.step()? else {
            self.state.detections.clear();
            return Ok(None);
        };
        let noise = Normal::new(0.0, self.measurement_noise)
            .map_err(|err| config_error("measurement_noise", &err.to_string()))?;
        let seed = self.seed;
        let rng = self
            .state
            .rng
            .get_or_insert_with(|| RngHandle::from_seed(seed));

        let mut detections = Vec::new();
        for path in self.groundtruth.alive_paths() {
            let Some(truth) = path.state_at(timestamp) else {
                continue;
            };
            if !rng.gen_bool(self.detection_probability) {
                continue;
            }
            detections.push(Detection {
                timestamp,
                measurement: [
                    truth.state[0] + noise.sample(rng),
                    truth.state[2] + noise.sample(rng),
                ],
                truth_id: Some(path.id),
            });
        }

        if self.clutter_rate > 0.0 {
            let clutter = Poisson::new(self.clutter_rate)
                .map_err(|err| config_error("clutter_rate", &err.to_string()))?;
            let count: f64 = clutter.sample(rng);
            let [x_min, x_max, y_min, y_max] = self.clutter_area;
            for _ in 0..count as usize {
                detections.push(Detection {
                    timestamp,
                    measurement: [rng.gen_range(x_min..=x_max), rng.gen_range(y_min..=y_max)],
                    truth_id: None,
                });
            }
        }
        self.state.detections = detections;
        Ok(Some(timestamp))
    }

    /// Re-derives the sensor and ground-truth seeds for a repetition.
    pub fn reseed(&mut self, substream: u64) {
        self.seed = repetition_seed(self.seed, substream);
        self.state = DetectorState::default();
        self.groundtruth.reseed(substream);
    }

    fn validate(&self) -> Result<(), RunmanError> {
        if !(0.0..=1.0).contains(&self.detection_probability) {
            return Err(config_error(
                "detection_probability",
                "probability must lie in [0, 1]",
            ));
        }
        if !(self.clutter_rate >= 0.0) {
            return Err(config_error("clutter_rate", "clutter rate must be non-negative"));
        }
        let [x_min, x_max, y_min, y_max] = self.clutter_area;
        if !(x_min <= x_max && y_min <= y_max) {
            return Err(config_error("clutter_area", "clutter area bounds are inverted"));
        }
        Ok(())
    }
}

impl PartialEq for Detector {
    fn eq(&self, other: &Self) -> bool {
        self.groundtruth == other.groundtruth
            && self.seed == other.seed
            && self.measurement_noise == other.measurement_noise
            && self.detection_probability == other.detection_probability
            && self.clutter_rate == other.clutter_rate
            && self.clutter_area == other.clutter_area
    }
}
