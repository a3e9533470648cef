use log::debug;
use serde::{Deserialize, Serialize};

use runman_core::errors::RunmanError;
use runman_core::field::{FieldRegistry, Parameterised};
use runman_core::{field_registry, Detection, Pipeline, StepOutput, Track};

use crate::associate::DataAssociator;
use crate::detector::Detector;
use crate::filter::{Estimate, Predictor, Updater};
use crate::groundtruth::GroundTruthSimulator;
use crate::lifecycle::{Deleter, Initiator};

/// Multi-target tracker fed by a simulated detector.
///
/// Each call to [`Pipeline::advance`] performs one scan: predict, associate,
/// update, delete, then initiate from the detections nobody claimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiTargetTracker {
    /// Detection source, embedding the ground-truth simulator.
    pub detector: Detector,
    #[serde(default)]
    pub initiator: Initiator,
    #[serde(default)]
    pub deleter: Deleter,
    #[serde(default)]
    pub predictor: Predictor,
    #[serde(default)]
    pub updater: Updater,
    #[serde(default)]
    pub data_associator: DataAssociator,
    #[serde(skip)]
    state: TrackerState,
}

#[derive(Debug, Clone, Default)]
struct TrackerState {
    confirmed: Vec<LiveTrack>,
    tentative: Vec<LiveTrack>,
    next_id: u64,
    detections: Vec<Detection>,
}

#[derive(Debug, Clone)]
struct LiveTrack {
    estimate: Estimate,
    track: Track,
    points: usize,
}

impl LiveTrack {
    fn record(&mut self) {
        self.track.states.push(self.estimate.to_track_state());
    }
}

impl MultiTargetTracker {
    /// Creates a tracker with default stages around `detector`.
    pub fn new(detector: Detector) -> Self {
        Self {
            detector,
            initiator: Initiator::default(),
            deleter: Deleter::default(),
            predictor: Predictor::default(),
            updater: Updater::default(),
            data_associator: DataAssociator::default(),
            state: TrackerState::default(),
        }
    }

    fn maintain_confirmed(
        &mut self,
        timestamp: f64,
        detections: &[Detection],
        candidates: &[usize],
    ) -> Result<Vec<usize>, RunmanError> {
        let confirmed = std::mem::take(&mut self.state.confirmed);
        let predictions: Vec<Estimate> = confirmed
            .iter()
            .map(|live| self.predictor.predict(&live.estimate, timestamp))
            .collect();
        let association =
            self.data_associator
                .associate(&predictions, detections, candidates, &self.updater)?;

        let mut survivors = Vec::with_capacity(confirmed.len());
        for ((mut live, predicted), assignment) in confirmed
            .into_iter()
            .zip(predictions)
            .zip(association.assignments)
        {
            live.estimate = match assignment {
                Some(idx) => {
                    live.points += 1;
                    self.updater.update(&predicted, detections[idx].measurement)?
                }
                None => predicted,
            };
            if self.deleter.should_delete(&live.estimate) {
                debug!("deleting track {} at t={timestamp}", live.track.id);
                continue;
            }
            live.record();
            survivors.push(live);
        }
        self.state.confirmed = survivors;
        Ok(association.unassigned)
    }

    fn maintain_tentative(
        &mut self,
        timestamp: f64,
        detections: &[Detection],
        candidates: &[usize],
    ) -> Result<Vec<usize>, RunmanError> {
        let tentative = std::mem::take(&mut self.state.tentative);
        let predictions: Vec<Estimate> = tentative
            .iter()
            .map(|live| self.predictor.predict(&live.estimate, timestamp))
            .collect();
        let association =
            self.data_associator
                .associate(&predictions, detections, candidates, &self.updater)?;

        for ((mut live, predicted), assignment) in tentative
            .into_iter()
            .zip(predictions)
            .zip(association.assignments)
        {
            // a tentative track that misses a scan is dropped
            let Some(idx) = assignment else {
                continue;
            };
            live.estimate = self.updater.update(&predicted, detections[idx].measurement)?;
            live.points += 1;
            live.record();
            self.promote_or_hold(live);
        }
        Ok(association.unassigned)
    }

    fn initiate(&mut self, detections: &[Detection], unassigned: &[usize]) {
        for &idx in unassigned {
            let id = self.state.next_id;
            self.state.next_id += 1;
            let mut live = LiveTrack {
                estimate: self.initiator.prior(&detections[idx]),
                track: Track {
                    id,
                    states: Vec::new(),
                },
                points: 1,
            };
            live.record();
            self.promote_or_hold(live);
        }
    }

    fn promote_or_hold(&mut self, live: LiveTrack) {
        if self.initiator.confirms(live.points) {
            debug!("confirming track {} after {} points", live.track.id, live.points);
            self.state.confirmed.push(live);
        } else {
            self.state.tentative.push(live);
        }
    }
}

impl PartialEq for MultiTargetTracker {
    fn eq(&self, other: &Self) -> bool {
        self.detector == other.detector
            && self.initiator == other.initiator
            && self.deleter == other.deleter
            && self.predictor == other.predictor
            && self.updater == other.updater
            && self.data_associator == other.data_associator
    }
}

impl Parameterised for MultiTargetTracker {
    fn field_registry() -> FieldRegistry<Self> {
        field_registry! {
            "initiator.min_points" => initiator.min_points,
            "initiator.initial_position_std" => initiator.initial_position_std,
            "initiator.initial_velocity_std" => initiator.initial_velocity_std,
            "deleter.covar_trace_thresh" => deleter.covar_trace_thresh,
            "predictor.process_noise" => predictor.process_noise,
            "updater.measurement_noise" => updater.measurement_noise,
            "data_associator.gate_threshold" => data_associator.gate_threshold,
            "detector.seed" => detector.seed,
            "detector.measurement_noise" => detector.measurement_noise,
            "detector.detection_probability" => detector.detection_probability,
            "detector.clutter_rate" => detector.clutter_rate,
            "detector.groundtruth.seed" => detector.groundtruth.seed,
            "detector.groundtruth.timestep" => detector.groundtruth.timestep,
            "detector.groundtruth.number_steps" => detector.groundtruth.number_steps,
            "detector.groundtruth.initial_targets" => detector.groundtruth.initial_targets,
            "detector.groundtruth.birth_probability" => detector.groundtruth.birth_probability,
            "detector.groundtruth.death_probability" => detector.groundtruth.death_probability,
            "detector.groundtruth.process_noise" => detector.groundtruth.process_noise,
        }
    }
}

impl Pipeline for MultiTargetTracker {
    const ROOT_ALIAS: &'static str = "tracker";

    type GroundTruth = GroundTruthSimulator;

    fn advance(&mut self) -> Result<Option<StepOutput>, RunmanError> {
        let Some(timestamp) = self.detector.scan()? else {
            self.state.detections.clear();
            return Ok(None);
        };
        let detections = self.detector.detections().to_vec();
        let candidates: Vec<usize> = (0..detections.len()).collect();

        let leftover = self.maintain_confirmed(timestamp, &detections, &candidates)?;
        let leftover = self.maintain_tentative(timestamp, &detections, &leftover)?;
        self.initiate(&detections, &leftover);

        self.state.detections = detections;
        let tracks = self
            .state
            .confirmed
            .iter()
            .map(|live| live.track.clone())
            .collect();
        Ok(Some(StepOutput { timestamp, tracks }))
    }

    fn detections(&self) -> &[Detection] {
        &self.state.detections
    }

    fn embedded_groundtruth(&self) -> Option<&GroundTruthSimulator> {
        Some(&self.detector.groundtruth)
    }

    fn reseed(&mut self, substream: u64) {
        self.detector.reseed(substream);
        self.state = TrackerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> MultiTargetTracker {
        let mut detector = Detector::new(GroundTruthSimulator {
            seed: 5,
            number_steps: 15,
            initial_targets: 2,
            initial_spread: [30.0, 1.0, 30.0, 1.0],
            ..GroundTruthSimulator::default()
        });
        detector.detection_probability = 1.0;
        detector.measurement_noise = 0.5;
        MultiTargetTracker::new(detector)
    }

    fn drain(tracker: &mut MultiTargetTracker) -> Vec<StepOutput> {
        let mut steps = Vec::new();
        while let Some(step) = tracker.advance().expect("advance") {
            steps.push(step);
        }
        steps
    }

    #[test]
    fn clean_scenario_confirms_one_track_per_target() {
        let mut tracker = tracker();
        let steps = drain(&mut tracker);
        assert_eq!(steps.len(), 15);
        let last = steps.last().expect("last step");
        assert_eq!(last.timestamp, 14.0);
        assert_eq!(last.tracks.len(), 2);
    }

    #[test]
    fn min_points_delays_confirmation() {
        let mut tracker = tracker();
        tracker.initiator.min_points = 3;
        let first = tracker.advance().expect("advance").expect("step");
        let second = tracker.advance().expect("advance").expect("step");
        let third = tracker.advance().expect("advance").expect("step");
        assert!(first.tracks.is_empty());
        assert!(second.tracks.is_empty());
        assert_eq!(third.tracks.len(), 2);
    }

    #[test]
    fn identical_trackers_produce_identical_steps() {
        let mut a = tracker();
        let mut b = a.clone();
        assert_eq!(drain(&mut a), drain(&mut b));
    }

    #[test]
    fn registry_covers_nested_groundtruth_fields() {
        let registry = MultiTargetTracker::field_registry();
        let mut tracker = tracker();
        registry
            .set(
                &mut tracker,
                "detector.groundtruth.number_steps",
                &serde_json::json!(4),
            )
            .expect("set");
        assert_eq!(tracker.detector.groundtruth.number_steps, 4);
        assert_eq!(drain(&mut tracker).len(), 4);
    }
}
