use serde::{Deserialize, Serialize};

use runman_core::Detection;

use crate::filter::Estimate;

/// Starts tentative tracks from unassociated detections and confirms them
/// once they have gathered enough associated points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initiator {
    /// Associated detections required before a tentative track is confirmed.
    #[serde(default = "Initiator::default_min_points")]
    pub min_points: usize,
    /// Initial position standard deviation of a new tentative track.
    #[serde(default = "Initiator::default_initial_position_std")]
    pub initial_position_std: f64,
    /// Initial velocity standard deviation of a new tentative track.
    #[serde(default = "Initiator::default_initial_velocity_std")]
    pub initial_velocity_std: f64,
}

impl Initiator {
    fn default_min_points() -> usize {
        2
    }

    fn default_initial_position_std() -> f64 {
        1.0
    }

    fn default_initial_velocity_std() -> f64 {
        5.0
    }

    /// Prior estimate of a track started from `detection`.
    pub fn prior(&self, detection: &Detection) -> Estimate {
        let pos = self.initial_position_std.powi(2);
        let vel = self.initial_velocity_std.powi(2);
        Estimate::new(
            detection.timestamp,
            [detection.measurement[0], 0.0, detection.measurement[1], 0.0],
            [pos, vel, pos, vel],
        )
    }

    /// Returns true once a tentative track with `points` hits may be confirmed.
    pub fn confirms(&self, points: usize) -> bool {
        points >= self.min_points.max(1)
    }
}

impl Default for Initiator {
    fn default() -> Self {
        Self {
            min_points: Self::default_min_points(),
            initial_position_std: Self::default_initial_position_std(),
            initial_velocity_std: Self::default_initial_velocity_std(),
        }
    }
}

/// Deletes tracks whose uncertainty has grown past a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deleter {
    /// Covariance trace above which a track is deleted.
    #[serde(default = "Deleter::default_covar_trace_thresh")]
    pub covar_trace_thresh: f64,
}

impl Deleter {
    fn default_covar_trace_thresh() -> f64 {
        100.0
    }

    pub fn should_delete(&self, estimate: &Estimate) -> bool {
        estimate.covar.trace() > self.covar_trace_thresh
    }
}

impl Default for Deleter {
    fn default() -> Self {
        Self {
            covar_trace_thresh: Self::default_covar_trace_thresh(),
        }
    }
}
