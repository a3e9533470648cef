//! Linear Kalman prediction and update for the constant-velocity model.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};
use serde::{Deserialize, Serialize};

use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::{Timestamp, TrackState};

/// Gaussian state estimate `[x, vx, y, vy]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub timestamp: Timestamp,
    pub mean: Vector4<f64>,
    pub covar: Matrix4<f64>,
}

impl Estimate {
    pub fn new(timestamp: Timestamp, mean: [f64; 4], variances: [f64; 4]) -> Self {
        Self {
            timestamp,
            mean: Vector4::from(mean),
            covar: Matrix4::from_diagonal(&Vector4::from(variances)),
        }
    }

    pub fn to_track_state(&self) -> TrackState {
        TrackState {
            timestamp: self.timestamp,
            mean: [self.mean[0], self.mean[1], self.mean[2], self.mean[3]],
            covar_trace: self.covar.trace(),
        }
    }
}

/// Constant-velocity predictor with white-noise acceleration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictor {
    /// Spectral density of the acceleration noise.
    #[serde(default = "Predictor::default_process_noise")]
    pub process_noise: f64,
}

impl Predictor {
    fn default_process_noise() -> f64 {
        0.05
    }

    pub fn predict(&self, prior: &Estimate, timestamp: Timestamp) -> Estimate {
        let dt = timestamp - prior.timestamp;
        let transition = Matrix4::new(
            1.0, dt, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, dt, //
            0.0, 0.0, 0.0, 1.0,
        );
        let q = self.process_noise;
        let (a, b, c) = (q * dt.powi(3) / 3.0, q * dt.powi(2) / 2.0, q * dt);
        let noise = Matrix4::new(
            a, b, 0.0, 0.0, //
            b, c, 0.0, 0.0, //
            0.0, 0.0, a, b, //
            0.0, 0.0, b, c,
        );
        Estimate {
            timestamp,
            mean: transition * prior.mean,
            covar: transition * prior.covar * transition.transpose() + noise,
        }
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Self {
            process_noise: Self::default_process_noise(),
        }
    }
}

/// Kalman updater for position-only measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Updater {
    /// Standard deviation of the measurement noise assumed by the filter.
    #[serde(default = "Updater::default_measurement_noise")]
    pub measurement_noise: f64,
}

impl Updater {
    fn default_measurement_noise() -> f64 {
        1.0
    }

    fn measurement_matrix() -> Matrix2x4<f64> {
        Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        )
    }

    fn innovation(
        &self,
        predicted: &Estimate,
        measurement: [f64; 2],
    ) -> Result<(Vector2<f64>, Matrix2<f64>), RunmanError> {
        if !(self.measurement_noise > 0.0) {
            return Err(RunmanError::RunExecution(
                ErrorInfo::new("updater-config", "measurement noise must be positive")
                    .with_context("measurement_noise", self.measurement_noise.to_string()),
            ));
        }
        let h = Self::measurement_matrix();
        let residual = Vector2::from(measurement) - h * predicted.mean;
        let noise = Matrix2::identity() * self.measurement_noise.powi(2);
        let covar = h * predicted.covar * h.transpose() + noise;
        Ok((residual, covar))
    }

    /// Squared Mahalanobis distance between the prediction and a measurement.
    pub fn distance(&self, predicted: &Estimate, measurement: [f64; 2]) -> Result<f64, RunmanError> {
        let (residual, covar) = self.innovation(predicted, measurement)?;
        let inverse = invert(&covar)?;
        Ok((residual.transpose() * inverse * residual)[(0, 0)])
    }

    pub fn update(&self, predicted: &Estimate, measurement: [f64; 2]) -> Result<Estimate, RunmanError> {
        let (residual, covar) = self.innovation(predicted, measurement)?;
        let inverse = invert(&covar)?;
        let h = Self::measurement_matrix();
        let gain = predicted.covar * h.transpose() * inverse;
        Ok(Estimate {
            timestamp: predicted.timestamp,
            mean: predicted.mean + gain * residual,
            covar: (Matrix4::identity() - gain * h) * predicted.covar,
        })
    }
}

impl Default for Updater {
    fn default() -> Self {
        Self {
            measurement_noise: Self::default_measurement_noise(),
        }
    }
}

fn invert(covar: &Matrix2<f64>) -> Result<Matrix2<f64>, RunmanError> {
    covar.try_inverse().ok_or_else(|| {
        RunmanError::RunExecution(ErrorInfo::new(
            "innovation-singular",
            "innovation covariance is not invertible",
        ))
    })
}
