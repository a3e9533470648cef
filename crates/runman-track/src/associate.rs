use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use runman_core::errors::RunmanError;
use runman_core::Detection;

use crate::filter::{Estimate, Updater};

/// Gated global-nearest-neighbour data associator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataAssociator {
    /// Squared Mahalanobis gate; pairs above it are never associated.
    #[serde(default = "DataAssociator::default_gate_threshold")]
    pub gate_threshold: f64,
}

/// Result of associating predictions with detections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Association {
    /// Detection index assigned to each prediction, if any.
    pub assignments: Vec<Option<usize>>,
    /// Detections left unassigned, in ascending index order.
    pub unassigned: Vec<usize>,
}

impl DataAssociator {
    fn default_gate_threshold() -> f64 {
        // chi-square, 2 dof, 99%
        9.21
    }

    /// Assigns each detection to at most one prediction, nearest pairs first.
    pub fn associate(
        &self,
        predictions: &[Estimate],
        detections: &[Detection],
        candidates: &[usize],
        updater: &Updater,
    ) -> Result<Association, RunmanError> {
        let mut pairs = Vec::new();
        for (track_idx, prediction) in predictions.iter().enumerate() {
            for &det_idx in candidates {
                let distance = updater.distance(prediction, detections[det_idx].measurement)?;
                if distance <= self.gate_threshold {
                    pairs.push((distance, track_idx, det_idx));
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut assignments = vec![None; predictions.len()];
        let mut taken = vec![false; detections.len()];
        for (_, track_idx, det_idx) in pairs {
            if assignments[track_idx].is_none() && !taken[det_idx] {
                assignments[track_idx] = Some(det_idx);
                taken[det_idx] = true;
            }
        }
        let unassigned = candidates
            .iter()
            .copied()
            .filter(|&idx| !taken[idx])
            .collect();
        Ok(Association {
            assignments,
            unassigned,
        })
    }
}

impl Default for DataAssociator {
    fn default() -> Self {
        Self {
            gate_threshold: Self::default_gate_threshold(),
        }
    }
}
