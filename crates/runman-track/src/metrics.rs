//! Metric manager computing run-level quality measures.
//!
//! Tracks and truths are associated per timestamp by Euclidean position
//! distance; the SIAP-style measures below are built on that association.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::{
    Detection, GroundTruthPath, Metric, MetricEngine, MetricScope, Timestamp, Track,
};

/// Metric families the manager can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricGenerator {
    /// Target, track and detection counts.
    Basic,
    /// Completeness, ambiguity, spuriousness and position accuracy.
    Siap {
        /// Emit a completeness value for every timestamp as well.
        #[serde(default)]
        per_timestamp: bool,
    },
}

impl MetricGenerator {
    fn name(&self) -> &'static str {
        match self {
            MetricGenerator::Basic => "basic",
            MetricGenerator::Siap { .. } => "siap",
        }
    }
}

/// Metric engine configured from the pipeline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricManager {
    /// Generators evaluated in order.
    pub generators: Vec<MetricGenerator>,
    /// Maximum position distance for a track to be associated with a truth.
    #[serde(default = "MetricManager::default_association_threshold")]
    pub association_threshold: f64,
}

impl MetricManager {
    fn default_association_threshold() -> f64 {
        5.0
    }

    /// Manager emitting every supported metric family.
    pub fn all() -> Self {
        Self {
            generators: vec![
                MetricGenerator::Basic,
                MetricGenerator::Siap {
                    per_timestamp: false,
                },
            ],
            association_threshold: Self::default_association_threshold(),
        }
    }
}

impl Default for MetricManager {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Default)]
struct AssociationCounts {
    truths: usize,
    truths_associated: usize,
    track_truth_links: usize,
    tracks: usize,
    tracks_associated: usize,
    distance_sum: f64,
    distance_count: usize,
}

impl AssociationCounts {
    fn completeness(&self) -> f64 {
        ratio(self.truths_associated as f64, self.truths as f64)
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn timestamps(groundtruth: &[GroundTruthPath], tracks: &[Track]) -> Vec<Timestamp> {
    let mut keys = BTreeSet::new();
    for path in groundtruth {
        keys.extend(path.states.iter().map(|s| s.timestamp.to_bits()));
    }
    for track in tracks {
        keys.extend(track.states.iter().map(|s| s.timestamp.to_bits()));
    }
    let mut times: Vec<f64> = keys.into_iter().map(f64::from_bits).collect();
    times.sort_by(|a, b| a.total_cmp(b));
    times
}

fn distance(a: [f64; 4], b: [f64; 4]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

impl MetricManager {
    fn associate_at(
        &self,
        timestamp: Timestamp,
        groundtruth: &[GroundTruthPath],
        tracks: &[Track],
    ) -> AssociationCounts {
        let truths: Vec<_> = groundtruth
            .iter()
            .filter_map(|path| path.state_at(timestamp))
            .collect();
        let estimates: Vec<_> = tracks
            .iter()
            .filter_map(|track| track.state_at(timestamp))
            .collect();
        let mut counts = AssociationCounts {
            truths: truths.len(),
            tracks: estimates.len(),
            ..AssociationCounts::default()
        };
        let mut track_used = vec![false; estimates.len()];
        for truth in &truths {
            let mut linked = 0;
            for (idx, estimate) in estimates.iter().enumerate() {
                let d = distance(truth.state, estimate.mean);
                if d <= self.association_threshold {
                    linked += 1;
                    track_used[idx] = true;
                    counts.distance_sum += d;
                    counts.distance_count += 1;
                }
            }
            if linked > 0 {
                counts.truths_associated += 1;
                counts.track_truth_links += linked;
            }
        }
        counts.tracks_associated = track_used.iter().filter(|used| **used).count();
        counts
    }

    fn siap(
        &self,
        groundtruth: &[GroundTruthPath],
        tracks: &[Track],
        times: &[Timestamp],
        per_timestamp: bool,
        scope: &MetricScope,
        out: &mut Vec<Metric>,
    ) {
        let mut total = AssociationCounts::default();
        for &timestamp in times {
            let counts = self.associate_at(timestamp, groundtruth, tracks);
            if per_timestamp {
                out.push(Metric {
                    title: "SIAP Completeness at times".to_string(),
                    value: counts.completeness(),
                    generator: "siap".to_string(),
                    scope: MetricScope::SingleTime { timestamp },
                });
            }
            total.truths += counts.truths;
            total.truths_associated += counts.truths_associated;
            total.track_truth_links += counts.track_truth_links;
            total.tracks += counts.tracks;
            total.tracks_associated += counts.tracks_associated;
            total.distance_sum += counts.distance_sum;
            total.distance_count += counts.distance_count;
        }
        let summary = [
            ("SIAP Completeness", total.completeness()),
            (
                "SIAP Ambiguity",
                ratio(
                    total.track_truth_links as f64,
                    total.truths_associated as f64,
                ),
            ),
            (
                "SIAP Spuriousness",
                ratio(
                    (total.tracks - total.tracks_associated) as f64,
                    total.tracks as f64,
                ),
            ),
            (
                "SIAP Position Accuracy",
                ratio(total.distance_sum, total.distance_count as f64),
            ),
        ];
        for (title, value) in summary {
            out.push(Metric {
                title: title.to_string(),
                value,
                generator: "siap".to_string(),
                scope: scope.clone(),
            });
        }
    }
}

impl MetricEngine for MetricManager {
    fn generate(
        &self,
        groundtruth: &[GroundTruthPath],
        detections: &[Detection],
        tracks: &[Track],
    ) -> Result<Vec<Metric>, RunmanError> {
        if !(self.association_threshold > 0.0) {
            return Err(RunmanError::RunExecution(
                ErrorInfo::new("metric-config", "association threshold must be positive")
                    .with_context(
                        "association_threshold",
                        self.association_threshold.to_string(),
                    ),
            ));
        }
        let times = timestamps(groundtruth, tracks);
        let scope = MetricScope::TimeRange {
            start: times.first().copied().unwrap_or(0.0),
            end: times.last().copied().unwrap_or(0.0),
        };
        let mut metrics = Vec::new();
        for generator in &self.generators {
            match generator {
                MetricGenerator::Basic => {
                    let counts = [
                        ("Number of targets", groundtruth.len() as f64),
                        ("Number of tracks", tracks.len() as f64),
                        ("Number of detections", detections.len() as f64),
                        (
                            "Track-to-target ratio",
                            ratio(tracks.len() as f64, groundtruth.len() as f64),
                        ),
                    ];
                    for (title, value) in counts {
                        metrics.push(Metric {
                            title: title.to_string(),
                            value,
                            generator: generator.name().to_string(),
                            scope: scope.clone(),
                        });
                    }
                }
                MetricGenerator::Siap { per_timestamp } => {
                    self.siap(groundtruth, tracks, &times, *per_timestamp, &scope, &mut metrics);
                }
            }
        }
        Ok(metrics)
    }
}
