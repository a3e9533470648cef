//! Simulation and tracking pipeline swept by the runman engine.

mod associate;
mod detector;
pub mod filter;
mod groundtruth;
mod lifecycle;
mod metrics;
mod tracker;

pub use associate::{Association, DataAssociator};
pub use detector::Detector;
pub use filter::{Estimate, Predictor, Updater};
pub use groundtruth::GroundTruthSimulator;
pub use lifecycle::{Deleter, Initiator};
pub use metrics::{MetricGenerator, MetricManager};
pub use tracker::MultiTargetTracker;
