use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use runman_core::errors::{ErrorInfo, RunmanError};
use runman_core::rng::{repetition_seed, RngHandle};
use runman_core::{GroundTruthPath, GroundTruthSource, GroundTruthState, KinematicState, Timestamp};

fn config_error(field: &str, message: &str) -> RunmanError {
    RunmanError::RunExecution(
        ErrorInfo::new("groundtruth-config", message).with_context("field", field),
    )
}

/// Seeded multi-target constant-velocity ground-truth simulator.
///
/// The serialized fields are the simulator's configuration; the simulation
/// state is rebuilt lazily on the first step, so two simulators with equal
/// configuration produce identical trajectories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroundTruthSimulator {
    /// Master seed for the simulation.
    #[serde(default)]
    pub seed: u64,
    /// Simulated seconds between consecutive steps.
    #[serde(default = "GroundTruthSimulator::default_timestep")]
    pub timestep: f64,
    /// Number of steps simulated before the source is exhausted.
    #[serde(default = "GroundTruthSimulator::default_number_steps")]
    pub number_steps: u32,
    /// Mean initial state of newly created targets.
    #[serde(default)]
    pub initial_state: KinematicState,
    /// Standard deviation of each initial state component.
    #[serde(default = "GroundTruthSimulator::default_initial_spread")]
    pub initial_spread: KinematicState,
    /// Number of targets alive at the first step.
    #[serde(default = "GroundTruthSimulator::default_initial_targets")]
    pub initial_targets: u32,
    /// Probability that a new target is born at a step.
    #[serde(default)]
    pub birth_probability: f64,
    /// Probability that an alive target dies at a step.
    #[serde(default)]
    pub death_probability: f64,
    /// Spectral density of the white-noise acceleration.
    #[serde(default = "GroundTruthSimulator::default_process_noise")]
    pub process_noise: f64,
    #[serde(skip)]
    pub(crate) state: SimulationState,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SimulationState {
    rng: Option<RngHandle>,
    step: u32,
    next_id: u64,
    paths: Vec<GroundTruthPath>,
    alive: Vec<usize>,
}

impl GroundTruthSimulator {
    fn default_timestep() -> f64 {
        1.0
    }

    fn default_number_steps() -> u32 {
        20
    }

    fn default_initial_spread() -> KinematicState {
        [10.0, 1.0, 10.0, 1.0]
    }

    fn default_initial_targets() -> u32 {
        2
    }

    fn default_process_noise() -> f64 {
        0.05
    }

    /// Timestamp of the next step, or `None` once every step was simulated.
    pub fn next_timestamp(&self) -> Option<Timestamp> {
        (self.state.step < self.number_steps).then(|| self.state.step as f64 * self.timestep)
    }

    /// Paths of the targets alive after the latest step.
    pub fn alive_paths(&self) -> impl Iterator<Item = &GroundTruthPath> {
        self.state.alive.iter().map(|&idx| &self.state.paths[idx])
    }

    /// Simulates one step, returning its timestamp, or `None` once exhausted.
    pub fn step(&mut self) -> Result<Option<Timestamp>, RunmanError> {
        let Some(timestamp) = self.next_timestamp() else {
            return Ok(None);
        };
        self.validate()?;
        if self.state.step == 0 {
            for _ in 0..self.initial_targets {
                self.spawn(timestamp)?;
            }
        } else {
            self.propagate(timestamp)?;
            let birth_probability = self.birth_probability;
            if self.rng().gen_bool(birth_probability) {
                self.spawn(timestamp)?;
            }
        }
        self.state.step += 1;
        Ok(Some(timestamp))
    }

    fn validate(&self) -> Result<(), RunmanError> {
        if !(self.timestep > 0.0) || !self.timestep.is_finite() {
            return Err(config_error("timestep", "timestep must be positive and finite"));
        }
        if !(0.0..=1.0).contains(&self.birth_probability) {
            return Err(config_error("birth_probability", "probability must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.death_probability) {
            return Err(config_error("death_probability", "probability must lie in [0, 1]"));
        }
        if !(self.process_noise >= 0.0) {
            return Err(config_error("process_noise", "process noise must be non-negative"));
        }
        Ok(())
    }

    fn rng(&mut self) -> &mut RngHandle {
        let seed = self.seed;
        self.state
            .rng
            .get_or_insert_with(|| RngHandle::from_seed(seed))
    }

    fn spawn(&mut self, timestamp: Timestamp) -> Result<(), RunmanError> {
        let mut state = [0.0; 4];
        for (idx, component) in state.iter_mut().enumerate() {
            let spread = Normal::new(self.initial_state[idx], self.initial_spread[idx])
                .map_err(|err| config_error("initial_spread", &err.to_string()))?;
            *component = spread.sample(self.rng());
        }
        let id = self.state.next_id;
        self.state.next_id += 1;
        self.state.paths.push(GroundTruthPath {
            id,
            states: vec![GroundTruthState { timestamp, state }],
        });
        self.state.alive.push(self.state.paths.len() - 1);
        Ok(())
    }

    fn propagate(&mut self, timestamp: Timestamp) -> Result<(), RunmanError> {
        let dt = self.timestep;
        let accel = Normal::new(0.0, (self.process_noise * dt).sqrt())
            .map_err(|err| config_error("process_noise", &err.to_string()))?;
        let death_probability = self.death_probability;
        let alive = std::mem::take(&mut self.state.alive);
        let mut survivors = Vec::with_capacity(alive.len());
        for idx in alive {
            if self.rng().gen_bool(death_probability) {
                continue;
            }
            let ax = accel.sample(self.rng());
            let ay = accel.sample(self.rng());
            let path = &mut self.state.paths[idx];
            let Some(last) = path.states.last() else {
                continue;
            };
            let [x, vx, y, vy] = last.state;
            let next = [
                x + vx * dt + 0.5 * ax * dt,
                vx + ax,
                y + vy * dt + 0.5 * ay * dt,
                vy + ay,
            ];
            path.states.push(GroundTruthState {
                timestamp,
                state: next,
            });
            survivors.push(idx);
        }
        self.state.alive = survivors;
        Ok(())
    }
}

impl Default for GroundTruthSimulator {
    fn default() -> Self {
        Self {
            seed: 0,
            timestep: Self::default_timestep(),
            number_steps: Self::default_number_steps(),
            initial_state: [0.0; 4],
            initial_spread: Self::default_initial_spread(),
            initial_targets: Self::default_initial_targets(),
            birth_probability: 0.0,
            death_probability: 0.0,
            process_noise: Self::default_process_noise(),
            state: SimulationState::default(),
        }
    }
}

/// Equality compares configuration only; two equal simulators generate the
/// same trajectories.
impl PartialEq for GroundTruthSimulator {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed
            && self.timestep == other.timestep
            && self.number_steps == other.number_steps
            && self.initial_state == other.initial_state
            && self.initial_spread == other.initial_spread
            && self.initial_targets == other.initial_targets
            && self.birth_probability == other.birth_probability
            && self.death_probability == other.death_probability
            && self.process_noise == other.process_noise
    }
}

impl GroundTruthSource for GroundTruthSimulator {
    fn advance_to(&mut self, timestamp: Timestamp) -> Result<(), RunmanError> {
        while let Some(next) = self.next_timestamp() {
            if next > timestamp + 1e-9 {
                break;
            }
            self.step()?;
        }
        Ok(())
    }

    fn paths(&self) -> &[GroundTruthPath] {
        &self.state.paths
    }

    fn reseed(&mut self, substream: u64) {
        self.seed = repetition_seed(self.seed, substream);
        self.state = SimulationState::default();
    }
}
