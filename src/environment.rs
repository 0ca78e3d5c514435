pub mod action;
pub mod factory;
pub mod instance;
pub mod kinematic_sim;
pub mod simulator;

use std::collections::BTreeMap;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::error::EnvError;
use crate::kinematics::Pose;

pub use action::{Action, ActionSchema};
pub use factory::{EnvironmentFactory, FactoryConfig, PreparedTask};
pub use instance::EnvironmentInstance;
pub use kinematic_sim::{KinematicBackend, KinematicSimConfig};
pub use simulator::{Simulator, SimulatorBackend};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spec {
    pub min: f64,
    pub max: f64,
    pub shape: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectObservation {
    pub position: Point3<f64>,
    /// Action group of the hand carrying the object.
    #[serde(default)]
    pub held_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Observation {
    pub step: u32,
    /// Joint positions keyed by action group, in schema order.
    pub joint_positions: BTreeMap<String, Vec<f64>>,
    /// End-effector poses keyed by manipulator group.
    pub end_effectors: BTreeMap<String, Pose>,
    pub objects: BTreeMap<String, ObjectObservation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Success,
    StepBudget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub success: bool,
    pub steps: u32,
    pub termination: Option<TerminationReason>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub observation: Observation,
    pub done: bool,
    pub info: StepInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    Uninitialized,
    Ready,
    Running,
    Terminated,
    Closed,
}

impl EpisodeState {
    pub fn name(&self) -> &'static str {
        match self {
            EpisodeState::Uninitialized => "uninitialized",
            EpisodeState::Ready => "ready",
            EpisodeState::Running => "running",
            EpisodeState::Terminated => "terminated",
            EpisodeState::Closed => "closed",
        }
    }
}

pub trait Environment {
    fn action_spec(&self) -> Spec;

    fn observation_spec(&self) -> Spec;

    fn reset(&mut self, seed: u64) -> Result<Observation, EnvError>;

    fn step(&mut self, action: &Action) -> Result<Step, EnvError>;

    fn close(&mut self);
}
