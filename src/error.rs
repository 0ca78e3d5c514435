//! Error types shared across the adaptation layer.

use thiserror::Error;

/// A malformed embodiment specification. Fatal at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("embodiment id must not be empty")]
    EmptyId,

    #[error("duplicate joint name: {0}")]
    DuplicateJoint(String),

    #[error("joint {joint} has inverted limits ({lower} > {upper})")]
    InvertedLimits { joint: String, lower: f64, upper: f64 },

    #[error("joint {joint} has a non-finite limit")]
    NonFiniteLimit { joint: String },

    #[error("joint {joint} has a zero-length axis")]
    ZeroAxis { joint: String },

    #[error("joint {joint} rest position {rest} lies outside [{lower}, {upper}]")]
    RestOutOfLimits {
        joint: String,
        rest: f64,
        lower: f64,
        upper: f64,
    },

    #[error("group {group} references unknown joint {joint}")]
    UnknownJoint { group: String, joint: String },

    #[error("group {0} has no joints")]
    EmptyGroup(String),

    #[error("duplicate group name: {0}")]
    DuplicateGroup(String),

    #[error("group {group}: joint {joint} is not attached to {expected_parent}")]
    BrokenChain {
        group: String,
        joint: String,
        expected_parent: String,
    },

    #[error("joint {joint} hangs from unknown link {parent} (root is {root})")]
    UnresolvedParent {
        joint: String,
        parent: String,
        root: String,
    },

    #[error("action group {group} references unactuated joint {joint}")]
    UnactuatedActionJoint { group: String, joint: String },

    #[error("joint {joint} appears in more than one action group")]
    SharedActionJoint { joint: String },
}

/// Failures of forward kinematics queries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KinematicsError {
    #[error("expected {expected} joint angles, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("angle {value} for joint {joint} lies outside [{lower}, {upper}]")]
    OutOfLimits {
        joint: String,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("unknown manipulator group: {0}")]
    UnknownGroup(String),
}

/// Inverse kinematics did not converge within its iteration budget.
///
/// This is an expected outcome and callers pick their own fallback.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "no solution after {iterations} iterations \
     (position error {position_error:.4} m, orientation error {orientation_error:.4} rad)"
)]
pub struct Infeasible {
    pub iterations: usize,
    pub position_error: f64,
    pub orientation_error: f64,
}

/// Failure reported by the external simulator collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("simulator fault: {message}")]
pub struct SimulatorFault {
    pub message: String,
}

impl SimulatorFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A (task, embodiment) pairing that cannot be instantiated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error("malformed task name {name}: {reason}")]
    MalformedTaskName { name: String, reason: String },

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("unknown embodiment variant: {0}")]
    UnknownEmbodiment(String),

    #[error("task {task} is registered for family {expected}, not {got}")]
    FamilyMismatch {
        task: String,
        expected: String,
        got: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Kinematics(#[from] KinematicsError),

    #[error(
        "layout for {task} cannot be adapted to {embodiment}: \
         infeasible {directives:?}, colliding {collisions:?}"
    )]
    InfeasibleLayout {
        task: String,
        embodiment: String,
        directives: Vec<String>,
        collisions: Vec<(String, String)>,
    },

    #[error(transparent)]
    Simulator(#[from] SimulatorFault),
}

/// A malformed action for the active embodiment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("action is tagged for {got}, environment runs {expected}")]
    EmbodimentMismatch { expected: String, got: String },

    #[error("unknown action group: {0}")]
    UnknownGroup(String),

    #[error("missing action group: {0}")]
    MissingGroup(String),

    #[error("action group {group} expects {expected} values, got {got}")]
    Dimension {
        group: String,
        expected: usize,
        got: usize,
    },

    #[error("action group {group} contains a non-finite value")]
    NonFinite { group: String },
}

/// Misuse of an environment instance or a fault underneath it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        state: &'static str,
        operation: &'static str,
    },

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Simulator(#[from] SimulatorFault),
}

/// The policy service rejected or failed a decision request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("policy serves {served}, request is tagged {requested}")]
    EmbodimentMismatch { served: String, requested: String },

    #[error("policy transport error: {0}")]
    Transport(String),

    #[error("malformed policy response: {0}")]
    Decode(String),
}

/// The policy did not answer within the decision budget.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("worker {worker}: policy decision timed out after {timeout_ms} ms")]
pub struct DecisionTimeout {
    pub worker: usize,
    pub timeout_ms: u64,
}

/// Fatal outcomes of a batched evaluation run.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid evaluation config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error("all {} workers failed", faults.len())]
    BatchExhausted {
        faults: Vec<crate::eval::WorkerFault>,
    },
}
