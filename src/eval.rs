pub mod decision;
pub mod driver;
pub mod policy;
pub mod recorder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::environment::TerminationReason;

pub use decision::{Decision, DecisionChannel};
pub use driver::BatchedEvaluator;
pub use policy::{
    HttpPolicy, NeutralPolicy, PlaybackPolicy, PolicyClient, PolicyRequest, PolicyResponse,
};
pub use recorder::EpisodeRecorder;

/// Shared cancellation flag. Raising it lets in-flight steps finish and
/// stops every worker from starting new work.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeResult {
    pub success: bool,
    pub steps_taken: u32,
    pub termination: Option<TerminationReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub worker: usize,
    /// Position of this episode within its worker's sequence.
    pub ordinal: usize,
    pub episode: usize,
    pub seed: u64,
    /// Policy decisions replaced by the neutral action.
    pub timeouts: usize,
    pub result: EpisodeResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Simulator,
    Policy,
    Action,
    Panic,
}

/// A worker slot retired by an irrecoverable error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFault {
    pub worker: usize,
    pub episode: Option<usize>,
    pub kind: FaultKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub env_name: String,
    pub embodiment: String,
    pub n_envs: usize,
    pub requested_episodes: usize,
    pub completed: usize,
    pub successes: usize,
    /// Over completed episodes only; zero when nothing completed.
    pub success_rate: f64,
    pub cancelled: usize,
    pub timeouts: usize,
    pub episodes: Vec<EpisodeRecord>,
    pub faults: Vec<WorkerFault>,
}
