use std::sync::Arc;

use crate::environment::{Action, Observation};
use crate::error::SimulatorFault;
use crate::layout::AdaptedSceneLayout;
use crate::workspace::Workspace;

/// One live simulator session. Owned by exactly one environment instance.
pub trait Simulator: Send {
    /// Reinitialise robot and objects from the loaded layout.
    fn reset(&mut self, seed: u64) -> Result<Observation, SimulatorFault>;

    fn step(&mut self, action: &Action) -> Result<Observation, SimulatorFault>;

    /// Largest per-step joint change the session applies, radians.
    fn max_joint_delta(&self) -> f64 {
        f64::INFINITY
    }

    fn close(&mut self);
}

/// Opens simulator sessions for an embodiment and adapted layout.
pub trait SimulatorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(
        &self,
        workspace: Arc<Workspace>,
        layout: &AdaptedSceneLayout,
    ) -> Result<Box<dyn Simulator>, SimulatorFault>;
}
