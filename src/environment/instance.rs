use std::sync::Arc;

use crate::environment::simulator::Simulator;
use crate::environment::{
    Action, ActionSchema, Environment, EpisodeState, Observation, Spec, Step, StepInfo,
    TerminationReason,
};
use crate::error::EnvError;
use crate::layout::AdaptedSceneLayout;
use crate::task::SuccessPredicate;
use crate::workspace::Workspace;

/// One simulator session bound to an adapted layout.
///
/// `Uninitialized -> Ready -> Running -> Terminated`, with `reset` the only
/// way out of `Terminated`. Closing is idempotent and happens on drop.
pub struct EnvironmentInstance {
    env_name: String,
    workspace: Arc<Workspace>,
    layout: AdaptedSceneLayout,
    schema: ActionSchema,
    success: Arc<dyn SuccessPredicate>,
    simulator: Box<dyn Simulator>,
    max_episode_steps: u32,
    state: EpisodeState,
    steps: u32,
    last_observation: Option<Observation>,
}

impl EnvironmentInstance {
    pub(crate) fn new(
        env_name: String,
        workspace: Arc<Workspace>,
        layout: AdaptedSceneLayout,
        success: Arc<dyn SuccessPredicate>,
        simulator: Box<dyn Simulator>,
        max_episode_steps: u32,
    ) -> Self {
        let schema = ActionSchema::from_descriptor(workspace.descriptor());
        Self {
            env_name,
            workspace,
            layout,
            schema,
            success,
            simulator,
            max_episode_steps,
            state: EpisodeState::Uninitialized,
            steps: 0,
            last_observation: None,
        }
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn embodiment_tag(&self) -> &str {
        self.schema.tag()
    }

    pub fn schema(&self) -> &ActionSchema {
        &self.schema
    }

    pub fn layout(&self) -> &AdaptedSceneLayout {
        &self.layout
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Most recent observation of the current episode.
    pub fn observe(&self) -> Option<&Observation> {
        self.last_observation.as_ref()
    }
}

impl Environment for EnvironmentInstance {
    fn action_spec(&self) -> Spec {
        let bound = self.simulator.max_joint_delta();
        Spec {
            min: -bound,
            max: bound,
            shape: self.schema.dimension(),
        }
    }

    fn observation_spec(&self) -> Spec {
        Spec {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            shape: self.workspace.descriptor().actuated_joint_count(),
        }
    }

    fn reset(&mut self, seed: u64) -> Result<Observation, EnvError> {
        if self.state == EpisodeState::Closed {
            return Err(EnvError::InvalidTransition {
                state: self.state.name(),
                operation: "reset",
            });
        }

        let observation = self.simulator.reset(seed)?;
        self.steps = 0;
        self.state = EpisodeState::Ready;
        self.last_observation = Some(observation.clone());

        tracing::debug!(env_name = self.env_name.as_str(), seed, "environment reset");
        Ok(observation)
    }

    fn step(&mut self, action: &Action) -> Result<Step, EnvError> {
        if !matches!(self.state, EpisodeState::Ready | EpisodeState::Running) {
            return Err(EnvError::InvalidTransition {
                state: self.state.name(),
                operation: "step",
            });
        }

        self.schema.validate(action)?;
        let observation = self.simulator.step(action)?;
        self.steps += 1;

        let success = self.success.is_success(&observation);
        let termination = if success {
            Some(TerminationReason::Success)
        } else if self.steps >= self.max_episode_steps {
            Some(TerminationReason::StepBudget)
        } else {
            None
        };

        let done = termination.is_some();
        self.state = if done {
            EpisodeState::Terminated
        } else {
            EpisodeState::Running
        };
        self.last_observation = Some(observation.clone());

        Ok(Step {
            observation,
            done,
            info: StepInfo {
                success,
                steps: self.steps,
                termination,
            },
        })
    }

    fn close(&mut self) {
        if self.state == EpisodeState::Closed {
            return;
        }
        self.simulator.close();
        self.state = EpisodeState::Closed;
        self.last_observation = None;
        tracing::info!(env_name = self.env_name.as_str(), "environment closed");
    }
}

impl Drop for EnvironmentInstance {
    fn drop(&mut self) {
        self.close();
    }
}
