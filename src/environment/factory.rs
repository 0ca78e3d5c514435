use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embodiment::{self, Embodiment};
use crate::environment::instance::EnvironmentInstance;
use crate::environment::simulator::SimulatorBackend;
use crate::error::ConstructionError;
use crate::layout::{AdaptedSceneLayout, AdapterConfig, SceneLayoutAdapter};
use crate::task::{TaskDefinition, TaskId, TaskRegistry};
use crate::workspace::{ReachabilityConfig, Workspace};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    pub max_episode_steps: u32,
    pub reachability: ReachabilityConfig,
    pub adapter: AdapterConfig,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            max_episode_steps: 400,
            reachability: ReachabilityConfig::default(),
            adapter: AdapterConfig::default(),
        }
    }
}

/// Everything an environment needs apart from its simulator session.
///
/// Built once per (task, embodiment) pair; instances share the workspace
/// and each take their own copy of the layout.
#[derive(Debug, Clone)]
pub struct PreparedTask {
    pub env_name: String,
    pub workspace: Arc<Workspace>,
    pub task: TaskDefinition,
    pub layout: AdaptedSceneLayout,
}

pub struct EnvironmentFactory {
    registry: Arc<dyn TaskRegistry>,
    backend: Arc<dyn SimulatorBackend>,
    config: FactoryConfig,
}

impl EnvironmentFactory {
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        backend: Arc<dyn SimulatorBackend>,
        config: FactoryConfig,
    ) -> Self {
        Self {
            registry,
            backend,
            config,
        }
    }

    /// Resolve a `<namespace>/<Task>_<Variant>_Env` name and adapt its layout.
    pub fn prepare(&self, env_name: &str) -> Result<PreparedTask, ConstructionError> {
        let id = TaskId::parse(env_name)?;
        let embodiment = embodiment::lookup(&id.variant)
            .ok_or_else(|| ConstructionError::UnknownEmbodiment(id.variant.clone()))?;

        if embodiment.family() != id.family {
            return Err(ConstructionError::FamilyMismatch {
                task: env_name.to_string(),
                expected: id.family.clone(),
                got: embodiment.family().to_string(),
            });
        }

        let task = self.registry.resolve(&id)?;
        let mut prepared = self.prepare_with(embodiment.as_ref(), task)?;
        prepared.env_name = id.env_name();
        Ok(prepared)
    }

    /// Adapt `task` to `embodiment` without going through a task name.
    pub fn prepare_with(
        &self,
        embodiment: &dyn Embodiment,
        task: TaskDefinition,
    ) -> Result<PreparedTask, ConstructionError> {
        let descriptor = embodiment.describe()?;
        let workspace = Arc::new(Workspace::build(descriptor, &self.config.reachability)?);

        let adapter = SceneLayoutAdapter::new(self.config.adapter.clone());
        let layout = adapter.adapt(
            &task.template,
            workspace.envelopes(),
            workspace.descriptor().id(),
        );

        if !layout.layout_valid {
            return Err(ConstructionError::InfeasibleLayout {
                task: task.name.clone(),
                embodiment: layout.embodiment.clone(),
                directives: layout.invalid_directives(),
                collisions: layout.colliding_pairs(),
            });
        }

        tracing::info!(
            task = task.name.as_str(),
            embodiment = layout.embodiment.as_str(),
            objects = layout.directives.len(),
            clamped = layout.directives.iter().filter(|d| d.displacement > 0.0).count(),
            "adapted task layout"
        );

        Ok(PreparedTask {
            env_name: format!(
                "{}_unified/{}_{}_Env",
                embodiment.family(),
                task.name,
                embodiment.variant_name()
            ),
            workspace,
            task,
            layout,
        })
    }

    /// Open a fresh simulator session for a prepared task.
    pub fn instantiate(
        &self,
        prepared: &PreparedTask,
    ) -> Result<EnvironmentInstance, ConstructionError> {
        let simulator = self
            .backend
            .open(Arc::clone(&prepared.workspace), &prepared.layout)?;

        tracing::info!(
            env_name = prepared.env_name.as_str(),
            backend = self.backend.name(),
            "environment built"
        );

        Ok(EnvironmentInstance::new(
            prepared.env_name.clone(),
            Arc::clone(&prepared.workspace),
            prepared.layout.clone(),
            Arc::clone(&prepared.task.success),
            simulator,
            self.config.max_episode_steps,
        ))
    }

    pub fn build(
        &self,
        embodiment: &dyn Embodiment,
        task: TaskDefinition,
    ) -> Result<EnvironmentInstance, ConstructionError> {
        let prepared = self.prepare_with(embodiment, task)?;
        self.instantiate(&prepared)
    }

    pub fn make(&self, env_name: &str) -> Result<EnvironmentInstance, ConstructionError> {
        let prepared = self.prepare(env_name)?;
        self.instantiate(&prepared)
    }
}
