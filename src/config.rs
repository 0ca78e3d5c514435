use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::environment::{FactoryConfig, KinematicSimConfig};
use crate::error::EvalError;
use crate::layout::AdapterConfig;
use crate::workspace::ReachabilityConfig;

pub const DEFAULT_ENV_NAME: &str = "g1_unified/EvalPnPAppleToPlate_G1ArmsAndWaistDex31Hands_Env";

/// Evaluation surface plus the tunables of every stage underneath it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub env_name: String,
    pub max_episode_steps: u32,
    pub n_envs: usize,
    pub n_episodes: usize,
    pub video_dir: Option<PathBuf>,
    pub decision_timeout_ms: u64,
    /// Episode `k` resets with `seed + k`.
    pub seed: u64,
    pub reachability: ReachabilityConfig,
    pub adapter: AdapterConfig,
    pub simulator: KinematicSimConfig,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            env_name: DEFAULT_ENV_NAME.to_string(),
            max_episode_steps: 400,
            n_envs: 1,
            n_episodes: 10,
            video_dir: None,
            decision_timeout_ms: 2000,
            seed: 0,
            reachability: ReachabilityConfig::default(),
            adapter: AdapterConfig::default(),
            simulator: KinematicSimConfig::default(),
        }
    }
}

impl EvalConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    pub fn factory_config(&self) -> FactoryConfig {
        FactoryConfig {
            max_episode_steps: self.max_episode_steps,
            reachability: self.reachability.clone(),
            adapter: self.adapter.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), EvalError> {
        if self.n_envs == 0 {
            return Err(EvalError::InvalidConfig("n_envs must be at least 1".to_string()));
        }
        if self.max_episode_steps == 0 {
            return Err(EvalError::InvalidConfig(
                "max_episode_steps must be at least 1".to_string(),
            ));
        }
        if self.decision_timeout_ms == 0 {
            return Err(EvalError::InvalidConfig(
                "decision_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
