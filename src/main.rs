#![allow(nonstandard_style)]
#![allow(dead_code)]

#[macro_use]
extern crate lazy_static;

mod config;
mod embodiment;
mod environment;
mod error;
mod eval;
mod kinematics;
mod layout;
mod task;
mod tests;
mod workspace;

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use nalgebra::UnitQuaternion;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::config::EvalConfig;
use crate::environment::{ActionSchema, EnvironmentFactory, KinematicBackend};
use crate::eval::{
    BatchedEvaluator, HttpPolicy, NeutralPolicy, PlaybackPolicy, PolicyClient, StopSignal,
};
use crate::kinematics::{IkOptions, Pose};
use crate::task::{BuiltinTasks, TaskId, TaskRegistry};

#[derive(Parser)]
#[command(name = "tabletop", about = "Run tabletop manipulation tasks on any registered humanoid")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a policy on one task over parallel environments.
    Eval(EvalArgs),
    /// Print the embodiment, its envelopes and the adapted layout for a task.
    Inspect { env_name: String },
    /// List registered embodiments and tasks.
    List,
}

#[derive(Args)]
struct EvalArgs {
    /// JSON file with an evaluation config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    env_name: Option<String>,
    #[arg(long)]
    max_episode_steps: Option<u32>,
    #[arg(long)]
    n_envs: Option<usize>,
    #[arg(long)]
    n_episodes: Option<usize>,
    #[arg(long)]
    video_dir: Option<PathBuf>,
    #[arg(long)]
    decision_timeout_ms: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Inference service endpoint; falls back to POLICY_URL.
    #[arg(long)]
    policy_url: Option<String>,
    /// Replay a recorded action file instead of querying a service.
    #[arg(long, conflicts_with = "policy_url")]
    playback: Option<PathBuf>,
    /// Write the JSON report here instead of stdout.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl EvalArgs {
    fn resolve_config(&self) -> anyhow::Result<EvalConfig> {
        let mut config = match &self.config {
            Some(path) => EvalConfig::from_file(path)?,
            None => EvalConfig::default(),
        };

        if let Some(env_name) = &self.env_name {
            config.env_name = env_name.clone();
        }
        config.max_episode_steps = self.max_episode_steps.unwrap_or(config.max_episode_steps);
        config.n_envs = self.n_envs.unwrap_or(config.n_envs);
        config.n_episodes = self.n_episodes.unwrap_or(config.n_episodes);
        config.decision_timeout_ms = self.decision_timeout_ms.unwrap_or(config.decision_timeout_ms);
        config.seed = self.seed.unwrap_or(config.seed);
        if self.video_dir.is_some() {
            config.video_dir = self.video_dir.clone();
        }

        Ok(config)
    }
}

fn action_schema(env_name: &str) -> anyhow::Result<ActionSchema> {
    let id = TaskId::parse(env_name)?;
    let embodiment = embodiment::lookup(&id.variant)
        .with_context(|| format!("unknown embodiment variant {}", id.variant))?;
    Ok(ActionSchema::from_descriptor(&embodiment.describe()?))
}

fn policy_for(args: &EvalArgs, config: &EvalConfig) -> anyhow::Result<Arc<dyn PolicyClient>> {
    let schema = action_schema(&config.env_name)?;

    if let Some(path) = &args.playback {
        let playback = PlaybackPolicy::from_file(path, schema)?;
        tracing::info!(
            path = %path.display(),
            frames = playback.len(),
            "replaying recorded actions"
        );
        return Ok(Arc::new(playback));
    }

    match args.policy_url.clone().or_else(|| env::var("POLICY_URL").ok()) {
        Some(url) => {
            tracing::info!(url = url.as_str(), "querying policy service");
            Ok(Arc::new(HttpPolicy::new(&url, config.decision_timeout())))
        }
        None => {
            tracing::warn!("no policy configured, running the neutral policy");
            Ok(Arc::new(NeutralPolicy::new(schema)))
        }
    }
}

fn eval(args: EvalArgs) -> anyhow::Result<()> {
    let config = args.resolve_config()?;
    let policy = policy_for(&args, &config)?;

    let factory = EnvironmentFactory::new(
        Arc::new(BuiltinTasks),
        Arc::new(KinematicBackend::new(config.simulator.clone())),
        config.factory_config(),
    );

    let evaluator = BatchedEvaluator::new(config, factory, policy);
    let report = evaluator.run(&StopSignal::new())?;

    let rendered = serde_json::to_string_pretty(&report)?;
    match &args.report {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("writing report {}", path.display()))?,
        None => println!("{}", rendered),
    }

    Ok(())
}

fn inspect(env_name: &str) -> anyhow::Result<()> {
    let config = EvalConfig::default();
    let factory = EnvironmentFactory::new(
        Arc::new(BuiltinTasks),
        Arc::new(KinematicBackend::default()),
        config.factory_config(),
    );
    let prepared = factory.prepare(env_name)?;
    let workspace = &prepared.workspace;
    let descriptor = workspace.descriptor();

    let envelopes = workspace
        .envelopes()
        .iter()
        .map(|(group, envelope)| {
            json!({
                "group": group,
                "samples": envelope.samples().len(),
                "occupied_bins": envelope.occupied_bins(),
                "max_reach": envelope.max_reach(),
                "center": envelope.center().coords.as_slice(),
                "centroid": envelope.centroid().coords.as_slice(),
            })
        })
        .collect::<Vec<_>>();

    let ik = IkOptions {
        match_orientation: false,
        ..IkOptions::default()
    };
    let objects = prepared
        .layout
        .directives
        .iter()
        .map(|d| {
            let reachable = d.group.as_deref().and_then(|g| workspace.chain(g)).map(|chain| {
                let target =
                    Pose::from_parts(d.adapted_pose.translation, UnitQuaternion::identity());
                chain.solve(&target, &ik).is_ok()
            });
            json!({
                "object_id": d.directive.object_id,
                "role": d.directive.role,
                "group": d.group,
                "reference": d.directive.reference_pose.translation.vector.as_slice(),
                "adapted": d.adapted_pose.translation.vector.as_slice(),
                "displacement": d.displacement,
                "perturbed": d.perturbed,
                "ik_reachable": reachable,
            })
        })
        .collect::<Vec<_>>();

    let action_groups = descriptor
        .action_groups()
        .iter()
        .map(|g| (g.name.clone(), g.joints.len()))
        .collect::<BTreeMap<_, _>>();

    let summary = json!({
        "env_name": prepared.env_name,
        "embodiment": descriptor.id(),
        "family": descriptor.family(),
        "joints": descriptor.joint_count(),
        "actuated": descriptor.actuated_joint_count(),
        "action_groups": action_groups,
        "assets": descriptor.assets(),
        "envelopes": envelopes,
        "objects": objects,
    });

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn list() {
    println!("embodiments:");
    for name in embodiment::registered() {
        println!("  {}", name);
    }
    println!("tasks:");
    for task in BuiltinTasks.tasks() {
        println!("  {}", task);
    }
}

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match Cli::parse().command {
        Command::Eval(args) => eval(args),
        Command::Inspect { env_name } => inspect(&env_name),
        Command::List => {
            list();
            Ok(())
        }
    }
}
