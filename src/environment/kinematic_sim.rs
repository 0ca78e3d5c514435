extern crate rand;
extern crate rand_distr;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use nalgebra::Point3;
use rand::distributions::Uniform;
use rand::prelude::{Distribution, SeedableRng, StdRng};
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::environment::simulator::{Simulator, SimulatorBackend};
use crate::environment::{Action, ObjectObservation, Observation};
use crate::error::SimulatorFault;
use crate::layout::{AdaptedSceneLayout, Role};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicSimConfig {
    /// Half-width of the uniform noise added to rest joint positions.
    pub reset_noise_scale: f64,
    /// Standard deviation of the horizontal object jitter at reset, metres.
    pub object_jitter: f64,
    /// Largest joint change applied per step, radians.
    pub max_joint_delta: f64,
    pub grasp_radius: f64,
    /// Normalised finger closure at which a hand holds an object.
    pub grasp_closure: f64,
}

impl Default for KinematicSimConfig {
    fn default() -> Self {
        Self {
            reset_noise_scale: 0.01,
            object_jitter: 0.005,
            max_joint_delta: 0.05,
            grasp_radius: 0.08,
            grasp_closure: 0.3,
        }
    }
}

/// Opens [`KinematicSim`] sessions.
#[derive(Debug, Clone, Default)]
pub struct KinematicBackend {
    pub config: KinematicSimConfig,
}

impl KinematicBackend {
    pub fn new(config: KinematicSimConfig) -> Self {
        Self { config }
    }
}

impl SimulatorBackend for KinematicBackend {
    fn name(&self) -> &'static str {
        "kinematic"
    }

    fn open(
        &self,
        workspace: Arc<Workspace>,
        layout: &AdaptedSceneLayout,
    ) -> Result<Box<dyn Simulator>, SimulatorFault> {
        KinematicSim::new(workspace, layout, self.config.clone())
            .map(|sim| Box::new(sim) as Box<dyn Simulator>)
    }
}

#[derive(Debug, Clone)]
struct SceneObject {
    id: String,
    initial: Point3<f64>,
    graspable: bool,
}

/// Pure-kinematics stand-in for a physics simulator.
///
/// Joint positions integrate the action deltas within limits, hands carry
/// graspable objects while closed, and released objects stay where they
/// were let go.
pub struct KinematicSim {
    workspace: Arc<Workspace>,
    config: KinematicSimConfig,
    joint_index: HashMap<String, usize>,
    /// Per manipulator group: descriptor indices of its chain joints.
    chain_joints: BTreeMap<String, Vec<usize>>,
    /// Per manipulator group: the action group driving its hand.
    hands: BTreeMap<String, String>,
    scene: Vec<SceneObject>,
    qpos: Vec<f64>,
    objects: BTreeMap<String, ObjectObservation>,
    step: u32,
    closed: bool,
}

impl KinematicSim {
    pub fn new(
        workspace: Arc<Workspace>,
        layout: &AdaptedSceneLayout,
        config: KinematicSimConfig,
    ) -> Result<Self, SimulatorFault> {
        let descriptor = workspace.descriptor();
        if layout.embodiment != descriptor.id() {
            return Err(SimulatorFault::new(format!(
                "layout adapted for {} cannot load on {}",
                layout.embodiment,
                descriptor.id()
            )));
        }

        let joint_index: HashMap<String, usize> = descriptor
            .joints()
            .iter()
            .enumerate()
            .map(|(i, j)| (j.name.clone(), i))
            .collect();

        let mut chain_joints = BTreeMap::new();
        for (group, chain) in workspace.chains() {
            let indices = chain
                .links()
                .iter()
                .map(|link| {
                    joint_index.get(&link.joint).copied().ok_or_else(|| {
                        SimulatorFault::new(format!(
                            "chain joint {} missing from model",
                            link.joint
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            chain_joints.insert(group.clone(), indices);
        }

        let hands = descriptor
            .manipulator_groups()
            .iter()
            .filter_map(|g| {
                g.end_effector
                    .hand
                    .as_ref()
                    .filter(|hand| descriptor.action_groups().iter().any(|a| &a.name == *hand))
                    .map(|hand| (g.name.clone(), hand.clone()))
            })
            .collect();

        let scene = layout
            .directives
            .iter()
            .map(|d| SceneObject {
                id: d.directive.object_id.clone(),
                initial: Point3::from(d.adapted_pose.translation.vector),
                graspable: d.directive.role == Role::Source,
            })
            .collect();

        let qpos = descriptor.joints().iter().map(|j| j.rest).collect();

        Ok(Self {
            workspace,
            config,
            joint_index,
            chain_joints,
            hands,
            scene,
            qpos,
            objects: BTreeMap::new(),
            step: 0,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), SimulatorFault> {
        if self.closed {
            return Err(SimulatorFault::new("session already closed"));
        }
        Ok(())
    }

    /// Mean finger excursion from rest, normalised to `[0, 1]`.
    fn closure(&self, hand: &str) -> f64 {
        let descriptor = self.workspace.descriptor();
        let Some(group) = descriptor.action_groups().iter().find(|g| g.name == hand) else {
            return 0.0;
        };

        let total: f64 = group
            .joints
            .iter()
            .filter_map(|name| {
                let joint = descriptor.joint(name)?;
                let value = self.qpos[*self.joint_index.get(name)?];
                let span = (joint.upper_limit - joint.rest)
                    .abs()
                    .max((joint.rest - joint.lower_limit).abs());
                (span > 0.0).then(|| (value - joint.rest).abs() / span)
            })
            .sum();

        total / group.joints.len().max(1) as f64
    }

    fn observe(&self) -> Result<Observation, SimulatorFault> {
        let descriptor = self.workspace.descriptor();

        let joint_positions = descriptor
            .action_groups()
            .iter()
            .map(|group| {
                let values = group
                    .joints
                    .iter()
                    .filter_map(|name| self.joint_index.get(name).map(|&i| self.qpos[i]))
                    .collect();
                (group.name.clone(), values)
            })
            .collect();

        let mut end_effectors = BTreeMap::new();
        for (group, chain) in self.workspace.chains() {
            let angles = self.chain_angles(group);
            let pose = chain
                .forward(&angles)
                .map_err(|e| SimulatorFault::new(format!("forward kinematics failed: {}", e)))?;
            end_effectors.insert(group.clone(), pose);
        }

        Ok(Observation {
            step: self.step,
            joint_positions,
            end_effectors,
            objects: self.objects.clone(),
        })
    }

    fn chain_angles(&self, group: &str) -> Vec<f64> {
        self.chain_joints
            .get(group)
            .map(|indices| indices.iter().map(|&i| self.qpos[i]).collect())
            .unwrap_or_default()
    }

    fn update_grasps(&mut self, end_effectors: &BTreeMap<String, crate::kinematics::Pose>) {
        for (group, hand) in &self.hands {
            let Some(palm) = end_effectors.get(group) else {
                continue;
            };
            let palm = Point3::from(palm.translation.vector);
            let closed = self.closure(hand) >= self.config.grasp_closure;

            let held = self
                .objects
                .iter()
                .find(|(_, o)| o.held_by.as_deref() == Some(hand.as_str()))
                .map(|(id, _)| id.clone());

            match (closed, held) {
                (true, Some(id)) => {
                    if let Some(object) = self.objects.get_mut(&id) {
                        object.position = palm;
                    }
                }
                (false, Some(id)) => {
                    if let Some(object) = self.objects.get_mut(&id) {
                        object.held_by = None;
                    }
                    tracing::debug!(
                        object_id = id.as_str(),
                        hand = hand.as_str(),
                        "released object"
                    );
                }
                (true, None) => {
                    let graspable = self
                        .scene
                        .iter()
                        .filter(|s| s.graspable)
                        .filter_map(|s| self.objects.get(&s.id).map(|o| (s.id.as_str(), o)))
                        .filter(|(_, o)| o.held_by.is_none())
                        .map(|(id, o)| (id, (o.position - palm).norm()))
                        .filter(|(_, distance)| *distance <= self.config.grasp_radius)
                        .min_by(|a, b| a.1.total_cmp(&b.1))
                        .map(|(id, _)| id.to_string());

                    if let Some(id) = graspable {
                        if let Some(object) = self.objects.get_mut(&id) {
                            object.held_by = Some(hand.clone());
                            object.position = palm;
                        }
                        tracing::debug!(
                            object_id = id.as_str(),
                            hand = hand.as_str(),
                            "grasped object"
                        );
                    }
                }
                (false, None) => {}
            }
        }
    }
}

impl Simulator for KinematicSim {
    fn reset(&mut self, seed: u64) -> Result<Observation, SimulatorFault> {
        self.ensure_open()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let noise = self.config.reset_noise_scale.abs();
        let uniform = Uniform::new_inclusive(-noise, noise);
        let jitter = Normal::new(0.0, self.config.object_jitter.abs())
            .map_err(|e| SimulatorFault::new(format!("invalid object jitter: {}", e)))?;

        self.qpos = self
            .workspace
            .descriptor()
            .joints()
            .iter()
            .map(|joint| {
                if joint.is_actuated {
                    let noisy = joint.rest + uniform.sample(&mut rng);
                    noisy.clamp(joint.lower_limit, joint.upper_limit)
                } else {
                    joint.rest
                }
            })
            .collect();

        self.objects = self
            .scene
            .iter()
            .map(|object| {
                let mut position = object.initial;
                if object.graspable {
                    position.x += jitter.sample(&mut rng);
                    position.y += jitter.sample(&mut rng);
                }
                (
                    object.id.clone(),
                    ObjectObservation {
                        position,
                        held_by: None,
                    },
                )
            })
            .collect();

        self.step = 0;
        self.observe()
    }

    fn step(&mut self, action: &Action) -> Result<Observation, SimulatorFault> {
        self.ensure_open()?;

        let limit = self.max_joint_delta();
        for group in self.workspace.descriptor().action_groups() {
            let Some(deltas) = action.groups.get(&group.name) else {
                continue;
            };
            for (name, delta) in group.joints.iter().zip(deltas) {
                let (Some(&index), Some((lower, upper))) = (
                    self.joint_index.get(name),
                    self.workspace.descriptor().limits_for(name),
                ) else {
                    continue;
                };
                let moved = self.qpos[index] + delta.clamp(-limit, limit);
                self.qpos[index] = moved.clamp(lower, upper);
            }
        }

        self.step += 1;

        let observation = self.observe()?;
        self.update_grasps(&observation.end_effectors);

        Ok(Observation {
            objects: self.objects.clone(),
            ..observation
        })
    }

    fn max_joint_delta(&self) -> f64 {
        self.config.max_joint_delta.abs()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
