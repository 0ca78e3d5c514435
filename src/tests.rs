#![cfg(test)]

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use nalgebra::{Point3, Translation3, UnitQuaternion, Vector3};
use proptest::prelude::*;

use crate::config::EvalConfig;
use crate::embodiment::{
    self, ActionGroup, Embodiment, EmbodimentDescriptor, EmbodimentSpec, EndEffector, HandModel,
    JointSpec, ManipulatorGroup,
};
use crate::environment::kinematic_sim::KinematicSim;
use crate::environment::{
    Action, ActionSchema, Environment, EnvironmentFactory, EpisodeState, FactoryConfig,
    KinematicBackend, KinematicSimConfig, ObjectObservation, Observation, Simulator,
    SimulatorBackend, TerminationReason,
};
use crate::error::{
    ConstructionError, EnvError, EvalError, PolicyError, SimulatorFault, ValidationError,
};
use crate::eval::{
    BatchedEvaluator, FaultKind, NeutralPolicy, PolicyClient, PolicyRequest, StopSignal,
};
use crate::kinematics::Pose;
use crate::layout::{
    AdaptedDirective, AdaptedSceneLayout, PlacementDirective, Role, SceneLayoutAdapter,
    SceneLayoutTemplate,
};
use crate::task::{ObjectNear, SuccessPredicate, TaskDefinition, TaskId, TaskRegistry};
use crate::workspace::{ReachabilityConfig, ReachabilityEnvelope, Workspace};

fn at(x: f64, y: f64, z: f64) -> Pose {
    Pose::from_parts(Translation3::new(x, y, z), UnitQuaternion::identity())
}

fn revolute(name: &str, parent: &str, child: &str, origin: Pose, limits: (f64, f64)) -> JointSpec {
    JointSpec {
        name: name.to_string(),
        parent_link: parent.to_string(),
        child_link: child.to_string(),
        origin,
        axis: Vector3::z(),
        lower_limit: limits.0,
        upper_limit: limits.1,
        is_actuated: true,
        rest: 0.0,
    }
}

fn planar_spec() -> EmbodimentSpec {
    EmbodimentSpec {
        id: "planar".to_string(),
        family: "test".to_string(),
        base_offset: Pose::identity(),
        floating_base: false,
        joints: vec![
            revolute("shoulder", "base", "upper_link", Pose::identity(), (-PI, PI)),
            revolute("elbow", "upper_link", "fore_link", at(0.3, 0.0, 0.0), (-2.5, 2.5)),
        ],
        manipulator_groups: vec![ManipulatorGroup {
            name: "arm".to_string(),
            joints: vec!["shoulder".to_string(), "elbow".to_string()],
            end_effector: EndEffector {
                frame: "palm".to_string(),
                tool_offset: at(0.2, 0.0, 0.0),
                hand: None,
            },
        }],
        action_groups: vec![ActionGroup {
            name: "arm".to_string(),
            joints: vec!["shoulder".to_string(), "elbow".to_string()],
        }],
        assets: Vec::new(),
    }
}

/// Two-link planar arm in the xy plane: 0.3 m upper link, 0.2 m to the palm.
pub(crate) fn planar_arm() -> EmbodimentDescriptor {
    EmbodimentDescriptor::new(planar_spec()).unwrap()
}

/// The planar arm with a one-joint gripper driven by the `gripper` group.
pub(crate) fn planar_gripper() -> EmbodimentDescriptor {
    let mut spec = planar_spec();
    spec.id = "planar_gripper".to_string();
    spec.joints
        .push(revolute("finger", "fore_link", "finger_link", Pose::identity(), (0.0, 1.0)));
    spec.manipulator_groups[0].end_effector.hand = Some("gripper".to_string());
    spec.action_groups.push(ActionGroup {
        name: "gripper".to_string(),
        joints: vec!["finger".to_string()],
    });
    EmbodimentDescriptor::new(spec).unwrap()
}

struct PlanarRobot;

impl Embodiment for PlanarRobot {
    fn family(&self) -> &'static str {
        "test"
    }

    fn variant_name(&self) -> String {
        "Planar".to_string()
    }

    fn default_hands(&self) -> HandModel {
        HandModel::Inspire
    }

    fn describe(&self) -> Result<EmbodimentDescriptor, ValidationError> {
        Ok(planar_arm())
    }
}

fn sphere() -> BTreeMap<String, ReachabilityEnvelope> {
    [(
        "arm".to_string(),
        ReachabilityEnvelope::spherical(Point3::origin(), 0.5, 24, 12),
    )]
    .into()
}

fn template(min_separation: f64, directives: Vec<PlacementDirective>) -> SceneLayoutTemplate {
    SceneLayoutTemplate {
        task: "Fixture".to_string(),
        reference_embodiment: "reference".to_string(),
        min_separation,
        directives,
    }
}

// Embodiment descriptors

#[test]
fn descriptor_rejects_duplicate_joint() {
    let mut spec = planar_spec();
    spec.joints.push(spec.joints[0].clone());
    assert_eq!(
        EmbodimentDescriptor::new(spec),
        Err(ValidationError::DuplicateJoint("shoulder".to_string()))
    );
}

#[test]
fn descriptor_rejects_inverted_limits_and_zero_axis() {
    let mut spec = planar_spec();
    spec.joints[1].lower_limit = 1.0;
    spec.joints[1].upper_limit = -1.0;
    assert!(matches!(
        EmbodimentDescriptor::new(spec),
        Err(ValidationError::InvertedLimits { .. })
    ));

    let mut spec = planar_spec();
    spec.joints[0].axis = Vector3::zeros();
    assert!(matches!(
        EmbodimentDescriptor::new(spec),
        Err(ValidationError::ZeroAxis { .. })
    ));
}

#[test]
fn descriptor_rejects_disconnected_chain() {
    let mut spec = planar_spec();
    spec.joints[1].parent_link = "nowhere".to_string();
    assert_eq!(
        EmbodimentDescriptor::new(spec),
        Err(ValidationError::BrokenChain {
            group: "arm".to_string(),
            joint: "elbow".to_string(),
            expected_parent: "upper_link".to_string(),
        })
    );
}

#[test]
fn descriptor_rejects_joint_off_the_tree() {
    let mut spec = planar_spec();
    spec.joints
        .push(revolute("wrist", "elsewhere", "wrist_link", Pose::identity(), (-1.0, 1.0)));
    assert_eq!(
        EmbodimentDescriptor::new(spec),
        Err(ValidationError::UnresolvedParent {
            joint: "wrist".to_string(),
            parent: "elsewhere".to_string(),
            root: "base".to_string(),
        })
    );
}

#[test]
fn descriptor_rejects_nan_rest() {
    let mut spec = planar_spec();
    spec.joints[1].rest = f64::NAN;
    assert!(matches!(
        EmbodimentDescriptor::new(spec),
        Err(ValidationError::RestOutOfLimits { .. })
    ));
}

#[test]
fn limits_are_looked_up_by_joint_name() {
    let arm = planar_arm();
    assert_eq!(arm.limits_for("elbow"), Some((-2.5, 2.5)));
    assert_eq!(arm.limits_for("shoulder"), Some((-PI, PI)));
    assert_eq!(arm.limits_for("wrist"), None);
}

#[test]
fn descriptor_rejects_unknown_and_unactuated_group_joints() {
    let mut spec = planar_spec();
    spec.manipulator_groups[0].joints.push("wrist".to_string());
    assert!(matches!(
        EmbodimentDescriptor::new(spec),
        Err(ValidationError::UnknownJoint { .. })
    ));

    let mut spec = planar_spec();
    spec.joints[1].is_actuated = false;
    assert!(matches!(
        EmbodimentDescriptor::new(spec),
        Err(ValidationError::UnactuatedActionJoint { .. })
    ));
}

#[test]
fn every_registered_variant_describes() {
    let names = embodiment::registered();
    assert!(names.contains(&"G1ArmsAndWaistDex31Hands".to_string()));
    assert!(names.contains(&"GR1ArmsOnlyFourierHands".to_string()));

    for name in names {
        let variant = embodiment::lookup(&name).unwrap();
        let descriptor = variant.describe().unwrap();
        assert_eq!(descriptor.id(), name);
        assert_eq!(descriptor.manipulator_groups().len(), 2);
    }
}

#[test]
fn arms_and_waist_freezes_legs_and_head() {
    let descriptor = embodiment::lookup("G1ArmsAndWaistDex31Hands")
        .unwrap()
        .describe()
        .unwrap();

    assert!(!descriptor.floating_base());
    assert!(descriptor.joint("waist_yaw_joint").unwrap().is_actuated);
    assert!(!descriptor.joint("left_hip_pitch_joint").unwrap().is_actuated);
    assert!(!descriptor.joint("right_knee_joint").unwrap().is_actuated);
    assert!(!descriptor.joint("head_yaw_joint").unwrap().is_actuated);

    let groups: Vec<&str> = descriptor.action_groups().iter().map(|g| g.name.as_str()).collect();
    assert_eq!(groups, ["waist", "left_arm", "left_hand", "right_arm", "right_hand"]);
    assert_eq!(descriptor.assets().len(), 3);
}

#[test]
fn arms_start_abducted_with_bent_elbows() {
    let descriptor = embodiment::lookup("G1ArmsOnly").unwrap().describe().unwrap();
    let rest = |name: &str| descriptor.joint(name).unwrap().rest;

    assert_relative_eq!(rest("left_shoulder_roll_joint"), 0.1);
    assert_relative_eq!(rest("right_shoulder_roll_joint"), -0.1);
    assert_relative_eq!(rest("left_elbow_joint"), -0.2);
    assert_relative_eq!(rest("right_elbow_joint"), -0.2);
    assert_relative_eq!(rest("left_shoulder_pitch_joint"), 0.0);
}

#[test]
fn hand_model_changes_tool_offset() {
    let inspire = embodiment::lookup("G1ArmsOnlyInspireHands").unwrap().describe().unwrap();
    let dex = embodiment::lookup("G1ArmsOnlyDex31Hands").unwrap().describe().unwrap();

    let offset = |d: &EmbodimentDescriptor| {
        d.manipulator_group("left_arm").unwrap().end_effector.tool_offset.translation.vector.x
    };
    assert_relative_eq!(offset(&inspire), 0.12);
    assert_relative_eq!(offset(&dex), 0.10);
}

#[test]
fn humanoid_chain_includes_waist() {
    let descriptor = embodiment::lookup("G1ArmsOnly").unwrap().describe().unwrap();
    let chain = crate::kinematics::KinematicChain::build(&descriptor, "right_arm").unwrap();

    assert_eq!(chain.len(), 10);
    assert_eq!(chain.actuated_count(), 7);
    assert!(chain.forward(&chain.rest_angles()).is_ok());
}

// Task names

#[test]
fn task_id_round_trips() {
    let name = "g1_unified/EvalPnPAppleToPlate_G1ArmsAndWaistDex31Hands_Env";
    let id = TaskId::parse(name).unwrap();

    assert_eq!(id.family, "g1");
    assert_eq!(id.task, "EvalPnPAppleToPlate");
    assert_eq!(id.variant, "G1ArmsAndWaistDex31Hands");
    assert_eq!(id.env_name(), name);
}

#[test]
fn task_id_accepts_robocasa_namespace() {
    let name = "robocasa_g1_full_dex31_hands/PnPCupToDrawerClose_G1FullDex31Hands_Env";
    let id = TaskId::parse(name).unwrap();

    assert_eq!(id.family, "g1");
    assert_eq!(id.task, "PnPCupToDrawerClose");
    assert_eq!(id.variant, "G1FullDex31Hands");
    assert_eq!(id.env_name(), name);
}

#[test]
fn task_id_rejects_malformed_names() {
    for name in [
        "EvalPnPAppleToPlate_G1ArmsOnly_Env",
        "g1/EvalPnPAppleToPlate_G1ArmsOnly_Env",
        "g1_unified/EvalPnPAppleToPlate_G1ArmsOnly",
        "g1_unified/G1ArmsOnly_Env",
    ] {
        assert!(
            matches!(TaskId::parse(name), Err(ConstructionError::MalformedTaskName { .. })),
            "{name}"
        );
    }
}

#[test]
fn object_near_requires_release() {
    let predicate = ObjectNear {
        object: "apple".to_string(),
        target: "plate".to_string(),
        radius: 0.1,
        height: 0.1,
    };
    let observation = |held: Option<&str>| Observation {
        objects: [
            (
                "apple".to_string(),
                ObjectObservation {
                    position: Point3::new(0.45, 0.05, 1.0),
                    held_by: held.map(str::to_string),
                },
            ),
            (
                "plate".to_string(),
                ObjectObservation {
                    position: Point3::new(0.4, 0.0, 0.97),
                    held_by: None,
                },
            ),
        ]
        .into(),
        ..Observation::default()
    };

    assert!(predicate.is_success(&observation(None)));
    assert!(!predicate.is_success(&observation(Some("right_hand"))));
    assert!(!predicate.is_success(&Observation::default()));
}

// Scene layout adaptation

#[test]
fn out_of_reach_object_is_clamped_along_its_bearing() {
    let adapter = SceneLayoutAdapter::default();
    let far = PlacementDirective::new("mug", Role::Source, [0.48, 0.64, 0.0], 0.3, 0.04);

    let layout = adapter.adapt(&template(0.02, vec![far.clone()]), &sphere(), "robot");
    let mug = layout.directive("mug").unwrap();

    assert_relative_eq!(
        mug.adapted_pose.translation.vector,
        Vector3::new(0.3, 0.4, 0.0),
        epsilon = 1e-9
    );
    assert_relative_eq!(mug.displacement, 0.3, epsilon = 1e-9);
    assert!(mug.feasible);
    assert!(layout.layout_valid);

    let strict = PlacementDirective { tolerance: 0.29, ..far };
    let layout = adapter.adapt(&template(0.02, vec![strict]), &sphere(), "robot");
    assert!(!layout.layout_valid);
    assert_eq!(layout.invalid_directives(), vec!["mug".to_string()]);
}

#[test]
fn later_directive_is_perturbed_off_a_shared_point() {
    let adapter = SceneLayoutAdapter::default();
    let layout = adapter.adapt(
        &template(
            0.02,
            vec![
                PlacementDirective::new("cup", Role::Source, [0.2, 0.0, 0.0], 0.2, 0.03),
                PlacementDirective::new("saucer", Role::Target, [0.2, 0.0, 0.0], 0.2, 0.03),
            ],
        ),
        &sphere(),
        "robot",
    );

    assert!(layout.layout_valid);
    let cup = layout.directive("cup").unwrap();
    let saucer = layout.directive("saucer").unwrap();
    assert!(!cup.perturbed);
    assert_eq!(cup.adapted_pose, cup.directive.reference_pose);
    assert!(saucer.perturbed);

    let gap = (cup.adapted_pose.translation.vector - saucer.adapted_pose.translation.vector).norm();
    assert!(gap >= 0.08 - 1e-9);
}

#[test]
fn unresolvable_collision_invalidates_layout() {
    let adapter = SceneLayoutAdapter::default();
    let layout = adapter.adapt(
        &template(
            0.02,
            vec![
                PlacementDirective::new("cup", Role::Source, [0.2, 0.0, 0.0], 0.2, 0.03),
                PlacementDirective::new("saucer", Role::Target, [0.2, 0.0, 0.0], 0.0, 0.03),
            ],
        ),
        &sphere(),
        "robot",
    );

    assert!(!layout.layout_valid);
    assert_eq!(
        layout.colliding_pairs(),
        vec![("cup".to_string(), "saucer".to_string())]
    );
}

#[test]
fn obstacles_never_move() {
    let adapter = SceneLayoutAdapter::default();
    let layout = adapter.adapt(
        &template(
            0.02,
            vec![
                PlacementDirective::new("block", Role::Source, [0.2, 0.0, 0.0], 0.2, 0.03),
                PlacementDirective::new("wall", Role::Obstacle, [0.2, 0.0, 0.0], 0.0, 0.03),
            ],
        ),
        &sphere(),
        "robot",
    );

    let wall = layout.directive("wall").unwrap();
    assert_eq!(wall.adapted_pose, wall.directive.reference_pose);
    assert!(wall.group.is_none());
    assert!(layout.directive("block").unwrap().perturbed);
    assert!(layout.layout_valid);
}

#[test]
fn orientation_outside_tolerance_is_infeasible() {
    let chain = crate::kinematics::KinematicChain::build(&planar_arm(), "arm").unwrap();
    let envelopes: BTreeMap<String, ReachabilityEnvelope> = [(
        "arm".to_string(),
        ReachabilityEnvelope::sample(&chain, &ReachabilityConfig::default()),
    )]
    .into();

    // A planar arm can never tilt its palm out of the xy plane.
    let tilted = PlacementDirective::new("card", Role::Source, [0.35, 0.1, 0.0], 0.05, 0.02)
        .with_orientation(UnitQuaternion::from_euler_angles(1.0, 0.0, 0.0), 0.1);

    let layout =
        SceneLayoutAdapter::default().adapt(&template(0.0, vec![tilted]), &envelopes, "planar");
    assert!(!layout.directive("card").unwrap().feasible);
    assert!(!layout.layout_valid);
}

proptest! {
    #[test]
    fn clamp_into_is_idempotent(
        x in -1.0f64..1.0,
        y in -1.0f64..1.0,
        z in -1.0f64..1.0,
        roll in -3.0f64..3.0,
    ) {
        let chain = crate::kinematics::KinematicChain::build(&planar_arm(), "arm").unwrap();
        let config = ReachabilityConfig {
            min_samples: 1024,
            grid_budget: 1024,
            ..ReachabilityConfig::default()
        };
        let sampled = ReachabilityEnvelope::sample(&chain, &config);
        let ball = ReachabilityEnvelope::spherical(Point3::origin(), 0.5, 24, 12);

        let rotation = UnitQuaternion::from_euler_angles(roll, 0.0, 0.0);
        let pose = Pose::from_parts(Translation3::new(x, y, z), rotation);
        for envelope in [&sampled, &ball] {
            let clamped = envelope.clamp_into(&pose);
            prop_assert!(envelope.contains(&clamped, 0.0));
            prop_assert_eq!(envelope.clamp_into(&clamped), clamped);
        }
    }

    #[test]
    fn template_inside_envelope_adapts_unchanged(
        positions in proptest::collection::vec(
            (-0.28f64..0.28, -0.28f64..0.28, -0.28f64..0.28),
            1..4,
        )
    ) {
        let directives = positions
            .iter()
            .enumerate()
            .map(|(i, (x, y, z))| {
                let id = format!("object_{i}");
                PlacementDirective::new(&id, Role::Source, [*x, *y, *z], 0.0, 0.0)
            })
            .collect();

        let layout =
            SceneLayoutAdapter::default().adapt(&template(0.0, directives), &sphere(), "robot");
        for directive in &layout.directives {
            prop_assert_eq!(directive.adapted_pose, directive.directive.reference_pose);
            prop_assert_eq!(directive.displacement, 0.0);
            prop_assert!(directive.feasible);
        }
    }

    #[test]
    fn valid_layouts_respect_minimum_separation(
        positions in proptest::collection::vec((-0.6f64..0.6, -0.6f64..0.6, -0.2f64..0.2), 2..5)
    ) {
        let directives = positions
            .iter()
            .enumerate()
            .map(|(i, (x, y, z))| {
                let id = format!("object_{i}");
                PlacementDirective::new(&id, Role::Source, [*x, *y, *z], 0.4, 0.03)
            })
            .collect();

        let layout =
            SceneLayoutAdapter::default().adapt(&template(0.02, directives), &sphere(), "robot");
        if layout.layout_valid {
            for (i, a) in layout.directives.iter().enumerate() {
                for b in &layout.directives[i + 1..] {
                    let gap = (a.adapted_pose.translation.vector
                        - b.adapted_pose.translation.vector)
                        .norm();
                    prop_assert!(gap >= 0.08 - 1e-9);
                }
            }
        }
    }
}

// Environments

#[derive(Debug)]
struct StepReached(u32);

impl SuccessPredicate for StepReached {
    fn is_success(&self, observation: &Observation) -> bool {
        observation.step >= self.0
    }
}

fn planar_task(success: Arc<dyn SuccessPredicate>) -> TaskDefinition {
    TaskDefinition {
        name: "Shuffle".to_string(),
        template: template(
            0.01,
            vec![
                PlacementDirective::new("block", Role::Source, [0.3, -0.15, 0.0], 0.05, 0.02),
                PlacementDirective::new("tray", Role::Target, [0.15, 0.3, 0.0], 0.05, 0.05),
            ],
        ),
        success,
    }
}

fn planar_factory(max_episode_steps: u32) -> EnvironmentFactory {
    EnvironmentFactory::new(
        Arc::new(ScriptedTasks::new(Arc::new(StepReached(u32::MAX)))),
        Arc::new(KinematicBackend::default()),
        FactoryConfig {
            max_episode_steps,
            ..FactoryConfig::default()
        },
    )
}

#[test]
fn environment_follows_episode_lifecycle() {
    let factory = planar_factory(3);
    let mut env = factory
        .build(&PlanarRobot, planar_task(Arc::new(StepReached(u32::MAX))))
        .unwrap();
    let neutral = env.schema().neutral();

    assert_eq!(env.state(), EpisodeState::Uninitialized);
    assert_eq!(
        env.step(&neutral),
        Err(EnvError::InvalidTransition {
            state: "uninitialized",
            operation: "step",
        })
    );

    env.reset(7).unwrap();
    assert_eq!(env.state(), EpisodeState::Ready);

    let first = env.step(&neutral).unwrap();
    assert!(!first.done);
    assert_eq!(env.state(), EpisodeState::Running);

    env.step(&neutral).unwrap();
    let last = env.step(&neutral).unwrap();
    assert!(last.done);
    assert_eq!(last.info.termination, Some(TerminationReason::StepBudget));
    assert_eq!(env.state(), EpisodeState::Terminated);
    assert!(matches!(env.step(&neutral), Err(EnvError::InvalidTransition { .. })));

    env.reset(8).unwrap();
    assert_eq!(env.state(), EpisodeState::Ready);

    env.close();
    env.close();
    assert_eq!(env.state(), EpisodeState::Closed);
    assert!(env.reset(9).is_err());
}

#[test]
fn success_ends_the_episode() {
    let factory = planar_factory(10);
    let mut env = factory.build(&PlanarRobot, planar_task(Arc::new(StepReached(2)))).unwrap();
    let neutral = env.schema().neutral();

    env.reset(0).unwrap();
    assert!(!env.step(&neutral).unwrap().done);
    let step = env.step(&neutral).unwrap();
    assert!(step.done && step.info.success);
    assert_eq!(step.info.termination, Some(TerminationReason::Success));
}

#[test]
fn reset_is_deterministic_in_seed() {
    let factory = planar_factory(10);
    let task = planar_task(Arc::new(StepReached(u32::MAX)));
    let mut env = factory.build(&PlanarRobot, task).unwrap();

    let a = env.reset(42).unwrap();
    let b = env.reset(42).unwrap();
    let c = env.reset(43).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn environment_rejects_foreign_actions() {
    let factory = planar_factory(10);
    let task = planar_task(Arc::new(StepReached(u32::MAX)));
    let mut env = factory.build(&PlanarRobot, task).unwrap();
    env.reset(0).unwrap();

    let foreign = Action {
        embodiment_tag: "G1ArmsOnly".to_string(),
        groups: env.schema().neutral().groups,
    };
    assert!(matches!(env.step(&foreign), Err(EnvError::Action(_))));
}

#[test]
fn closed_hand_carries_and_releases_object() {
    let workspace =
        Arc::new(Workspace::build(planar_gripper(), &ReachabilityConfig::default()).unwrap());
    let block = PlacementDirective::new("block", Role::Source, [0.5, 0.0, 0.0], 0.0, 0.02);
    let layout = AdaptedSceneLayout {
        task: "Carry".to_string(),
        embodiment: "planar_gripper".to_string(),
        min_separation: 0.0,
        directives: vec![AdaptedDirective {
            adapted_pose: block.reference_pose,
            directive: block,
            group: Some("arm".to_string()),
            displacement: 0.0,
            feasible: true,
            perturbed: false,
        }],
        collisions: Vec::new(),
        layout_valid: true,
    };
    let config = KinematicSimConfig {
        reset_noise_scale: 0.0,
        object_jitter: 0.0,
        ..KinematicSimConfig::default()
    };
    let mut sim = KinematicSim::new(Arc::clone(&workspace), &layout, config).unwrap();
    let schema = ActionSchema::from_descriptor(workspace.descriptor());

    let command = |arm: [f64; 2], gripper: f64| {
        let mut action = schema.neutral();
        action.groups.insert("arm".to_string(), arm.to_vec());
        action.groups.insert("gripper".to_string(), vec![gripper]);
        action
    };

    sim.reset(0).unwrap();
    let mut observation = Observation::default();
    for _ in 0..7 {
        observation = sim.step(&command([0.0, 0.0], 0.05)).unwrap();
    }
    assert_eq!(observation.objects["block"].held_by.as_deref(), Some("gripper"));

    for _ in 0..5 {
        observation = sim.step(&command([0.05, 0.0], 0.0)).unwrap();
    }
    let palm = observation.end_effectors["arm"].translation.vector;
    assert_relative_eq!(observation.objects["block"].position.coords, palm, epsilon = 1e-12);
    assert_relative_eq!(observation.joint_positions["arm"][0], 0.25, epsilon = 1e-12);

    for _ in 0..7 {
        observation = sim.step(&command([0.0, 0.0], -0.05)).unwrap();
    }
    assert!(observation.objects["block"].held_by.is_none());
    assert_relative_eq!(observation.objects["block"].position.coords, palm, epsilon = 1e-12);
}

// Factory and registry

#[derive(Debug)]
struct ScriptedTasks {
    success: Arc<dyn SuccessPredicate>,
}

impl ScriptedTasks {
    fn new(success: Arc<dyn SuccessPredicate>) -> Self {
        Self { success }
    }
}

impl TaskRegistry for ScriptedTasks {
    fn resolve(&self, task: &TaskId) -> Result<TaskDefinition, ConstructionError> {
        let directives = match task.task.as_str() {
            // Generous tolerance: any non-empty envelope can host these.
            "Reach" => vec![
                PlacementDirective::new("block", Role::Source, [0.4, -0.3, 1.0], 10.0, 0.001),
                PlacementDirective::new("bin", Role::Target, [0.4, 0.3, 1.0], 10.0, 0.001),
            ],
            "Unreachable" => vec![PlacementDirective::new(
                "far_object",
                Role::Source,
                [5.0, 0.0, 1.0],
                0.1,
                0.02,
            )],
            other => return Err(ConstructionError::UnknownTask(other.to_string())),
        };

        Ok(TaskDefinition {
            name: task.task.clone(),
            template: template(0.0, directives),
            success: Arc::clone(&self.success),
        })
    }

    fn tasks(&self) -> Vec<String> {
        vec!["Reach".to_string(), "Unreachable".to_string()]
    }
}

#[test]
fn factory_reports_construction_errors() {
    let factory = planar_factory(10);

    assert!(matches!(
        factory.make("g1_unified/Reach_G1Flying_Env"),
        Err(ConstructionError::UnknownEmbodiment(_))
    ));
    assert!(matches!(
        factory.make("gr1_unified/Reach_G1ArmsOnly_Env"),
        Err(ConstructionError::FamilyMismatch { .. })
    ));
    assert!(matches!(
        factory.make("g1_unified/Juggle_G1ArmsOnly_Env"),
        Err(ConstructionError::UnknownTask(_))
    ));

    match factory.make("g1_unified/Unreachable_G1ArmsOnly_Env") {
        Err(ConstructionError::InfeasibleLayout { directives, embodiment, .. }) => {
            assert_eq!(directives, vec!["far_object".to_string()]);
            assert_eq!(embodiment, "G1ArmsOnly");
        }
        _ => panic!("expected an infeasible layout"),
    }
}

#[test]
fn factory_makes_named_environment() {
    let factory = planar_factory(5);
    let mut env = factory.make("g1_unified/Reach_G1ArmsAndWaistDex31Hands_Env").unwrap();

    assert_eq!(env.embodiment_tag(), "G1ArmsAndWaistDex31Hands");
    assert!(env.layout().layout_valid);
    assert_eq!(env.action_spec().shape, env.schema().dimension());
    assert_eq!(env.observation_spec().shape, 31);

    let observation = env.reset(1).unwrap();
    assert!(observation.end_effectors.contains_key("left_arm"));
    assert_eq!(observation.joint_positions["left_arm"].len(), 7);
    assert_eq!(observation.objects.len(), 2);
}

#[test]
fn action_bounds_follow_simulator_step_limit() {
    let backend = KinematicBackend::new(KinematicSimConfig {
        max_joint_delta: 0.02,
        ..KinematicSimConfig::default()
    });
    let factory = EnvironmentFactory::new(
        Arc::new(ScriptedTasks::new(Arc::new(StepReached(u32::MAX)))),
        Arc::new(backend),
        FactoryConfig::default(),
    );
    let task = planar_task(Arc::new(StepReached(u32::MAX)));
    let env = factory.build(&PlanarRobot, task).unwrap();

    let spec = env.action_spec();
    assert_eq!((spec.min, spec.max), (-0.02, 0.02));
    assert_eq!(spec.shape, 2);
}

#[test]
fn builtin_registry_serves_every_task() {
    let registry = crate::task::BuiltinTasks;
    for task in registry.tasks() {
        let id = TaskId::parse(&format!("gr1_unified/{task}_GR1ArmsOnlyFourierHands_Env")).unwrap();
        let definition = registry.resolve(&id).unwrap();
        assert_eq!(definition.template.task, task);
        assert_eq!(definition.template.reference_embodiment, "GR1ArmsOnlyFourierHands");
    }
}

fn builtin_factory() -> EnvironmentFactory {
    EnvironmentFactory::new(
        Arc::new(crate::task::BuiltinTasks),
        Arc::new(KinematicBackend::default()),
        FactoryConfig::default(),
    )
}

#[test]
fn builtin_task_adapts_onto_g1() {
    let env = builtin_factory()
        .make("g1_unified/EvalPnPAppleToPlate_G1ArmsOnlyDex31Hands_Env")
        .unwrap();
    let layout = env.layout();

    assert!(layout.layout_valid);
    assert_eq!(layout.embodiment, "G1ArmsOnlyDex31Hands");
    assert!(layout.directives.iter().any(|d| {
        d.displacement > 0.0 && d.displacement <= d.directive.tolerance && d.feasible
    }));

    let bowl = layout.directive("fruit_bowl").unwrap();
    assert_eq!(bowl.adapted_pose, bowl.directive.reference_pose);
    assert_eq!(bowl.displacement, 0.0);
    assert!(bowl.group.is_none());
}

#[test]
fn reference_embodiment_keeps_builtin_layout() {
    let prepared = builtin_factory()
        .prepare("gr1_unified/PnPCupToDrawerClose_GR1ArmsOnlyFourierHands_Env")
        .unwrap();
    let drawer = prepared.layout.directive("drawer").unwrap();

    assert!(prepared.layout.layout_valid);
    assert!(drawer.displacement < 1e-9);
    assert!(!drawer.perturbed);
    assert_eq!(
        drawer.adapted_pose.translation,
        drawer.directive.reference_pose.translation
    );
}

// Batched evaluation

/// Reset faults whenever `fail` says so; the observation carries the seed in
/// the `marker` object's x coordinate.
struct ScriptedBackend {
    fail: fn(u64) -> bool,
}

struct ScriptedSim {
    fail: fn(u64) -> bool,
    seed: u64,
    step: u32,
}

impl ScriptedSim {
    fn observation(&self) -> Observation {
        Observation {
            step: self.step,
            objects: [(
                "marker".to_string(),
                ObjectObservation {
                    position: Point3::new(self.seed as f64, 0.0, 0.0),
                    held_by: None,
                },
            )]
            .into(),
            ..Observation::default()
        }
    }
}

impl Simulator for ScriptedSim {
    fn reset(&mut self, seed: u64) -> Result<Observation, SimulatorFault> {
        if (self.fail)(seed) {
            return Err(SimulatorFault::new(format!("scripted fault at seed {seed}")));
        }
        self.seed = seed;
        self.step = 0;
        Ok(self.observation())
    }

    fn step(&mut self, _action: &Action) -> Result<Observation, SimulatorFault> {
        self.step += 1;
        Ok(self.observation())
    }

    fn close(&mut self) {}
}

impl SimulatorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(
        &self,
        _workspace: Arc<Workspace>,
        _layout: &AdaptedSceneLayout,
    ) -> Result<Box<dyn Simulator>, SimulatorFault> {
        Ok(Box::new(ScriptedSim {
            fail: self.fail,
            seed: 0,
            step: 0,
        }))
    }
}

/// Even seeds succeed on the second step.
#[derive(Debug)]
struct EvenSeedSucceeds;

impl SuccessPredicate for EvenSeedSucceeds {
    fn is_success(&self, observation: &Observation) -> bool {
        let seed = observation.objects.get("marker").map(|m| m.position.x as u64);
        observation.step >= 2 && seed.map_or(false, |s| s % 2 == 0)
    }
}

const SCRIPTED_ENV: &str = "g1_unified/Reach_G1ArmsOnly_Env";

fn arms_only_schema() -> ActionSchema {
    ActionSchema::from_descriptor(&embodiment::lookup("G1ArmsOnly").unwrap().describe().unwrap())
}

fn scripted_evaluator(
    config: EvalConfig,
    fail: fn(u64) -> bool,
    success: Arc<dyn SuccessPredicate>,
    policy: Arc<dyn PolicyClient>,
) -> BatchedEvaluator {
    let factory = EnvironmentFactory::new(
        Arc::new(ScriptedTasks::new(success)),
        Arc::new(ScriptedBackend { fail }),
        config.factory_config(),
    );
    BatchedEvaluator::new(config, factory, policy)
}

fn scripted_config(n_envs: usize, n_episodes: usize, max_episode_steps: u32) -> EvalConfig {
    EvalConfig {
        env_name: SCRIPTED_ENV.to_string(),
        n_envs,
        n_episodes,
        max_episode_steps,
        ..EvalConfig::default()
    }
}

#[test]
fn faulted_worker_is_retired_and_batch_continues() {
    let evaluator = scripted_evaluator(
        scripted_config(5, 10, 4),
        |seed| seed == 3,
        Arc::new(EvenSeedSucceeds),
        Arc::new(NeutralPolicy::new(arms_only_schema())),
    );

    let report = evaluator.run(&StopSignal::new()).unwrap();

    assert_eq!(report.n_envs, 5);
    assert_eq!(report.completed, 9);
    assert_eq!(report.successes, 5);
    assert_relative_eq!(report.success_rate, 5.0 / 9.0);
    assert_eq!(report.faults.len(), 1);
    assert_eq!(report.faults[0].episode, Some(3));
    assert_eq!(report.faults[0].kind, FaultKind::Simulator);

    let mut episodes: Vec<usize> = report.episodes.iter().map(|e| e.episode).collect();
    episodes.sort_unstable();
    assert_eq!(episodes, [0, 1, 2, 4, 5, 6, 7, 8, 9]);

    for record in &report.episodes {
        assert_eq!(record.seed, record.episode as u64);
    }
    for worker in 0..5 {
        let order: Vec<(usize, usize)> = report
            .episodes
            .iter()
            .filter(|e| e.worker == worker)
            .map(|e| (e.ordinal, e.episode))
            .collect();
        assert!(order.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 < w[1].1));
    }
}

#[test]
fn every_worker_faulting_exhausts_the_batch() {
    let evaluator = scripted_evaluator(
        scripted_config(3, 10, 4),
        |_| true,
        Arc::new(EvenSeedSucceeds),
        Arc::new(NeutralPolicy::new(arms_only_schema())),
    );

    match evaluator.run(&StopSignal::new()) {
        Err(EvalError::BatchExhausted { faults }) => {
            assert_eq!(faults.len(), 3);
            let mut workers: Vec<usize> = faults.iter().map(|f| f.worker).collect();
            workers.sort_unstable();
            assert_eq!(workers, [0, 1, 2]);
        }
        other => panic!("expected BatchExhausted, got {other:?}"),
    }
}

/// Answers neutrally; the first call stalls well past any test timeout.
struct StallsOnce {
    inner: NeutralPolicy,
    calls: AtomicUsize,
    stall: Duration,
}

impl PolicyClient for StallsOnce {
    fn decide(&self, request: &PolicyRequest) -> Result<Action, PolicyError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            std::thread::sleep(self.stall);
        }
        self.inner.decide(request)
    }
}

#[test]
fn decision_timeout_substitutes_neutral_action() {
    let config = EvalConfig {
        decision_timeout_ms: 50,
        ..scripted_config(1, 2, 3)
    };
    let policy = Arc::new(StallsOnce {
        inner: NeutralPolicy::new(arms_only_schema()),
        calls: AtomicUsize::new(0),
        stall: Duration::from_millis(500),
    });
    let evaluator = scripted_evaluator(config, |_| false, Arc::new(StepReached(u32::MAX)), policy);

    let report = evaluator.run(&StopSignal::new()).unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.timeouts, 1);
    assert_eq!(report.episodes[0].timeouts, 1);
    assert_eq!(report.episodes[0].result.steps_taken, 3);
    assert_eq!(report.episodes[1].timeouts, 0);
    assert!(report.faults.is_empty());
}

/// Never answers within any test timeout; counts how often it is called.
struct Unresponsive {
    inner: NeutralPolicy,
    calls: AtomicUsize,
}

impl PolicyClient for Unresponsive {
    fn decide(&self, request: &PolicyRequest) -> Result<Action, PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_secs(5));
        self.inner.decide(request)
    }
}

#[test]
fn unresponsive_policy_does_not_pile_up_calls() {
    let config = EvalConfig {
        decision_timeout_ms: 10,
        ..scripted_config(1, 2, 20)
    };
    let policy = Arc::new(Unresponsive {
        inner: NeutralPolicy::new(arms_only_schema()),
        calls: AtomicUsize::new(0),
    });
    let evaluator = scripted_evaluator(
        config,
        |_| false,
        Arc::new(StepReached(u32::MAX)),
        Arc::clone(&policy) as Arc<dyn PolicyClient>,
    );

    let report = evaluator.run(&StopSignal::new()).unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.timeouts, 40);
    // One abandoned call plus the one the current helper is stuck in.
    assert_eq!(policy.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn mismatched_policy_tag_retires_worker() {
    let foreign = ActionSchema::from_descriptor(&planar_arm());
    let evaluator = scripted_evaluator(
        scripted_config(1, 2, 3),
        |_| false,
        Arc::new(StepReached(u32::MAX)),
        Arc::new(NeutralPolicy::new(foreign)),
    );

    match evaluator.run(&StopSignal::new()) {
        Err(EvalError::BatchExhausted { faults }) => {
            assert_eq!(faults[0].kind, FaultKind::Policy);
            assert_eq!(faults[0].episode, Some(0));
        }
        other => panic!("expected BatchExhausted, got {other:?}"),
    }
}

/// Raises the stop signal on its second decision.
struct StopsOnSecondCall {
    inner: NeutralPolicy,
    calls: AtomicUsize,
    stop: StopSignal,
}

impl PolicyClient for StopsOnSecondCall {
    fn decide(&self, request: &PolicyRequest) -> Result<Action, PolicyError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            self.stop.raise();
        }
        self.inner.decide(request)
    }
}

#[test]
fn stop_signal_cancels_in_flight_episode() {
    let stop = StopSignal::new();
    let policy = Arc::new(StopsOnSecondCall {
        inner: NeutralPolicy::new(arms_only_schema()),
        calls: AtomicUsize::new(0),
        stop: stop.clone(),
    });
    let evaluator = scripted_evaluator(
        scripted_config(1, 5, 10),
        |_| false,
        Arc::new(StepReached(u32::MAX)),
        policy,
    );

    let report = evaluator.run(&stop).unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(report.cancelled, 1);
    assert_relative_eq!(report.success_rate, 0.0);
}

#[test]
fn raised_stop_refuses_all_work() {
    let stop = StopSignal::new();
    stop.raise();
    let evaluator = scripted_evaluator(
        scripted_config(2, 5, 10),
        |_| false,
        Arc::new(StepReached(u32::MAX)),
        Arc::new(NeutralPolicy::new(arms_only_schema())),
    );

    let report = evaluator.run(&stop).unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(report.cancelled, 0);
    assert!(report.faults.is_empty());
}

#[test]
fn episodes_are_recorded_as_json_lines() {
    let dir = std::env::temp_dir().join(format!("tabletop-recordings-{}", std::process::id()));
    let config = EvalConfig {
        video_dir: Some(dir.clone()),
        ..scripted_config(1, 1, 3)
    };
    let evaluator = scripted_evaluator(
        config,
        |_| false,
        Arc::new(StepReached(u32::MAX)),
        Arc::new(NeutralPolicy::new(arms_only_schema())),
    );

    let report = evaluator.run(&StopSignal::new()).unwrap();
    assert_eq!(report.completed, 1);

    let contents = std::fs::read_to_string(dir.join("0_0.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0]["kind"], "observation");
    assert_eq!(lines[4]["kind"], "result");
    assert_eq!(lines[4]["steps_taken"], 3);

    std::fs::remove_dir_all(&dir).ok();
}
