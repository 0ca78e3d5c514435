//! Shared construction of bipedal humanoid descriptors.
//!
//! Every family supplies one [`HumanoidLayout`] for its full body; the
//! registered variants are derived from it by freezing joint groups.

use nalgebra::{Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::embodiment::descriptor::{
    ActionGroup, AssetRef, EmbodimentDescriptor, EmbodimentSpec, EndEffector, JointSpec,
    ManipulatorGroup,
};
use crate::embodiment::hands::HandModel;
use crate::embodiment::Side;
use crate::error::ValidationError;
use crate::kinematics::Pose;

/// Left-side (or central) joint template; right-side joints are mirrored.
#[derive(Debug, Clone, Copy)]
pub struct JointTemplate {
    pub name: &'static str,
    pub origin: [f64; 3],
    pub axis: [f64; 3],
    pub limits: (f64, f64),
    pub rest: f64,
}

impl JointTemplate {
    pub const fn new(
        name: &'static str,
        origin: [f64; 3],
        axis: [f64; 3],
        limits: (f64, f64),
    ) -> Self {
        Self {
            name,
            origin,
            axis,
            limits,
            rest: 0.0,
        }
    }

    pub const fn with_rest(mut self, rest: f64) -> Self {
        self.rest = rest;
        self
    }

    /// Reflection through the sagittal plane: y offsets flip, and so do the
    /// limits of roll (x) and yaw (z) joints.
    fn mirrored(&self) -> Self {
        let flips = self.axis[0].abs() > 0.5 || self.axis[2].abs() > 0.5;
        let (lower, upper) = self.limits;
        Self {
            name: self.name,
            origin: [self.origin[0], -self.origin[1], self.origin[2]],
            axis: self.axis,
            limits: if flips { (-upper, -lower) } else { (lower, upper) },
            rest: if flips { -self.rest } else { self.rest },
        }
    }
}

#[derive(Debug, Clone)]
pub struct HumanoidLayout {
    pub family: &'static str,
    pub waist: [JointTemplate; 3],
    /// Seven arm joints, the first one mounted on the torso.
    pub arm: [JointTemplate; 7],
    pub head: [JointTemplate; 3],
    pub leg: [JointTemplate; 6],
    pub default_hands: HandModel,
    pub base_height: f64,
}

/// Which joints of the full body stay actuated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Body {
    Full,
    FixedLowerBody,
    ArmsOnly,
    ArmsAndWaist,
}

impl Body {
    pub const ALL: [Body; 4] = [
        Body::Full,
        Body::FixedLowerBody,
        Body::ArmsOnly,
        Body::ArmsAndWaist,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Body::Full => "Full",
            Body::FixedLowerBody => "FixedLowerBody",
            Body::ArmsOnly => "ArmsOnly",
            Body::ArmsAndWaist => "ArmsAndWaist",
        }
    }

    fn frozen(&self) -> &'static [&'static str] {
        match self {
            Body::Full => &[],
            Body::FixedLowerBody => &["hip", "knee", "ankle"],
            Body::ArmsOnly => &["hip", "knee", "ankle", "waist", "head"],
            Body::ArmsAndWaist => &["hip", "knee", "ankle", "head"],
        }
    }

    pub fn restrict(
        &self,
        full: &EmbodimentDescriptor,
    ) -> Result<EmbodimentDescriptor, ValidationError> {
        match self {
            Body::Full => Ok(full.clone()),
            body => full
                .without_actuation(body.frozen())?
                .without_floating_base(),
        }
    }
}

fn pose_at(offset: [f64; 3]) -> Pose {
    Pose::from_parts(
        Translation3::new(offset[0], offset[1], offset[2]),
        UnitQuaternion::identity(),
    )
}

fn joint(template: &JointTemplate, name: String, parent: &str, child: String) -> JointSpec {
    JointSpec {
        name,
        parent_link: parent.to_string(),
        child_link: child,
        origin: pose_at(template.origin),
        axis: Vector3::new(template.axis[0], template.axis[1], template.axis[2]),
        lower_limit: template.limits.0,
        upper_limit: template.limits.1,
        is_actuated: true,
        rest: template.rest,
    }
}

/// Append a serial chain of joints and return (joint names, last link).
fn push_chain<'a>(
    joints: &mut Vec<JointSpec>,
    templates: impl Iterator<Item = &'a JointTemplate>,
    prefix: &str,
    root_link: &str,
    mirror: bool,
) -> (Vec<String>, String) {
    let mut parent = root_link.to_string();
    let mut names = Vec::new();

    for template in templates {
        let template = if mirror { template.mirrored() } else { *template };
        let name = format!("{}{}_joint", prefix, template.name);
        let child = format!("{}{}_link", prefix, template.name);
        joints.push(joint(&template, name.clone(), &parent, child.clone()));
        names.push(name);
        parent = child;
    }

    (names, parent)
}

impl HumanoidLayout {
    /// Full-body spec with every joint actuated and a floating base.
    pub fn full_spec(&self, id: &str, hands: HandModel) -> EmbodimentSpec {
        let mut joints = Vec::new();
        let mut manipulator_groups = Vec::new();
        let mut action_groups = Vec::new();
        let mut assets = vec![AssetRef {
            id: format!("{}_body", self.family),
            path: format!("robots/{}/robot.xml", self.family),
        }];

        let (waist, torso) = push_chain(&mut joints, self.waist.iter(), "", "pelvis", false);
        action_groups.push(ActionGroup {
            name: "waist".to_string(),
            joints: waist.clone(),
        });

        for side in [Side::Left, Side::Right] {
            let prefix = format!("{}_", side.prefix());
            let (arm, wrist) = push_chain(
                &mut joints,
                self.arm.iter(),
                &prefix,
                &torso,
                side == Side::Right,
            );

            let hand_joints = hands.joints(side, &wrist);
            action_groups.push(ActionGroup {
                name: format!("{}_arm", side.prefix()),
                joints: arm.clone(),
            });
            action_groups.push(ActionGroup {
                name: format!("{}_hand", side.prefix()),
                joints: hand_joints.iter().map(|j| j.name.clone()).collect(),
            });
            joints.extend(hand_joints);
            assets.push(hands.asset(side));

            manipulator_groups.push(ManipulatorGroup {
                name: format!("{}_arm", side.prefix()),
                joints: waist.iter().chain(arm.iter()).cloned().collect(),
                end_effector: EndEffector {
                    frame: format!("{}_hand_palm", side.prefix()),
                    tool_offset: hands.tool_offset(),
                    hand: Some(format!("{}_hand", side.prefix())),
                },
            });
        }

        let (head, _) = push_chain(&mut joints, self.head.iter(), "", &torso, false);
        action_groups.push(ActionGroup {
            name: "neck".to_string(),
            joints: head,
        });

        let mut legs = Vec::new();
        for side in [Side::Left, Side::Right] {
            let prefix = format!("{}_", side.prefix());
            let (leg, _) = push_chain(
                &mut joints,
                self.leg.iter(),
                &prefix,
                "pelvis",
                side == Side::Right,
            );
            legs.extend(leg);
        }
        action_groups.push(ActionGroup {
            name: "legs".to_string(),
            joints: legs,
        });

        EmbodimentSpec {
            id: id.to_string(),
            family: self.family.to_string(),
            base_offset: pose_at([0.0, 0.0, self.base_height]),
            floating_base: true,
            joints,
            manipulator_groups,
            action_groups,
            assets,
        }
    }

    pub fn describe(
        &self,
        id: &str,
        body: Body,
        hands: HandModel,
    ) -> Result<EmbodimentDescriptor, ValidationError> {
        let full = EmbodimentDescriptor::new(self.full_spec(id, hands))?;
        body.restrict(&full)
    }
}
