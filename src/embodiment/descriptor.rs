use std::collections::{BTreeSet, HashMap};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::kinematics::Pose;

/// One joint of the robot, as authored in the embodiment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointSpec {
    pub name: String,
    pub parent_link: String,
    pub child_link: String,
    /// Fixed transform from the parent joint frame to this joint's frame.
    pub origin: Pose,
    pub axis: Vector3<f64>,
    pub lower_limit: f64,
    pub upper_limit: f64,
    pub is_actuated: bool,
    /// Initial position used at reset.
    #[serde(default)]
    pub rest: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndEffector {
    pub frame: String,
    /// Wrist-to-palm transform; models the end-effector geometry.
    pub tool_offset: Pose,
    #[serde(default)]
    pub hand: Option<String>,
}

/// An ordered joint chain terminating at one end-effector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManipulatorGroup {
    pub name: String,
    pub joints: Vec<String>,
    pub end_effector: EndEffector,
}

/// A named slice of the action vector (`left_arm`, `right_hand`, `waist`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionGroup {
    pub name: String,
    pub joints: Vec<String>,
}

/// Geometry referenced by id; resolved by the external asset store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: String,
    pub path: String,
}

/// Unvalidated input record for [`EmbodimentDescriptor::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbodimentSpec {
    pub id: String,
    pub family: String,
    pub base_offset: Pose,
    #[serde(default)]
    pub floating_base: bool,
    pub joints: Vec<JointSpec>,
    pub manipulator_groups: Vec<ManipulatorGroup>,
    #[serde(default)]
    pub action_groups: Vec<ActionGroup>,
    #[serde(default)]
    pub assets: Vec<AssetRef>,
}

/// Validated, immutable kinematic record of one robot.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbodimentDescriptor {
    spec: EmbodimentSpec,
    index: HashMap<String, usize>,
}

impl EmbodimentDescriptor {
    pub fn new(spec: EmbodimentSpec) -> Result<Self, ValidationError> {
        if spec.id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }

        let mut index = HashMap::with_capacity(spec.joints.len());
        for (idx, joint) in spec.joints.iter().enumerate() {
            if index.insert(joint.name.clone(), idx).is_some() {
                return Err(ValidationError::DuplicateJoint(joint.name.clone()));
            }
            validate_joint(joint)?;
        }

        let mut group_names = BTreeSet::new();
        for group in &spec.manipulator_groups {
            if !group_names.insert(group.name.as_str()) {
                return Err(ValidationError::DuplicateGroup(group.name.clone()));
            }
            if group.joints.is_empty() {
                return Err(ValidationError::EmptyGroup(group.name.clone()));
            }

            let mut previous: Option<&JointSpec> = None;
            for name in &group.joints {
                let joint = index
                    .get(name)
                    .map(|&idx| &spec.joints[idx])
                    .ok_or_else(|| ValidationError::UnknownJoint {
                        group: group.name.clone(),
                        joint: name.clone(),
                    })?;

                if let Some(prev) = previous {
                    if joint.parent_link != prev.child_link {
                        return Err(ValidationError::BrokenChain {
                            group: group.name.clone(),
                            joint: joint.name.clone(),
                            expected_parent: prev.child_link.clone(),
                        });
                    }
                }
                previous = Some(joint);
            }
        }

        validate_tree(&spec.joints)?;

        let mut action_names = BTreeSet::new();
        let mut claimed = BTreeSet::new();
        for group in &spec.action_groups {
            if !action_names.insert(group.name.as_str()) {
                return Err(ValidationError::DuplicateGroup(group.name.clone()));
            }
            if group.joints.is_empty() {
                return Err(ValidationError::EmptyGroup(group.name.clone()));
            }
            for name in &group.joints {
                let joint = index
                    .get(name)
                    .map(|&idx| &spec.joints[idx])
                    .ok_or_else(|| ValidationError::UnknownJoint {
                        group: group.name.clone(),
                        joint: name.clone(),
                    })?;
                if !joint.is_actuated {
                    return Err(ValidationError::UnactuatedActionJoint {
                        group: group.name.clone(),
                        joint: name.clone(),
                    });
                }
                if !claimed.insert(name.as_str()) {
                    return Err(ValidationError::SharedActionJoint {
                        joint: name.clone(),
                    });
                }
            }
        }

        Ok(Self { spec, index })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn family(&self) -> &str {
        &self.spec.family
    }

    pub fn joint_count(&self) -> usize {
        self.spec.joints.len()
    }

    pub fn actuated_joint_count(&self) -> usize {
        self.spec.joints.iter().filter(|j| j.is_actuated).count()
    }

    pub fn joints(&self) -> &[JointSpec] {
        &self.spec.joints
    }

    pub fn joint(&self, name: &str) -> Option<&JointSpec> {
        self.index.get(name).map(|&idx| &self.spec.joints[idx])
    }

    pub fn manipulator_groups(&self) -> &[ManipulatorGroup] {
        &self.spec.manipulator_groups
    }

    pub fn manipulator_group(&self, name: &str) -> Option<&ManipulatorGroup> {
        self.spec.manipulator_groups.iter().find(|g| g.name == name)
    }

    pub fn action_groups(&self) -> &[ActionGroup] {
        &self.spec.action_groups
    }

    /// `(lower, upper)` for a joint, or `None` if the joint is unknown.
    pub fn limits_for(&self, joint: &str) -> Option<(f64, f64)> {
        self.joint(joint).map(|j| (j.lower_limit, j.upper_limit))
    }

    pub fn base_offset(&self) -> &Pose {
        &self.spec.base_offset
    }

    pub fn floating_base(&self) -> bool {
        self.spec.floating_base
    }

    pub fn assets(&self) -> &[AssetRef] {
        &self.spec.assets
    }

    pub fn spec(&self) -> &EmbodimentSpec {
        &self.spec
    }

    /// New descriptor with every joint whose name contains one of `keywords`
    /// as an underscore-delimited token left unactuated.
    ///
    /// Action groups lose the affected joints; groups left empty are dropped.
    pub fn without_actuation(&self, keywords: &[&str]) -> Result<Self, ValidationError> {
        let mut spec = self.spec.clone();

        for joint in spec.joints.iter_mut() {
            if joint.name.split('_').any(|token| keywords.contains(&token)) {
                joint.is_actuated = false;
            }
        }

        let actuated: BTreeSet<String> = spec
            .joints
            .iter()
            .filter(|j| j.is_actuated)
            .map(|j| j.name.clone())
            .collect();

        spec.action_groups = spec
            .action_groups
            .into_iter()
            .filter_map(|mut group| {
                group.joints.retain(|j| actuated.contains(j));
                (!group.joints.is_empty()).then_some(group)
            })
            .collect();

        Self::new(spec)
    }

    pub fn without_floating_base(&self) -> Result<Self, ValidationError> {
        let mut spec = self.spec.clone();
        spec.floating_base = false;
        Self::new(spec)
    }
}

/// Every parent link is either another joint's child link or the single root.
fn validate_tree(joints: &[JointSpec]) -> Result<(), ValidationError> {
    let children: BTreeSet<&str> = joints.iter().map(|j| j.child_link.as_str()).collect();

    let mut root: Option<&str> = None;
    for joint in joints {
        let parent = joint.parent_link.as_str();
        if children.contains(parent) {
            continue;
        }
        match root {
            None => root = Some(parent),
            Some(root) if root == parent => {}
            Some(root) => {
                return Err(ValidationError::UnresolvedParent {
                    joint: joint.name.clone(),
                    parent: parent.to_string(),
                    root: root.to_string(),
                })
            }
        }
    }
    Ok(())
}

fn validate_joint(joint: &JointSpec) -> Result<(), ValidationError> {
    if !joint.lower_limit.is_finite() || !joint.upper_limit.is_finite() {
        return Err(ValidationError::NonFiniteLimit {
            joint: joint.name.clone(),
        });
    }
    if joint.lower_limit > joint.upper_limit {
        return Err(ValidationError::InvertedLimits {
            joint: joint.name.clone(),
            lower: joint.lower_limit,
            upper: joint.upper_limit,
        });
    }
    if joint.axis.norm() <= 1e-12 || !joint.axis.iter().all(|v| v.is_finite()) {
        return Err(ValidationError::ZeroAxis {
            joint: joint.name.clone(),
        });
    }
    if !(joint.lower_limit..=joint.upper_limit).contains(&joint.rest) {
        return Err(ValidationError::RestOutOfLimits {
            joint: joint.name.clone(),
            rest: joint.rest,
            lower: joint.lower_limit,
            upper: joint.upper_limit,
        });
    }
    Ok(())
}
