use nalgebra::{Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::embodiment::descriptor::{AssetRef, JointSpec};
use crate::embodiment::Side;
use crate::kinematics::Pose;

/// Dexterous hand models that can be mounted on a humanoid wrist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HandModel {
    Inspire,
    Fourier,
    Dex31,
}

impl HandModel {
    pub const ALL: [HandModel; 3] = [HandModel::Inspire, HandModel::Fourier, HandModel::Dex31];

    pub fn name(&self) -> &'static str {
        match self {
            HandModel::Inspire => "Inspire",
            HandModel::Fourier => "Fourier",
            HandModel::Dex31 => "Dex31",
        }
    }

    /// Wrist-to-palm distance along the forearm axis.
    pub fn palm_length(&self) -> f64 {
        match self {
            HandModel::Inspire => 0.12,
            HandModel::Fourier => 0.13,
            HandModel::Dex31 => 0.10,
        }
    }

    pub fn tool_offset(&self) -> Pose {
        Pose::from_parts(
            Translation3::new(self.palm_length(), 0.0, 0.0),
            UnitQuaternion::identity(),
        )
    }

    /// `(finger, axis, lower, upper)` for every hand joint.
    fn fingers(&self) -> &'static [(&'static str, [f64; 3], f64, f64)] {
        match self {
            HandModel::Inspire => &[
                ("thumb_yaw", [0.0, 0.0, 1.0], 0.0, 1.308),
                ("thumb_pitch", [0.0, 1.0, 0.0], 0.0, 0.6),
                ("index", [0.0, 1.0, 0.0], 0.0, 1.7),
                ("middle", [0.0, 1.0, 0.0], 0.0, 1.7),
                ("ring", [0.0, 1.0, 0.0], 0.0, 1.7),
                ("pinky", [0.0, 1.0, 0.0], 0.0, 1.7),
            ],
            HandModel::Fourier => &[
                ("thumb_yaw", [0.0, 0.0, 1.0], 0.0, 1.74),
                ("thumb_pitch", [0.0, 1.0, 0.0], 0.0, 1.22),
                ("index", [0.0, 1.0, 0.0], 0.0, 1.44),
                ("middle", [0.0, 1.0, 0.0], 0.0, 1.44),
                ("ring", [0.0, 1.0, 0.0], 0.0, 1.44),
                ("pinky", [0.0, 1.0, 0.0], 0.0, 1.44),
            ],
            HandModel::Dex31 => &[
                ("thumb_0", [0.0, 1.0, 0.0], -1.0472, 1.0472),
                ("thumb_1", [0.0, 0.0, 1.0], -0.7243, 0.9208),
                ("thumb_2", [0.0, 0.0, 1.0], 0.0, 1.7453),
                ("middle_0", [0.0, 0.0, 1.0], -1.5708, 0.0),
                ("middle_1", [0.0, 0.0, 1.0], -1.7453, 0.0),
                ("index_0", [0.0, 0.0, 1.0], -1.5708, 0.0),
                ("index_1", [0.0, 0.0, 1.0], -1.7453, 0.0),
            ],
        }
    }

    pub fn joints(&self, side: Side, wrist_link: &str) -> Vec<JointSpec> {
        self.fingers()
            .iter()
            .map(|(finger, axis, lower, upper)| JointSpec {
                name: format!("{}_hand_{}_joint", side.prefix(), finger),
                parent_link: wrist_link.to_string(),
                child_link: format!("{}_hand_{}_link", side.prefix(), finger),
                origin: Pose::identity(),
                axis: Vector3::new(axis[0], axis[1], axis[2]),
                lower_limit: *lower,
                upper_limit: *upper,
                is_actuated: true,
                rest: 0.0,
            })
            .collect()
    }

    pub fn asset(&self, side: Side) -> AssetRef {
        AssetRef {
            id: format!("{}{}Hand", self.name(), side.title()),
            path: format!(
                "grippers/{}_{}_hand.xml",
                self.name().to_lowercase(),
                side.prefix()
            ),
        }
    }
}
