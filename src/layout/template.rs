use std::f64::consts::PI;

use nalgebra::{Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use crate::kinematics::Pose;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Source,
    Target,
    Obstacle,
}

fn unconstrained() -> f64 {
    PI
}

/// Where one task object goes, relative to the reference embodiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDirective {
    pub object_id: String,
    pub reference_pose: Pose,
    /// Largest acceptable positional displacement, metres.
    pub tolerance: f64,
    pub role: Role,
    /// Bounding-sphere radius of the object.
    pub footprint: f64,
    /// Largest acceptable orientation change, radians.
    #[serde(default = "unconstrained")]
    pub orientation_tolerance: f64,
}

impl PlacementDirective {
    pub fn new(
        object_id: &str,
        role: Role,
        position: [f64; 3],
        tolerance: f64,
        footprint: f64,
    ) -> Self {
        Self {
            object_id: object_id.to_string(),
            reference_pose: Pose::from_parts(
                Translation3::new(position[0], position[1], position[2]),
                UnitQuaternion::identity(),
            ),
            tolerance,
            role,
            footprint,
            orientation_tolerance: unconstrained(),
        }
    }

    pub fn with_orientation(mut self, rotation: UnitQuaternion<f64>, tolerance: f64) -> Self {
        self.reference_pose.rotation = rotation;
        self.orientation_tolerance = tolerance;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneLayoutTemplate {
    pub task: String,
    pub reference_embodiment: String,
    /// Clearance required between footprints.
    pub min_separation: f64,
    pub directives: Vec<PlacementDirective>,
}
