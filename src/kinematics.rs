use nalgebra::{DMatrix, DVector, Isometry3, Point3, Unit, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::embodiment::EmbodimentDescriptor;
use crate::error::{Infeasible, KinematicsError};

/// Rigid transform: position plus unit-quaternion orientation.
pub type Pose = Isometry3<f64>;

const LIMIT_EPS: f64 = 1e-9;

/// Rotation angle between two orientations, radians in `[0, π]`.
///
/// Uses `atan2` so identical orientations give exactly zero.
pub fn orientation_deviation(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    let relative = a.inverse() * b;
    2.0 * relative
        .quaternion()
        .imag()
        .norm()
        .atan2(relative.quaternion().scalar().abs())
}

/// One revolute joint of a chain with the fixed transform leading into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub joint: String,
    pub origin: Pose,
    pub axis: Unit<Vector3<f64>>,
    pub lower: f64,
    pub upper: f64,
    pub actuated: bool,
    pub rest: f64,
}

impl Link {
    fn transform(&self, angle: f64) -> Pose {
        self.origin * UnitQuaternion::from_axis_angle(&self.axis, angle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IkOptions {
    pub max_iterations: usize,
    pub damping: f64,
    pub position_tolerance: f64,
    pub orientation_tolerance: f64,
    /// Largest per-joint change in one iteration, radians.
    pub max_step: f64,
    pub match_orientation: bool,
}

impl Default for IkOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            damping: 0.05,
            position_tolerance: 1e-4,
            orientation_tolerance: 1e-3,
            max_step: 0.2,
            match_orientation: true,
        }
    }
}

/// Forward and inverse kinematics for one manipulator group.
///
/// Derived from a descriptor and never mutated; a changed descriptor means
/// building a new chain.
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicChain {
    group: String,
    base: Pose,
    links: Vec<Link>,
    tool: Pose,
}

impl KinematicChain {
    pub fn build(descriptor: &EmbodimentDescriptor, group: &str) -> Result<Self, KinematicsError> {
        let manipulator = descriptor
            .manipulator_group(group)
            .ok_or_else(|| KinematicsError::UnknownGroup(group.to_string()))?;

        let links = manipulator
            .joints
            .iter()
            .map(|name| {
                descriptor
                    .joint(name)
                    .map(|joint| Link {
                        joint: joint.name.clone(),
                        origin: joint.origin,
                        axis: Unit::new_normalize(joint.axis),
                        lower: joint.lower_limit,
                        upper: joint.upper_limit,
                        actuated: joint.is_actuated,
                        rest: joint.rest,
                    })
                    .ok_or_else(|| KinematicsError::UnknownGroup(group.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            group: group.to_string(),
            base: *descriptor.base_offset(),
            links,
            tool: manipulator.end_effector.tool_offset,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn actuated_count(&self) -> usize {
        self.links.iter().filter(|l| l.actuated).count()
    }

    pub fn rest_angles(&self) -> Vec<f64> {
        self.links.iter().map(|l| l.rest).collect()
    }

    /// World position of the first joint; the envelope is centred here.
    pub fn root_position(&self) -> Point3<f64> {
        let root = match self.links.first() {
            Some(link) => self.base * link.origin,
            None => self.base,
        };
        Point3::from(root.translation.vector)
    }

    /// Clamp into limits; unactuated joints are pinned to their rest value.
    pub fn clamp_angles(&self, angles: &mut [f64]) {
        for (angle, link) in angles.iter_mut().zip(&self.links) {
            *angle = if link.actuated {
                angle.clamp(link.lower, link.upper)
            } else {
                link.rest
            };
        }
    }

    fn check(&self, angles: &[f64]) -> Result<(), KinematicsError> {
        if angles.len() != self.links.len() {
            return Err(KinematicsError::DimensionMismatch {
                expected: self.links.len(),
                got: angles.len(),
            });
        }
        for (&value, link) in angles.iter().zip(&self.links) {
            if !(value >= link.lower - LIMIT_EPS && value <= link.upper + LIMIT_EPS) {
                return Err(KinematicsError::OutOfLimits {
                    joint: link.joint.clone(),
                    value,
                    lower: link.lower,
                    upper: link.upper,
                });
            }
        }
        Ok(())
    }

    pub fn forward(&self, angles: &[f64]) -> Result<Pose, KinematicsError> {
        self.check(angles)?;
        Ok(self.end_effector(angles))
    }

    fn end_effector(&self, angles: &[f64]) -> Pose {
        let mut pose = self.base;
        for (link, &angle) in self.links.iter().zip(angles) {
            pose *= link.transform(angle);
        }
        pose * self.tool
    }

    /// Frames just before each joint rotation, then the end-effector pose.
    fn frames(&self, angles: &[f64]) -> (Vec<Pose>, Pose) {
        let mut pose = self.base;
        let mut frames = Vec::with_capacity(self.links.len());
        for (link, &angle) in self.links.iter().zip(angles) {
            let joint_frame = pose * link.origin;
            frames.push(joint_frame);
            pose = joint_frame * UnitQuaternion::from_axis_angle(&link.axis, angle);
        }
        (frames, pose * self.tool)
    }

    fn jacobian(&self, frames: &[Pose], end: &Pose) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(6, self.links.len());
        let p_end = end.translation.vector;

        for (col, (link, frame)) in self.links.iter().zip(frames).enumerate() {
            if !link.actuated {
                continue;
            }
            let axis = frame.rotation * link.axis.into_inner();
            let linear = axis.cross(&(p_end - frame.translation.vector));
            for row in 0..3 {
                jacobian[(row, col)] = linear[row];
                jacobian[(row + 3, col)] = axis[row];
            }
        }

        jacobian
    }

    fn residual(target: &Pose, current: &Pose) -> (Vector3<f64>, Vector3<f64>) {
        let position = target.translation.vector - current.translation.vector;
        let orientation = (target.rotation * current.rotation.inverse()).scaled_axis();
        (position, orientation)
    }

    pub fn solve(&self, target: &Pose, options: &IkOptions) -> Result<Vec<f64>, Infeasible> {
        self.solve_from(target, &self.rest_angles(), options)
    }

    /// Damped least squares from `seed`; every iterate stays within limits.
    pub fn solve_from(
        &self,
        target: &Pose,
        seed: &[f64],
        options: &IkOptions,
    ) -> Result<Vec<f64>, Infeasible> {
        let mut angles = self.rest_angles();
        for (angle, value) in angles.iter_mut().zip(seed) {
            *angle = *value;
        }
        self.clamp_angles(&mut angles);

        let weight = if options.match_orientation { 1.0 } else { 0.0 };
        let damping = DMatrix::<f64>::identity(6, 6) * options.damping.powi(2);
        let mut position_error = f64::INFINITY;
        let mut orientation_error = f64::INFINITY;

        for iteration in 0..=options.max_iterations {
            let (frames, end) = self.frames(&angles);
            let (dp, dw) = Self::residual(target, &end);
            position_error = dp.norm();
            orientation_error = dw.norm();

            let converged = position_error <= options.position_tolerance
                && (!options.match_orientation
                    || orientation_error <= options.orientation_tolerance);
            if converged {
                return Ok(angles);
            }
            if iteration == options.max_iterations {
                break;
            }

            let mut jacobian = self.jacobian(&frames, &end);
            for row in 3..6 {
                for col in 0..jacobian.ncols() {
                    jacobian[(row, col)] *= weight;
                }
            }
            let error = Vector6::new(dp.x, dp.y, dp.z, dw.x * weight, dw.y * weight, dw.z * weight);
            let error = DVector::from_column_slice(error.as_slice());

            let jjt = &jacobian * jacobian.transpose() + &damping;
            let Some(cholesky) = jjt.cholesky() else {
                break;
            };
            let mut delta = jacobian.transpose() * cholesky.solve(&error);

            let largest = delta.amax();
            if largest > options.max_step {
                delta *= options.max_step / largest;
            }

            for (angle, step) in angles.iter_mut().zip(delta.iter()) {
                *angle += step;
            }
            self.clamp_angles(&mut angles);
        }

        Err(Infeasible {
            iterations: options.max_iterations,
            position_error,
            orientation_error,
        })
    }
}
