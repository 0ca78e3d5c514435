//! Workspace reachability: sampled envelopes per manipulator group.
//!
//! An envelope is a radial profile around the chain root. Directions are
//! binned by azimuth and elevation; every occupied bin keeps the radial
//! interval its samples reached and the end-effector orientations recorded
//! there. A position is reachable when its bin is occupied and its radius
//! falls inside that bin's interval.

use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, PI};

use nalgebra::{Point3, UnitQuaternion, Vector3};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::embodiment::EmbodimentDescriptor;
use crate::error::KinematicsError;
use crate::kinematics::{orientation_deviation, KinematicChain, Pose};

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityConfig {
    /// Upper bound on the full-factorial grid over actuated joints.
    pub grid_budget: usize,
    /// Random samples top the grid up to at least this many.
    pub min_samples: usize,
    pub azimuth_bins: usize,
    pub elevation_bins: usize,
    pub seed: u64,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            grid_budget: 4096,
            min_samples: 4096,
            azimuth_bins: 24,
            elevation_bins: 12,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrientationSet {
    /// Every orientation is admissible.
    Any,
    Discrete(Vec<UnitQuaternion<f64>>),
}

impl OrientationSet {
    /// Nearest admissible orientation and its angular deviation.
    fn nearest(&self, rotation: &UnitQuaternion<f64>) -> (UnitQuaternion<f64>, f64) {
        match self {
            OrientationSet::Any => (*rotation, 0.0),
            OrientationSet::Discrete(set) => set
                .iter()
                .map(|candidate| (*candidate, orientation_deviation(rotation, candidate)))
                .fold((*rotation, f64::INFINITY), |best, next| {
                    if next.1 < best.1 {
                        next
                    } else {
                        best
                    }
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Bin {
    min_radius: f64,
    max_radius: f64,
    orientations: OrientationSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReachabilityEnvelope {
    center: Point3<f64>,
    centroid: Point3<f64>,
    azimuth_bins: usize,
    elevation_bins: usize,
    bins: Vec<Option<Bin>>,
    samples: Vec<Pose>,
}

impl ReachabilityEnvelope {
    /// Sample the chain's joint space and record every end-effector pose.
    pub fn sample(chain: &KinematicChain, config: &ReachabilityConfig) -> Self {
        let configurations = sample_configurations(chain, config);
        let poses = configurations
            .iter()
            .filter_map(|angles| chain.forward(angles).ok())
            .collect::<Vec<_>>();

        let envelope = Self::from_samples(
            chain.root_position(),
            poses,
            config.azimuth_bins,
            config.elevation_bins,
        );

        tracing::debug!(
            group = chain.group(),
            samples = envelope.samples.len(),
            occupied = envelope.occupied_bins(),
            max_reach = envelope.max_reach(),
            "built reachability envelope"
        );

        envelope
    }

    pub fn from_samples(
        center: Point3<f64>,
        samples: Vec<Pose>,
        azimuth_bins: usize,
        elevation_bins: usize,
    ) -> Self {
        let azimuth_bins = azimuth_bins.max(1);
        let elevation_bins = elevation_bins.max(1);
        let centroid = if samples.is_empty() {
            center
        } else {
            let sum = samples
                .iter()
                .fold(Vector3::zeros(), |acc, pose| acc + pose.translation.vector);
            Point3::from(sum / samples.len() as f64)
        };

        let mut envelope = Self {
            center,
            centroid,
            azimuth_bins,
            elevation_bins,
            bins: vec![None; azimuth_bins * elevation_bins],
            samples: Vec::new(),
        };

        for pose in &samples {
            let offset = pose.translation.vector - center.coords;
            let radius = offset.norm();
            let bin = envelope.bin_of(&offset);

            let slot = &mut envelope.bins[bin];
            if let Some(existing) = slot.as_mut() {
                existing.min_radius = existing.min_radius.min(radius);
                existing.max_radius = existing.max_radius.max(radius);
                if let OrientationSet::Discrete(set) = &mut existing.orientations {
                    set.push(pose.rotation);
                }
            } else {
                *slot = Some(Bin {
                    min_radius: radius,
                    max_radius: radius,
                    orientations: OrientationSet::Discrete(vec![pose.rotation]),
                });
            }
        }

        envelope.samples = samples;
        envelope
    }

    /// Solid ball of `radius` around `center` with unconstrained orientation.
    pub fn spherical(
        center: Point3<f64>,
        radius: f64,
        azimuth_bins: usize,
        elevation_bins: usize,
    ) -> Self {
        let azimuth_bins = azimuth_bins.max(1);
        let elevation_bins = elevation_bins.max(1);
        let bin = Bin {
            min_radius: 0.0,
            max_radius: radius,
            orientations: OrientationSet::Any,
        };
        Self {
            center,
            centroid: center,
            azimuth_bins,
            elevation_bins,
            bins: vec![Some(bin); azimuth_bins * elevation_bins],
            samples: Vec::new(),
        }
    }

    pub fn center(&self) -> &Point3<f64> {
        &self.center
    }

    /// Mean sampled end-effector position; where the manipulator "lives".
    pub fn centroid(&self) -> &Point3<f64> {
        &self.centroid
    }

    pub fn samples(&self) -> &[Pose] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.bins.iter().all(Option::is_none)
    }

    pub fn occupied_bins(&self) -> usize {
        self.bins.iter().filter(|b| b.is_some()).count()
    }

    pub fn max_reach(&self) -> f64 {
        self.bins
            .iter()
            .flatten()
            .map(|b| b.max_radius)
            .fold(0.0, f64::max)
    }

    fn bin_of(&self, offset: &Vector3<f64>) -> usize {
        let radius = offset.norm();
        if radius < EPS {
            return 0;
        }
        let azimuth = offset.y.atan2(offset.x);
        let elevation = (offset.z / radius).clamp(-1.0, 1.0).asin();

        let a = (((azimuth + PI) / (2.0 * PI)) * self.azimuth_bins as f64).floor() as usize;
        let e = (((elevation + FRAC_PI_2) / PI) * self.elevation_bins as f64).floor() as usize;
        e.min(self.elevation_bins - 1) * self.azimuth_bins + a.min(self.azimuth_bins - 1)
    }

    fn bin_direction(&self, bin: usize) -> Vector3<f64> {
        let a = bin % self.azimuth_bins;
        let e = bin / self.azimuth_bins;
        let azimuth = (a as f64 + 0.5) / self.azimuth_bins as f64 * 2.0 * PI - PI;
        let elevation = (e as f64 + 0.5) / self.elevation_bins as f64 * PI - FRAC_PI_2;
        Vector3::new(
            elevation.cos() * azimuth.cos(),
            elevation.cos() * azimuth.sin(),
            elevation.sin(),
        )
    }

    /// Whether the position is inside the envelope and the orientation lies
    /// within `orientation_tolerance` radians of an admissible one.
    pub fn contains(&self, pose: &Pose, orientation_tolerance: f64) -> bool {
        let offset = pose.translation.vector - self.center.coords;
        let radius = offset.norm();

        match &self.bins[self.bin_of(&offset)] {
            Some(bin) => {
                radius >= bin.min_radius - EPS
                    && radius <= bin.max_radius + EPS
                    && bin.orientations.nearest(&pose.rotation).1 <= orientation_tolerance + EPS
            }
            None => false,
        }
    }

    /// Project onto the nearest feasible point.
    ///
    /// Candidates are the radial projection along the pose's own bearing and
    /// along every occupied bin's centre bearing. The winner has the smallest
    /// displacement, then the smallest orientation change, then the lowest
    /// candidate index. The orientation snaps to the nearest admissible one.
    pub fn clamp_into(&self, pose: &Pose) -> Pose {
        if self.contains(pose, 0.0) {
            return *pose;
        }

        let offset = pose.translation.vector - self.center.coords;
        let radius = offset.norm();
        let own = self.bin_of(&offset);
        let own_direction = if radius < EPS {
            self.bin_direction(own)
        } else {
            offset / radius
        };

        let candidates = std::iter::once((own, own_direction)).chain(
            (0..self.bins.len()).map(|bin| (bin, self.bin_direction(bin))),
        );

        let mut best: Option<(f64, f64, Pose)> = None;
        for (bin, direction) in candidates {
            let Some(slot) = &self.bins[bin] else {
                continue;
            };
            let projected = radius.clamp(slot.min_radius, slot.max_radius);
            let position = self.center.coords + direction * projected;
            let (rotation, deviation) = slot.orientations.nearest(&pose.rotation);
            let displacement = (position - pose.translation.vector).norm();

            let better = match &best {
                None => true,
                Some((best_displacement, best_deviation, _)) => {
                    if (displacement - best_displacement).abs() > EPS {
                        displacement < *best_displacement
                    } else {
                        deviation < best_deviation - EPS
                    }
                }
            };
            if better {
                best = Some((
                    displacement,
                    deviation,
                    Pose::from_parts(position.into(), rotation),
                ));
            }
        }

        best.map(|(_, _, pose)| pose).unwrap_or(*pose)
    }
}

/// Full-factorial grid over actuated joints when it fits the budget, topped
/// up with seeded uniform samples.
fn sample_configurations(chain: &KinematicChain, config: &ReachabilityConfig) -> Vec<Vec<f64>> {
    let rest = chain.rest_angles();
    let actuated = chain
        .links()
        .iter()
        .enumerate()
        .filter(|(_, l)| l.actuated)
        .map(|(i, _)| i)
        .collect::<Vec<_>>();

    let mut configurations = Vec::new();
    if actuated.is_empty() {
        configurations.push(rest);
        return configurations;
    }

    let per_joint = (config.grid_budget as f64)
        .powf(1.0 / actuated.len() as f64)
        .floor() as usize;
    let fits = per_joint >= 2
        && (per_joint as f64).powi(actuated.len() as i32) <= config.grid_budget as f64;

    if fits {
        let total = per_joint.pow(actuated.len() as u32);
        for mut code in 0..total {
            let mut angles = rest.clone();
            for &joint in &actuated {
                let link = &chain.links()[joint];
                let step = code % per_joint;
                code /= per_joint;
                let t = step as f64 / (per_joint - 1) as f64;
                angles[joint] = link.lower + t * (link.upper - link.lower);
            }
            configurations.push(angles);
        }
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
    while configurations.len() < config.min_samples.max(1) {
        let mut angles = rest.clone();
        for &joint in &actuated {
            let link = &chain.links()[joint];
            angles[joint] = if link.upper > link.lower {
                rng.gen_range(link.lower..=link.upper)
            } else {
                link.lower
            };
        }
        configurations.push(angles);
    }

    configurations
}

/// Descriptor plus the chains and envelopes derived from it.
///
/// Built once per embodiment and shared read-only between environments.
#[derive(Debug, Clone)]
pub struct Workspace {
    descriptor: EmbodimentDescriptor,
    chains: BTreeMap<String, KinematicChain>,
    envelopes: BTreeMap<String, ReachabilityEnvelope>,
}

impl Workspace {
    pub fn build(
        descriptor: EmbodimentDescriptor,
        config: &ReachabilityConfig,
    ) -> Result<Self, KinematicsError> {
        let mut chains = BTreeMap::new();
        let mut envelopes = BTreeMap::new();

        for group in descriptor.manipulator_groups() {
            let chain = KinematicChain::build(&descriptor, &group.name)?;
            envelopes.insert(group.name.clone(), ReachabilityEnvelope::sample(&chain, config));
            chains.insert(group.name.clone(), chain);
        }

        tracing::info!(
            embodiment = descriptor.id(),
            groups = chains.len(),
            actuated = descriptor.actuated_joint_count(),
            "built workspace"
        );

        Ok(Self {
            descriptor,
            chains,
            envelopes,
        })
    }

    pub fn descriptor(&self) -> &EmbodimentDescriptor {
        &self.descriptor
    }

    pub fn chains(&self) -> &BTreeMap<String, KinematicChain> {
        &self.chains
    }

    pub fn chain(&self, group: &str) -> Option<&KinematicChain> {
        self.chains.get(group)
    }

    pub fn envelopes(&self) -> &BTreeMap<String, ReachabilityEnvelope> {
        &self.envelopes
    }
}
