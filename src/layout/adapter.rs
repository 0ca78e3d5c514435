use std::collections::BTreeMap;
use std::f64::consts::PI;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::kinematics::{orientation_deviation, Pose};
use crate::layout::template::{PlacementDirective, Role, SceneLayoutTemplate};
use crate::workspace::ReachabilityEnvelope;

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Horizontal directions tried per ring.
    pub perturbation_directions: usize,
    /// Ring radii as multiples of the required separation.
    pub ring_scales: Vec<f64>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            perturbation_directions: 8,
            ring_scales: vec![1.0, 1.5, 2.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptedDirective {
    pub directive: PlacementDirective,
    pub adapted_pose: Pose,
    /// Manipulator group responsible for the object; `None` for obstacles.
    pub group: Option<String>,
    pub displacement: f64,
    pub feasible: bool,
    pub perturbed: bool,
}

impl AdaptedDirective {
    fn footprint(&self) -> f64 {
        self.directive.footprint
    }

    fn position(&self) -> Vector3<f64> {
        self.adapted_pose.translation.vector
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collision {
    pub first: String,
    pub second: String,
    pub distance: f64,
    pub required: f64,
}

/// A task layout instantiated for one embodiment. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptedSceneLayout {
    pub task: String,
    pub embodiment: String,
    pub min_separation: f64,
    pub directives: Vec<AdaptedDirective>,
    pub collisions: Vec<Collision>,
    pub layout_valid: bool,
}

impl AdaptedSceneLayout {
    pub fn directive(&self, object_id: &str) -> Option<&AdaptedDirective> {
        self.directives
            .iter()
            .find(|d| d.directive.object_id == object_id)
    }

    pub fn invalid_directives(&self) -> Vec<String> {
        self.directives
            .iter()
            .filter(|d| !d.feasible)
            .map(|d| d.directive.object_id.clone())
            .collect()
    }

    pub fn colliding_pairs(&self) -> Vec<(String, String)> {
        self.collisions
            .iter()
            .map(|c| (c.first.clone(), c.second.clone()))
            .collect()
    }
}

/// Stateless transform from a template to an embodiment-specific layout.
#[derive(Debug, Clone, Default)]
pub struct SceneLayoutAdapter {
    pub config: AdapterConfig,
}

impl SceneLayoutAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    pub fn adapt(
        &self,
        template: &SceneLayoutTemplate,
        envelopes: &BTreeMap<String, ReachabilityEnvelope>,
        embodiment: &str,
    ) -> AdaptedSceneLayout {
        let mut directives = template
            .directives
            .iter()
            .map(|directive| resolve(directive, envelopes))
            .collect::<Vec<_>>();

        self.separate(&mut directives, envelopes, template.min_separation);

        let collisions = find_collisions(&directives, template.min_separation);
        let layout_valid = collisions.is_empty() && directives.iter().all(|d| d.feasible);

        if !layout_valid {
            tracing::warn!(
                task = template.task.as_str(),
                embodiment,
                infeasible = directives.iter().filter(|d| !d.feasible).count(),
                collisions = collisions.len(),
                "layout cannot be adapted"
            );
        }

        AdaptedSceneLayout {
            task: template.task.clone(),
            embodiment: embodiment.to_string(),
            min_separation: template.min_separation,
            directives,
            collisions,
            layout_valid,
        }
    }

    /// Settle obstacles first, then every movable object in index order; an
    /// object overlapping anything already settled is moved to the nearest
    /// clear candidate.
    fn separate(
        &self,
        directives: &mut [AdaptedDirective],
        envelopes: &BTreeMap<String, ReachabilityEnvelope>,
        min_separation: f64,
    ) {
        let mut settled: Vec<usize> = directives
            .iter()
            .enumerate()
            .filter(|(_, d)| d.directive.role == Role::Obstacle)
            .map(|(i, _)| i)
            .collect();

        for index in 0..directives.len() {
            if directives[index].directive.role == Role::Obstacle {
                continue;
            }

            let blocker = settled
                .iter()
                .copied()
                .find(|&other| {
                    overlap(&directives[index], &directives[other], min_separation).is_some()
                });

            if let Some(blocker) = blocker {
                let required = directives[index].footprint()
                    + directives[blocker].footprint()
                    + min_separation;
                let envelope = directives[index]
                    .group
                    .as_ref()
                    .and_then(|group| envelopes.get(group));

                let outcome = self.perturb(&directives[index], envelope, required, |candidate| {
                    settled
                        .iter()
                        .all(|&other| {
                            overlap(candidate, &directives[other], min_separation).is_none()
                        })
                });

                match outcome {
                    Some(moved) => {
                        tracing::debug!(
                            object_id = moved.directive.object_id.as_str(),
                            displacement = moved.displacement,
                            "perturbed colliding object"
                        );
                        directives[index] = moved;
                    }
                    None => {
                        tracing::warn!(
                            object_id = directives[index].directive.object_id.as_str(),
                            blocker = directives[blocker].directive.object_id.as_str(),
                            "no collision-free placement within search bound"
                        );
                    }
                }
            }

            settled.push(index);
        }
    }

    /// Candidate offsets on horizontal rings around the current placement,
    /// pulled back into the envelope, tried smallest displacement first.
    fn perturb(
        &self,
        current: &AdaptedDirective,
        envelope: Option<&ReachabilityEnvelope>,
        required: f64,
        clear: impl Fn(&AdaptedDirective) -> bool,
    ) -> Option<AdaptedDirective> {
        let directions = self.config.perturbation_directions.max(1);
        let mut candidates = Vec::new();

        for scale in &self.config.ring_scales {
            for step in 0..directions {
                let angle = 2.0 * PI * step as f64 / directions as f64;
                let offset = Vector3::new(angle.cos(), angle.sin(), 0.0) * (scale * required);

                let mut pose = current.adapted_pose;
                pose.translation.vector += offset;
                if let Some(envelope) = envelope {
                    if !envelope.contains(&pose, current.directive.orientation_tolerance) {
                        pose = envelope.clamp_into(&pose);
                    }
                }

                let shift = (pose.translation.vector - current.position()).norm();
                candidates.push((shift, candidates.len(), pose));
            }
        }

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        candidates.into_iter().find_map(|(_, _, pose)| {
            let reference = &current.directive.reference_pose;
            let displacement = (pose.translation.vector - reference.translation.vector).norm();
            let deviation = orientation_deviation(&reference.rotation, &pose.rotation);

            let moved = AdaptedDirective {
                adapted_pose: pose,
                displacement,
                perturbed: true,
                ..current.clone()
            };

            let keeps_feasibility = !current.feasible
                || (displacement <= current.directive.tolerance + EPS
                    && deviation <= current.directive.orientation_tolerance + EPS);

            (keeps_feasibility && clear(&moved)).then_some(moved)
        })
    }
}

/// Nearest envelope centroid by reference position; ties go to the first group.
fn assign<'a>(
    directive: &PlacementDirective,
    envelopes: &'a BTreeMap<String, ReachabilityEnvelope>,
) -> Option<(&'a String, &'a ReachabilityEnvelope)> {
    let position = directive.reference_pose.translation.vector;
    envelopes.iter().fold(None, |best, (group, envelope)| {
        let distance = (envelope.centroid().coords - position).norm();
        match best {
            Some((_, _, best_distance)) if best_distance <= distance + EPS => best,
            _ => Some((group, envelope, distance)),
        }
    })
    .map(|(group, envelope, _)| (group, envelope))
}

fn resolve(
    directive: &PlacementDirective,
    envelopes: &BTreeMap<String, ReachabilityEnvelope>,
) -> AdaptedDirective {
    let unchanged = |group: Option<String>, feasible: bool| AdaptedDirective {
        directive: directive.clone(),
        adapted_pose: directive.reference_pose,
        group,
        displacement: 0.0,
        feasible,
        perturbed: false,
    };

    if directive.role == Role::Obstacle {
        return unchanged(None, true);
    }

    let Some((group, envelope)) = assign(directive, envelopes) else {
        tracing::warn!(
            object_id = directive.object_id.as_str(),
            "no manipulator group to reach object"
        );
        return unchanged(None, false);
    };

    if envelope.contains(&directive.reference_pose, directive.orientation_tolerance) {
        return unchanged(Some(group.clone()), true);
    }

    let clamped = envelope.clamp_into(&directive.reference_pose);
    let displacement =
        (clamped.translation.vector - directive.reference_pose.translation.vector).norm();
    let deviation = orientation_deviation(&directive.reference_pose.rotation, &clamped.rotation);
    let feasible = displacement <= directive.tolerance + EPS
        && deviation <= directive.orientation_tolerance + EPS;

    if feasible {
        tracing::debug!(
            object_id = directive.object_id.as_str(),
            group = group.as_str(),
            displacement,
            "clamped object into reach"
        );
    } else {
        tracing::warn!(
            object_id = directive.object_id.as_str(),
            group = group.as_str(),
            displacement,
            tolerance = directive.tolerance,
            "object out of reach beyond tolerance"
        );
    }

    AdaptedDirective {
        directive: directive.clone(),
        adapted_pose: clamped,
        group: Some(group.clone()),
        displacement,
        feasible,
        perturbed: false,
    }
}

/// `Some((distance, required))` when the two footprints are too close.
fn overlap(a: &AdaptedDirective, b: &AdaptedDirective, min_separation: f64) -> Option<(f64, f64)> {
    let distance = (a.position() - b.position()).norm();
    let required = a.footprint() + b.footprint() + min_separation;
    (distance < required - EPS).then_some((distance, required))
}

fn find_collisions(directives: &[AdaptedDirective], min_separation: f64) -> Vec<Collision> {
    let mut collisions = Vec::new();
    for (i, a) in directives.iter().enumerate() {
        for b in &directives[i + 1..] {
            if let Some((distance, required)) = overlap(a, b, min_separation) {
                collisions.push(Collision {
                    first: a.directive.object_id.clone(),
                    second: b.directive.object_id.clone(),
                    distance,
                    required,
                });
            }
        }
    }
    collisions
}
