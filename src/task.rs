//! Task naming, goal predicates and the built-in tabletop task registry.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::environment::Observation;
use crate::error::ConstructionError;
use crate::layout::{PlacementDirective, Role, SceneLayoutTemplate};

/// Parsed `<family>_unified/<TaskName>_<Variant>_Env`.
///
/// Per-robot namespaces such as `robocasa_g1_full_dex31_hands/...` are
/// accepted too; the family is the token after `robocasa_`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskId {
    pub namespace: String,
    pub family: String,
    pub task: String,
    pub variant: String,
}

impl TaskId {
    pub fn parse(name: &str) -> Result<Self, ConstructionError> {
        let malformed = |reason: &str| ConstructionError::MalformedTaskName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let (namespace, rest) = name
            .split_once('/')
            .ok_or_else(|| malformed("missing namespace separator '/'"))?;
        let family = namespace
            .strip_suffix("_unified")
            .or_else(|| {
                namespace
                    .strip_prefix("robocasa_")
                    .and_then(|robot| robot.split('_').next())
            })
            .filter(|f| !f.is_empty())
            .ok_or_else(|| malformed("namespace must be <family>_unified or robocasa_<family>_*"))?;
        let body = rest
            .strip_suffix("_Env")
            .ok_or_else(|| malformed("name must end in _Env"))?;
        let (task, variant) = body
            .rsplit_once('_')
            .filter(|(t, v)| !t.is_empty() && !v.is_empty())
            .ok_or_else(|| malformed("expected <TaskName>_<EmbodimentVariant>"))?;

        Ok(Self {
            namespace: namespace.to_string(),
            family: family.to_string(),
            task: task.to_string(),
            variant: variant.to_string(),
        })
    }

    pub fn env_name(&self) -> String {
        format!("{}/{}_{}_Env", self.namespace, self.task, self.variant)
    }
}

/// Goal condition evaluated on every observation.
pub trait SuccessPredicate: Send + Sync + Debug {
    fn is_success(&self, observation: &Observation) -> bool;
}

/// `object` rests (not held) within `radius` of `target` horizontally and
/// within `height` vertically.
#[derive(Debug, Clone)]
pub struct ObjectNear {
    pub object: String,
    pub target: String,
    pub radius: f64,
    pub height: f64,
}

impl SuccessPredicate for ObjectNear {
    fn is_success(&self, observation: &Observation) -> bool {
        let (Some(object), Some(target)) = (
            observation.objects.get(&self.object),
            observation.objects.get(&self.target),
        ) else {
            return false;
        };

        let offset = object.position - target.position;
        object.held_by.is_none()
            && offset.xy().norm() <= self.radius
            && offset.z.abs() <= self.height
    }
}

#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub template: SceneLayoutTemplate,
    pub success: Arc<dyn SuccessPredicate>,
}

/// Resolves task names to (template, predicate) pairs.
pub trait TaskRegistry: Send + Sync {
    fn resolve(&self, task: &TaskId) -> Result<TaskDefinition, ConstructionError>;

    fn tasks(&self) -> Vec<String>;
}

const REFERENCE_EMBODIMENT: &str = "GR1ArmsOnlyFourierHands";

fn pick_and_place(
    task: &str,
    source: (&str, [f64; 3], f64),
    target: (&str, [f64; 3], f64),
    obstacles: &[(&str, [f64; 3], f64)],
) -> TaskDefinition {
    let mut directives = vec![
        PlacementDirective::new(source.0, Role::Source, source.1, 0.15, source.2),
        PlacementDirective::new(target.0, Role::Target, target.1, 0.15, target.2),
    ];
    directives.extend(
        obstacles
            .iter()
            .map(|(id, position, footprint)| {
                PlacementDirective::new(id, Role::Obstacle, *position, 0.0, *footprint)
            }),
    );

    TaskDefinition {
        name: task.to_string(),
        template: SceneLayoutTemplate {
            task: task.to_string(),
            reference_embodiment: REFERENCE_EMBODIMENT.to_string(),
            min_separation: 0.02,
            directives,
        },
        success: Arc::new(ObjectNear {
            object: source.0.to_string(),
            target: target.0.to_string(),
            radius: target.2,
            height: 0.12,
        }),
    }
}

lazy_static! {
    static ref BUILTIN_TASKS: BTreeMap<&'static str, fn() -> TaskDefinition> = {
        let mut tasks: BTreeMap<&'static str, fn() -> TaskDefinition> = BTreeMap::new();
        tasks.insert("EvalPnPAppleToPlate", || {
            pick_and_place(
                "EvalPnPAppleToPlate",
                ("apple", [0.42, -0.16, 1.0], 0.04),
                ("plate", [0.44, 0.16, 0.97], 0.11),
                &[("fruit_bowl", [0.68, 0.0, 0.99], 0.09)],
            )
        });
        tasks.insert("PnPFruitToPlateSplitA", || {
            pick_and_place(
                "PnPFruitToPlateSplitA",
                ("banana", [0.5, -0.2, 1.0], 0.06),
                ("plate", [0.45, 0.18, 0.97], 0.11),
                &[],
            )
        });
        tasks.insert("PosttrainPnPNovelFromPlateToPlateSplitA", || {
            pick_and_place(
                "PosttrainPnPNovelFromPlateToPlateSplitA",
                ("novel_object", [0.46, -0.22, 1.01], 0.05),
                ("target_plate", [0.46, 0.2, 0.97], 0.11),
                &[("kettle", [0.72, -0.05, 1.05], 0.1)],
            )
        });
        tasks.insert("PnPCupToDrawerClose", || {
            pick_and_place(
                "PnPCupToDrawerClose",
                ("cup", [0.4, -0.15, 1.0], 0.05),
                ("drawer", [0.44, 0.16, 0.97], 0.15),
                &[],
            )
        });
        tasks
    };
}

/// The tabletop tasks shipped with the crate, authored against GR1.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTasks;

impl TaskRegistry for BuiltinTasks {
    fn resolve(&self, task: &TaskId) -> Result<TaskDefinition, ConstructionError> {
        BUILTIN_TASKS
            .get(task.task.as_str())
            .map(|make| make())
            .ok_or_else(|| ConstructionError::UnknownTask(task.task.clone()))
    }

    fn tasks(&self) -> Vec<String> {
        BUILTIN_TASKS.keys().map(|k| k.to_string()).collect()
    }
}
