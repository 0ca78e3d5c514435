pub mod adapter;
pub mod template;

pub use adapter::{
    AdaptedDirective, AdaptedSceneLayout, AdapterConfig, Collision, SceneLayoutAdapter,
};
pub use template::{PlacementDirective, Role, SceneLayoutTemplate};
