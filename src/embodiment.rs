pub mod descriptor;
pub mod g1;
pub mod gr1;
pub mod hands;
pub mod humanoid;

use std::collections::BTreeMap;

pub use descriptor::{
    ActionGroup, AssetRef, EmbodimentDescriptor, EmbodimentSpec, EndEffector, JointSpec,
    ManipulatorGroup,
};
pub use hands::HandModel;
pub use humanoid::Body;

use crate::embodiment::g1::G1;
use crate::embodiment::gr1::GR1;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn prefix(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Side::Left => "Left",
            Side::Right => "Right",
        }
    }
}

/// A robot family variant that can produce its embodiment descriptor.
///
/// Task code only ever sees the descriptor and what is derived from it, so
/// any family implementing this trait can run the shared task corpus.
pub trait Embodiment: Send + Sync {
    fn family(&self) -> &'static str;

    /// Registered name, e.g. `G1ArmsAndWaistDex31Hands`.
    fn variant_name(&self) -> String;

    fn default_hands(&self) -> HandModel;

    fn describe(&self) -> Result<EmbodimentDescriptor, ValidationError>;
}

type Constructor = fn(Body, Option<HandModel>) -> Box<dyn Embodiment>;

fn g1(body: Body, hands: Option<HandModel>) -> Box<dyn Embodiment> {
    Box::new(G1 { body, hands })
}

fn gr1(body: Body, hands: Option<HandModel>) -> Box<dyn Embodiment> {
    Box::new(GR1 { body, hands })
}

lazy_static! {
    static ref REGISTRY: BTreeMap<String, (Constructor, Body, Option<HandModel>)> = {
        let mut registry = BTreeMap::new();
        let mut register = |ctor: Constructor, body: Body, hands: Option<HandModel>| {
            let name = ctor(body, hands).variant_name();
            registry.insert(name, (ctor, body, hands));
        };

        for body in Body::ALL {
            register(g1, body, None);
            for hands in HandModel::ALL {
                register(g1, body, Some(hands));
            }
        }

        for body in [Body::FixedLowerBody, Body::ArmsOnly, Body::ArmsAndWaist] {
            register(gr1, body, None);
            for hands in [HandModel::Inspire, HandModel::Fourier] {
                register(gr1, body, Some(hands));
            }
        }

        registry
    };
}

pub fn lookup(variant: &str) -> Option<Box<dyn Embodiment>> {
    REGISTRY
        .get(variant)
        .map(|(ctor, body, hands)| ctor(*body, *hands))
}

pub fn registered() -> Vec<String> {
    REGISTRY.keys().cloned().collect()
}
