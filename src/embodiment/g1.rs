use crate::embodiment::descriptor::EmbodimentDescriptor;
use crate::embodiment::hands::HandModel;
use crate::embodiment::humanoid::{Body, HumanoidLayout, JointTemplate};
use crate::embodiment::Embodiment;
use crate::error::ValidationError;

const X: [f64; 3] = [1.0, 0.0, 0.0];
const Y: [f64; 3] = [0.0, 1.0, 0.0];
const Z: [f64; 3] = [0.0, 0.0, 1.0];

lazy_static! {
    static ref G1_LAYOUT: HumanoidLayout = HumanoidLayout {
        family: "g1",
        waist: [
            JointTemplate::new("waist_yaw", [0.0, 0.0, 0.0], Z, (-2.618, 2.618)),
            JointTemplate::new("waist_roll", [-0.0039635, 0.0, 0.035], X, (-0.52, 0.52)),
            JointTemplate::new("waist_pitch", [0.0, 0.0, 0.019], Y, (-0.52, 0.52)),
        ],
        arm: [
            JointTemplate::new(
                "shoulder_pitch",
                [0.0039563, 0.10022, 0.24778],
                Y,
                (-3.0892, 2.6704),
            ),
            JointTemplate::new("shoulder_roll", [0.0, 0.038, -0.013831], X, (-1.5882, 2.2515))
                .with_rest(0.1),
            JointTemplate::new("shoulder_yaw", [0.0, 0.00624, -0.1032], Z, (-2.618, 2.618)),
            JointTemplate::new("elbow", [0.015783, 0.0, -0.080518], Y, (-1.0472, 2.0944))
                .with_rest(-0.2),
            JointTemplate::new(
                "wrist_roll",
                [0.1, 0.00188791, -0.01],
                X,
                (-1.972222054, 1.972222054),
            ),
            JointTemplate::new("wrist_pitch", [0.038, 0.0, 0.0], Y, (-1.614429558, 1.614429558)),
            JointTemplate::new("wrist_yaw", [0.046, 0.0, 0.0], Z, (-1.614429558, 1.614429558)),
        ],
        head: [
            JointTemplate::new("head_yaw", [0.0, 0.0, 0.42], Z, (-1.0, 1.0)),
            JointTemplate::new("head_roll", [0.0, 0.0, 0.03], X, (-0.4, 0.4)),
            JointTemplate::new("head_pitch", [0.0, 0.0, 0.02], Y, (-0.5, 0.7)),
        ],
        leg: [
            JointTemplate::new("hip_pitch", [0.0, 0.064452, -0.1027], Y, (-2.5307, 2.8798)),
            JointTemplate::new("hip_roll", [0.0, 0.052, -0.030465], X, (-0.5236, 2.9671)),
            JointTemplate::new("hip_yaw", [0.025001, 0.0, -0.12412], Z, (-2.7576, 2.7576)),
            JointTemplate::new("knee", [-0.078273, 0.0021489, -0.17734], Y, (-0.087267, 2.8798)),
            JointTemplate::new("ankle_pitch", [0.0, -9.4445e-05, -0.30001], Y, (-0.87267, 0.5236)),
            JointTemplate::new("ankle_roll", [0.0, 0.0, -0.017558], X, (-0.2618, 0.2618)),
        ],
        default_hands: HandModel::Dex31,
        base_height: 0.793,
    };
}

/// Unitree G1 humanoid, the target embodiment for the unified task corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct G1 {
    pub body: Body,
    pub hands: Option<HandModel>,
}

impl Embodiment for G1 {
    fn family(&self) -> &'static str {
        G1_LAYOUT.family
    }

    fn variant_name(&self) -> String {
        match self.hands {
            Some(hands) => format!("G1{}{}Hands", self.body.name(), hands.name()),
            None => format!("G1{}", self.body.name()),
        }
    }

    fn default_hands(&self) -> HandModel {
        G1_LAYOUT.default_hands
    }

    fn describe(&self) -> Result<EmbodimentDescriptor, ValidationError> {
        let hands = self.hands.unwrap_or_else(|| self.default_hands());
        G1_LAYOUT.describe(&self.variant_name(), self.body, hands)
    }
}
