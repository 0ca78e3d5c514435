use crate::embodiment::descriptor::EmbodimentDescriptor;
use crate::embodiment::hands::HandModel;
use crate::embodiment::humanoid::{Body, HumanoidLayout, JointTemplate};
use crate::embodiment::Embodiment;
use crate::error::ValidationError;

const X: [f64; 3] = [1.0, 0.0, 0.0];
const Y: [f64; 3] = [0.0, 1.0, 0.0];
const Z: [f64; 3] = [0.0, 0.0, 1.0];

lazy_static! {
    static ref GR1_LAYOUT: HumanoidLayout = HumanoidLayout {
        family: "gr1",
        waist: [
            JointTemplate::new("waist_yaw", [0.0, 0.0, 0.0], Z, (-1.05, 1.05)),
            JointTemplate::new("waist_pitch", [0.0, 0.0, 0.046], Y, (-0.52, 1.22)),
            JointTemplate::new("waist_roll", [0.0, 0.0, 0.074], X, (-0.7, 0.7)),
        ],
        arm: [
            JointTemplate::new("shoulder_pitch", [0.0, 0.12774, 0.3617], Y, (-2.79, 1.92)),
            JointTemplate::new("shoulder_roll", [0.0, 0.0525, 0.0], X, (-0.57, 3.27))
                .with_rest(0.1),
            JointTemplate::new("shoulder_yaw", [0.0, 0.0, -0.1085], Z, (-2.97, 2.97)),
            JointTemplate::new("elbow", [0.0, 0.0, -0.1715], Y, (-2.27, 2.27))
                .with_rest(-0.2),
            JointTemplate::new("wrist_roll", [0.1285, 0.0, 0.0], X, (-2.97, 2.97)),
            JointTemplate::new("wrist_pitch", [0.07, 0.0, 0.0], Y, (-0.61, 0.61)),
            JointTemplate::new("wrist_yaw", [0.05, 0.0, 0.0], Z, (-0.61, 0.61)),
        ],
        head: [
            JointTemplate::new("head_yaw", [0.0, 0.0, 0.47], Z, (-2.71, 2.71)),
            JointTemplate::new("head_roll", [0.0, 0.0, 0.03], X, (-0.35, 0.35)),
            JointTemplate::new("head_pitch", [0.0, 0.0, 0.03], Y, (-0.52, 0.35)),
        ],
        leg: [
            JointTemplate::new("hip_roll", [0.0, 0.105, -0.06], X, (-0.09, 0.79)),
            JointTemplate::new("hip_yaw", [0.0, 0.0, -0.04], Z, (-0.7, 0.7)),
            JointTemplate::new("hip_pitch", [0.0, 0.0, -0.05], Y, (-1.75, 0.7)),
            JointTemplate::new("knee_pitch", [0.0, 0.0, -0.38], Y, (-0.09, 1.92)),
            JointTemplate::new("ankle_pitch", [0.0, 0.0, -0.36], Y, (-1.05, 0.52)),
            JointTemplate::new("ankle_roll", [0.0, 0.0, -0.02], X, (-0.44, 0.44)),
        ],
        default_hands: HandModel::Fourier,
        base_height: 0.95,
    };
}

/// Fourier GR1 humanoid, the reference embodiment the task corpus was
/// authored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GR1 {
    pub body: Body,
    pub hands: Option<HandModel>,
}

impl Embodiment for GR1 {
    fn family(&self) -> &'static str {
        GR1_LAYOUT.family
    }

    fn variant_name(&self) -> String {
        match self.hands {
            Some(hands) => format!("GR1{}{}Hands", self.body.name(), hands.name()),
            None => format!("GR1{}", self.body.name()),
        }
    }

    fn default_hands(&self) -> HandModel {
        GR1_LAYOUT.default_hands
    }

    fn describe(&self) -> Result<EmbodimentDescriptor, ValidationError> {
        let hands = self.hands.unwrap_or_else(|| self.default_hands());
        GR1_LAYOUT.describe(&self.variant_name(), self.body, hands)
    }
}
