use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::embodiment::EmbodimentDescriptor;
use crate::error::ActionError;

/// Per-tick joint position deltas keyed by action group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub embodiment_tag: String,
    pub groups: BTreeMap<String, Vec<f64>>,
}

/// Shape of the action dictionary for one embodiment.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSchema {
    tag: String,
    groups: BTreeMap<String, Vec<String>>,
}

impl ActionSchema {
    pub fn from_descriptor(descriptor: &EmbodimentDescriptor) -> Self {
        Self {
            tag: descriptor.id().to_string(),
            groups: descriptor
                .action_groups()
                .iter()
                .map(|g| (g.name.clone(), g.joints.clone()))
                .collect(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.groups
    }

    pub fn dimension(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// All-zero deltas: hold the current configuration.
    pub fn neutral(&self) -> Action {
        Action {
            embodiment_tag: self.tag.clone(),
            groups: self
                .groups
                .iter()
                .map(|(name, joints)| (name.clone(), vec![0.0; joints.len()]))
                .collect(),
        }
    }

    pub fn validate(&self, action: &Action) -> Result<(), ActionError> {
        if action.embodiment_tag != self.tag {
            return Err(ActionError::EmbodimentMismatch {
                expected: self.tag.clone(),
                got: action.embodiment_tag.clone(),
            });
        }

        if let Some(unknown) = action.groups.keys().find(|g| !self.groups.contains_key(*g)) {
            return Err(ActionError::UnknownGroup(unknown.clone()));
        }

        for (group, joints) in &self.groups {
            let values = action
                .groups
                .get(group)
                .ok_or_else(|| ActionError::MissingGroup(group.clone()))?;
            if values.len() != joints.len() {
                return Err(ActionError::Dimension {
                    group: group.clone(),
                    expected: joints.len(),
                    got: values.len(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ActionError::NonFinite {
                    group: group.clone(),
                });
            }
        }

        Ok(())
    }
}
