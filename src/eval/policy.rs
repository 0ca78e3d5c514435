use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use curl::easy::{Easy, List};
use serde::{Deserialize, Serialize};

use crate::environment::{Action, ActionSchema, Observation};
use crate::error::PolicyError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub observation: Observation,
    pub embodiment_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub action: Action,
}

/// Decision source queried once per environment step. May block.
pub trait PolicyClient: Send + Sync {
    fn decide(&self, request: &PolicyRequest) -> Result<Action, PolicyError>;
}

fn check_tag(served: &str, request: &PolicyRequest) -> Result<(), PolicyError> {
    if served != request.embodiment_tag {
        return Err(PolicyError::EmbodimentMismatch {
            served: served.to_string(),
            requested: request.embodiment_tag.clone(),
        });
    }
    Ok(())
}

/// Always answers with the all-zero action.
#[derive(Debug, Clone)]
pub struct NeutralPolicy {
    schema: ActionSchema,
}

impl NeutralPolicy {
    pub fn new(schema: ActionSchema) -> Self {
        Self { schema }
    }
}

impl PolicyClient for NeutralPolicy {
    fn decide(&self, request: &PolicyRequest) -> Result<Action, PolicyError> {
        check_tag(self.schema.tag(), request)?;
        Ok(self.schema.neutral())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Recording {
    embodiment_tag: String,
    actions: Vec<BTreeMap<String, Vec<f64>>>,
}

/// Replays a recorded action sequence indexed by the observation step.
///
/// The file holds `{"embodiment_tag": ..., "actions": [{group: [..]}, ..]}`.
/// Groups missing from a frame and frames past the end are neutral.
#[derive(Debug, Clone)]
pub struct PlaybackPolicy {
    schema: ActionSchema,
    frames: Vec<BTreeMap<String, Vec<f64>>>,
}

impl PlaybackPolicy {
    pub fn new(schema: ActionSchema, frames: Vec<BTreeMap<String, Vec<f64>>>) -> Self {
        Self { schema, frames }
    }

    pub fn from_file(path: &Path, schema: ActionSchema) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading playback file {}", path.display()))?;
        let recording: Recording = serde_json::from_str(&contents)
            .with_context(|| format!("parsing playback file {}", path.display()))?;

        if recording.embodiment_tag != schema.tag() {
            anyhow::bail!(
                "playback recorded for {}, evaluation runs {}",
                recording.embodiment_tag,
                schema.tag()
            );
        }

        Ok(Self::new(schema, recording.actions))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl PolicyClient for PlaybackPolicy {
    fn decide(&self, request: &PolicyRequest) -> Result<Action, PolicyError> {
        check_tag(self.schema.tag(), request)?;

        let mut action = self.schema.neutral();
        if let Some(frame) = self.frames.get(request.observation.step as usize) {
            for (group, values) in frame {
                if let Some(slot) = action.groups.get_mut(group) {
                    *slot = values.clone();
                }
            }
        }
        Ok(action)
    }
}

/// JSON over HTTP to a remote inference service.
///
/// Every transfer is bounded by `timeout`, so a call abandoned by the
/// decision channel still finishes against a hung service.
#[derive(Debug, Clone)]
pub struct HttpPolicy {
    url: String,
    timeout: Duration,
}

impl HttpPolicy {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            timeout,
        }
    }

    fn post(&self, body: &[u8]) -> Result<Vec<u8>, curl::Error> {
        let mut response = Vec::new();
        let mut easy = Easy::new();
        easy.url(&self.url)?;
        easy.timeout(self.timeout)?;
        easy.connect_timeout(self.timeout)?;
        easy.post(true)?;
        easy.post_fields_copy(body)?;

        let mut headers = List::new();
        headers.append("Content-Type: application/json")?;
        headers.append("Expect:")?;
        easy.http_headers(headers)?;

        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| {
                response.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }

        Ok(response)
    }
}

impl PolicyClient for HttpPolicy {
    fn decide(&self, request: &PolicyRequest) -> Result<Action, PolicyError> {
        let body =
            serde_json::to_vec(request).map_err(|e| PolicyError::Decode(e.to_string()))?;
        let response = self
            .post(&body)
            .map_err(|e| PolicyError::Transport(e.to_string()))?;
        let response: PolicyResponse =
            serde_json::from_slice(&response).map_err(|e| PolicyError::Decode(e.to_string()))?;

        if response.action.embodiment_tag != request.embodiment_tag {
            return Err(PolicyError::EmbodimentMismatch {
                served: response.action.embodiment_tag,
                requested: request.embodiment_tag.clone(),
            });
        }
        Ok(response.action)
    }
}
