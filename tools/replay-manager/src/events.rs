use crate::errors::ReplayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostEvent {
    BufferStarted,
    BufferSaved {
        path: Option<PathBuf>,
        scene: Option<String>,
    },
    BufferStopped,
    SceneChanged {
        scene: String,
    },
    Unknown {
        raw_type: String,
    },
}

impl HostEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::BufferStarted => "buffer_started",
            Self::BufferSaved { .. } => "buffer_saved",
            Self::BufferStopped => "buffer_stopped",
            Self::SceneChanged { .. } => "scene_changed",
            Self::Unknown { raw_type } => raw_type.as_str(),
        }
    }
}

pub fn map_host_event(raw: &Value) -> HostEvent {
    if let Some(event_type) = raw.get("eventType").and_then(Value::as_str) {
        return map_relay_event(event_type, raw.get("eventData").unwrap_or(&Value::Null));
    }

    let event_type = raw.get("type").and_then(Value::as_str).unwrap_or("unknown");
    match event_type {
        "replay_buffer.started" => HostEvent::BufferStarted,
        "replay_buffer.saved" => HostEvent::BufferSaved {
            path: str_field(raw, "path").map(PathBuf::from),
            scene: str_field(raw, "scene").map(str::to_string),
        },
        "replay_buffer.stopped" => HostEvent::BufferStopped,
        "scene.changed" => match str_field(raw, "scene") {
            Some(scene) => HostEvent::SceneChanged {
                scene: scene.to_string(),
            },
            None => unknown(event_type),
        },
        _ => unknown(event_type),
    }
}

fn map_relay_event(event_type: &str, data: &Value) -> HostEvent {
    match event_type {
        "ReplayBufferSaved" => HostEvent::BufferSaved {
            path: str_field(data, "savedReplayPath").map(PathBuf::from),
            scene: None,
        },
        "ReplayBufferStateChanged" => match str_field(data, "outputState") {
            Some("OBS_WEBSOCKET_OUTPUT_STARTED") => HostEvent::BufferStarted,
            Some("OBS_WEBSOCKET_OUTPUT_STOPPED") => HostEvent::BufferStopped,
            Some(state) => unknown(&format!("{event_type}:{state}")),
            None => unknown(event_type),
        },
        "CurrentProgramSceneChanged" => match str_field(data, "sceneName") {
            Some(scene) => HostEvent::SceneChanged {
                scene: scene.to_string(),
            },
            None => unknown(event_type),
        },
        _ => unknown(event_type),
    }
}

fn str_field<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn unknown(raw_type: &str) -> HostEvent {
    HostEvent::Unknown {
        raw_type: raw_type.to_string(),
    }
}

pub fn parse_event_line(line: &str) -> Result<HostEvent, ReplayError> {
    let value = serde_json::from_str::<Value>(line).map_err(|err| {
        ReplayError::Protocol(format!(
            "invalid event json: {err}; input={}",
            line.chars().take(256).collect::<String>(),
        ))
    })?;
    if !value.is_object() {
        return Err(ReplayError::Protocol(format!(
            "event must be a json object, got: {}",
            line.chars().take(256).collect::<String>()
        )));
    }
    Ok(map_host_event(&value))
}
