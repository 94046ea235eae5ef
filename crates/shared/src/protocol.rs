use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, WorkerErrorKind};

pub const READY_STATUS_TEXT: &str = "LLM ready!";
pub const GENERATING_STATUS_TEXT: &str = "generating";

const COMMAND_TAGS: &[&str] = &["init", "generate"];
const EVENT_TAGS: &[&str] = &["llm-status", "llm-response"];

/// Controller → worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerCommand {
    Init,
    Generate { data: String },
}

impl WorkerCommand {
    pub fn generate(prompt: impl Into<String>) -> Self {
        Self::Generate {
            data: prompt.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Generate { .. } => "generate",
        }
    }
}

/// Worker → controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerEvent {
    #[serde(rename = "llm-status")]
    Status { data: StatusUpdate },
    #[serde(rename = "llm-response")]
    Response {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl WorkerEvent {
    pub fn status(update: StatusUpdate) -> Self {
        Self::Status { data: update }
    }

    pub fn response(text: impl Into<String>) -> Self {
        Self::Response {
            data: text.into(),
            error: None,
        }
    }

    pub fn failed_response(kind: WorkerErrorKind, error: impl Into<String>) -> Self {
        Self::Response {
            data: kind.user_notice().to_string(),
            error: Some(error.into()),
        }
    }

    pub fn not_ready() -> Self {
        Self::response(WorkerErrorKind::NotReadyRejection.user_notice())
    }
}

/// Phase label with optional load progress and error, superseding the previous one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            progress: None,
            error: None,
        }
    }

    pub fn with_progress(text: impl Into<String>, progress: f64) -> Self {
        Self {
            text: text.into(),
            progress: Some(progress),
            error: None,
        }
    }

    pub fn failed(text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            progress: None,
            error: Some(error.into()),
        }
    }

    pub fn cleared() -> Self {
        Self::default()
    }
}

pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

pub fn decode_command(raw: &str) -> Result<WorkerCommand, ProtocolError> {
    decode_tagged(raw, COMMAND_TAGS)
}

pub fn decode_event(raw: &str) -> Result<WorkerEvent, ProtocolError> {
    decode_tagged(raw, EVENT_TAGS)
}

// Tag is checked before the typed decode so an unrecognized message can be
// told apart from a recognized one with a bad payload.
fn decode_tagged<T: DeserializeOwned>(raw: &str, known: &[&str]) -> Result<T, ProtocolError> {
    let value: Value = serde_json::from_str(raw).map_err(ProtocolError::Malformed)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingTag)?
        .to_string();
    if !known.contains(&tag.as_str()) {
        return Err(ProtocolError::UnknownTag(tag));
    }
    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload { tag, source })
}
