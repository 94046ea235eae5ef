use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four ways a chat exchange can fail, each surfaced to the user once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerErrorKind {
    /// The engine factory rejected; the worker stays non-ready until `init` is retried.
    InitializationFailure,
    /// A chat-completion call rejected; the user turn stays in history without a reply.
    GenerationFailure,
    /// `generate` arrived before the engine was ready.
    NotReadyRejection,
    /// The channel to the worker itself broke.
    TransportFault,
}

impl WorkerErrorKind {
    /// Text shown to the user for this failure.
    pub fn user_notice(self) -> &'static str {
        match self {
            Self::InitializationFailure => "initialization-failed",
            Self::GenerationFailure => "An error occurred while generating the response.",
            Self::NotReadyRejection => "LLM is not initialized yet. Please wait.",
            Self::TransportFault => "An error occurred while processing your request.",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct WorkerError {
    pub kind: WorkerErrorKind,
    pub message: String,
}

impl WorkerError {
    pub fn new(kind: WorkerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("message has no `type` tag")]
    MissingTag,
    #[error("unknown message type `{0}`")]
    UnknownTag(String),
    #[error("invalid `{tag}` payload: {source}")]
    InvalidPayload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    pub fn is_unknown_tag(&self) -> bool {
        matches!(self, Self::UnknownTag(_))
    }
}
