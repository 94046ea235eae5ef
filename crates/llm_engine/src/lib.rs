//! Seam between the worker and whatever actually runs the model.
//!
//! The worker only ever sees [`EngineFactory`] and [`ChatEngine`]; model
//! download, caching and tokenization stay behind these traits.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::{ChatRole, ChatTurn};
use thiserror::Error;

pub mod openai;

pub use openai::{OpenAiCompatConfig, OpenAiCompatEngine, OpenAiCompatFactory};

/// One loading tick reported by an engine factory.
#[derive(Debug, Clone, PartialEq)]
pub struct InitProgress {
    pub text: String,
    pub progress: f64,
}

impl InitProgress {
    pub fn new(text: impl Into<String>, progress: f64) -> Self {
        Self {
            text: text.into(),
            progress,
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: InitProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(InitProgress) + Send + Sync,
{
    fn report(&self, progress: InitProgress) {
        self(progress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub role: Option<ChatRole>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub choices: Vec<CompletionChoice>,
}

impl ChatCompletion {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![CompletionChoice {
                message: CompletionMessage {
                    role: Some(ChatRole::Assistant),
                    content: Some(text.into()),
                },
            }],
        }
    }

    /// Generated text at `choices[0].message.content`.
    pub fn into_text(self) -> Result<String, EngineError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(EngineError::EmptyCompletion)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("inference engine is unavailable")]
    Unavailable,
    #[error("model `{0}` is not served by the inference engine")]
    ModelNotFound(String),
    #[error("engine returned no completion text")]
    EmptyCompletion,
    #[error("invalid engine url: {0}")]
    Url(#[from] url::ParseError),
    #[error("engine request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[async_trait]
pub trait ChatEngine: Send + Sync {
    async fn chat_completion(&self, messages: &[ChatTurn]) -> Result<ChatCompletion>;
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        model_id: &str,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Arc<dyn ChatEngine>>;
}

pub struct MissingEngineFactory;

#[async_trait]
impl EngineFactory for MissingEngineFactory {
    async fn create(
        &self,
        _model_id: &str,
        _progress: Arc<dyn ProgressSink>,
    ) -> Result<Arc<dyn ChatEngine>> {
        Err(EngineError::Unavailable.into())
    }
}
