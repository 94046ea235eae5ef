//! Engine backed by any server speaking the OpenAI chat-completions API
//! (llama.cpp server, vLLM, Ollama, ...).

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use shared::domain::ChatTurn;
use tracing::{debug, info};
use url::Url;

use crate::{ChatCompletion, ChatEngine, EngineError, EngineFactory, InitProgress, ProgressSink};

#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
}

pub struct OpenAiCompatFactory {
    http: Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatFactory {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build engine http client")?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl EngineFactory for OpenAiCompatFactory {
    async fn create(
        &self,
        model_id: &str,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Arc<dyn ChatEngine>> {
        progress.report(InitProgress::new(
            format!("Connecting to {}", self.config.base_url),
            0.0,
        ));

        let url = endpoint(&self.config.base_url, "v1/models")?;
        let models: ModelList = authorized(self.http.get(url), &self.config)
            .send()
            .await
            .map_err(EngineError::from)?
            .error_for_status()
            .map_err(EngineError::from)?
            .json()
            .await
            .map_err(EngineError::from)?;
        debug!(served = models.data.len(), "fetched engine model catalog");

        if !models.data.iter().any(|model| model.id == model_id) {
            return Err(EngineError::ModelNotFound(model_id.to_string()).into());
        }

        progress.report(InitProgress::new(format!("Model {model_id} available"), 1.0));
        info!(model = model_id, base_url = %self.config.base_url, "engine ready");

        Ok(Arc::new(OpenAiCompatEngine {
            http: self.http.clone(),
            config: self.config.clone(),
            model_id: model_id.to_string(),
        }))
    }
}

pub struct OpenAiCompatEngine {
    http: Client,
    config: OpenAiCompatConfig,
    model_id: String,
}

#[async_trait]
impl ChatEngine for OpenAiCompatEngine {
    async fn chat_completion(&self, messages: &[ChatTurn]) -> Result<ChatCompletion> {
        let url = endpoint(&self.config.base_url, "v1/chat/completions")?;
        let request = ChatCompletionRequest {
            model: &self.model_id,
            messages,
        };
        let completion = authorized(self.http.post(url), &self.config)
            .json(&request)
            .send()
            .await
            .map_err(EngineError::from)?
            .error_for_status()
            .map_err(EngineError::from)?
            .json::<ChatCompletion>()
            .await
            .map_err(EngineError::from)?;
        Ok(completion)
    }
}

fn authorized(request: RequestBuilder, config: &OpenAiCompatConfig) -> RequestBuilder {
    match &config.api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

fn endpoint(base_url: &Url, path: &str) -> Result<Url, EngineError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path)?)
}

#[cfg(test)]
#[path = "tests/openai_tests.rs"]
mod tests;
