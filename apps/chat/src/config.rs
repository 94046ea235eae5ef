use std::{
    fs,
    path::Path,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use llm_engine::{EngineFactory, MissingEngineFactory, OpenAiCompatConfig, OpenAiCompatFactory};
use llm_worker::WorkerConfig;
use serde::Deserialize;
use shared::domain::{DEFAULT_MODEL_ID, DEFAULT_SYSTEM_PROMPT};
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "llm-chat.toml";

pub const ENV_MODEL_ID: &str = "LLM_CHAT__MODEL_ID";
pub const ENV_SYSTEM_PROMPT: &str = "LLM_CHAT__SYSTEM_PROMPT";
pub const ENV_ENGINE_URL: &str = "LLM_CHAT__ENGINE_URL";
pub const ENV_API_KEY: &str = "LLM_CHAT__API_KEY";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "LLM_CHAT__REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub model_id: String,
    pub system_prompt: String,
    pub engine_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            engine_url: None,
            api_key: None,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    model_id: Option<String>,
    system_prompt: Option<String>,
    engine_url: Option<String>,
    api_key: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// Defaults, then the TOML file, then `LLM_CHAT__*` environment overrides.
///
/// An explicit `path` must exist and parse; the default file is optional and
/// skipped with a warning when it is invalid.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();

    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            apply_file(&mut settings, &raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
        }
        None => {
            if let Ok(raw) = fs::read_to_string(DEFAULT_CONFIG_FILE) {
                if let Err(err) = apply_file(&mut settings, &raw) {
                    warn!(file = DEFAULT_CONFIG_FILE, error = %format!("{err:#}"), "ignoring invalid config file");
                }
            }
        }
    }

    apply_env(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> Result<()> {
    let file: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file.model_id {
        settings.model_id = v;
    }
    if let Some(v) = file.system_prompt {
        settings.system_prompt = v;
    }
    if let Some(v) = file.engine_url {
        settings.engine_url = non_empty(v);
    }
    if let Some(v) = file.api_key {
        settings.api_key = non_empty(v);
    }
    if let Some(v) = file.request_timeout_secs {
        set_request_timeout(settings, v);
    }
    Ok(())
}

// An empty engine url or api key clears the value set by an earlier layer.
fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup(ENV_MODEL_ID) {
        settings.model_id = v;
    }
    if let Some(v) = lookup(ENV_SYSTEM_PROMPT) {
        settings.system_prompt = v;
    }
    if let Some(v) = lookup(ENV_ENGINE_URL) {
        settings.engine_url = non_empty(v);
    }
    if let Some(v) = lookup(ENV_API_KEY) {
        settings.api_key = non_empty(v);
    }
    if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
        match v.parse::<u64>() {
            Ok(parsed) => set_request_timeout(settings, parsed),
            Err(_) => warn!(value = %v, "ignoring non-numeric {ENV_REQUEST_TIMEOUT_SECS}"),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn set_request_timeout(settings: &mut Settings, secs: u64) {
    if secs == 0 {
        warn!(
            kept = settings.request_timeout_secs,
            "ignoring zero request timeout"
        );
        return;
    }
    settings.request_timeout_secs = secs;
}

impl Settings {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            model_id: self.model_id.clone(),
            system_prompt: self.system_prompt.clone(),
        }
    }

    /// The HTTP engine when an engine URL is configured, otherwise a factory
    /// whose initialization always fails.
    pub fn engine_factory(&self) -> Result<Arc<dyn EngineFactory>> {
        let Some(raw_url) = self.engine_url.as_deref().map(str::trim) else {
            warn!("no engine url configured; initialization will fail");
            return Ok(Arc::new(MissingEngineFactory));
        };
        let base_url =
            Url::parse(raw_url).with_context(|| format!("invalid engine url '{raw_url}'"))?;
        info!(%base_url, model = %self.model_id, "using OpenAI-compatible engine");
        let factory = OpenAiCompatFactory::new(OpenAiCompatConfig {
            base_url,
            api_key: self.api_key.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })?;
        Ok(Arc::new(factory))
    }

    /// Environment for a child `llm-chat worker` that reproduces these
    /// settings through its own env overrides. Every field is exported, with
    /// unset optional values as empty strings, so nothing the child reads
    /// from its own config file survives.
    pub fn child_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_MODEL_ID, self.model_id.clone()),
            (ENV_SYSTEM_PROMPT, self.system_prompt.clone()),
            (ENV_ENGINE_URL, self.engine_url.clone().unwrap_or_default()),
            (ENV_API_KEY, self.api_key.clone().unwrap_or_default()),
            (ENV_REQUEST_TIMEOUT_SECS, self.request_timeout_secs.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_point_at_hermes_with_short_answers() {
        let settings = Settings::default();
        assert_eq!(settings.model_id, "Hermes-3-Llama-3.1-8B-q4f32_1-MLC");
        assert_eq!(
            settings.system_prompt,
            "You are a helpful assistant. You keep answers short and concise."
        );
        assert_eq!(settings.engine_url, None);
        assert_eq!(settings.request_timeout_secs, 120);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut settings = Settings::default();
        apply_file(
            &mut settings,
            r#"
model_id = "tiny-chat"
engine_url = "http://127.0.0.1:8080"
request_timeout_secs = 5
"#,
        )
        .expect("apply file");

        assert_eq!(settings.model_id, "tiny-chat");
        assert_eq!(settings.engine_url.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(settings.request_timeout_secs, 5);
        assert_eq!(settings.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let mut settings = Settings::default();
        assert!(apply_file(&mut settings, "modle_id = \"typo\"").is_err());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn env_overrides_file_and_skips_bad_timeout() {
        let mut settings = Settings::default();
        apply_file(&mut settings, "model_id = \"from-file\"").expect("apply file");
        apply_env(
            &mut settings,
            lookup_from(&[
                (ENV_MODEL_ID, "from-env"),
                (ENV_API_KEY, "secret"),
                (ENV_REQUEST_TIMEOUT_SECS, "soon"),
            ]),
        );

        assert_eq!(settings.model_id, "from-env");
        assert_eq!(settings.api_key.as_deref(), Some("secret"));
        assert_eq!(settings.request_timeout_secs, 120);
    }

    #[test]
    fn child_env_round_trips_through_env_overrides() {
        let settings = Settings {
            model_id: "tiny-chat".into(),
            system_prompt: "be brief".into(),
            engine_url: Some("http://localhost:9000".into()),
            api_key: None,
            request_timeout_secs: 7,
        };
        let pairs: Vec<(&str, String)> = settings.child_env();
        let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let mut rebuilt = Settings::default();
        apply_env(&mut rebuilt, lookup_from(&borrowed));
        assert_eq!(rebuilt, settings);
    }

    #[test]
    fn child_env_clears_values_the_child_config_file_would_set() {
        let parent = Settings::default();

        let mut child = Settings::default();
        apply_file(
            &mut child,
            "engine_url = \"http://127.0.0.1:8080\"\napi_key = \"k\"",
        )
        .expect("apply file");
        let pairs = parent.child_env();
        let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        apply_env(&mut child, lookup_from(&borrowed));

        assert_eq!(child.engine_url, None);
        assert_eq!(child.api_key, None);
        assert_eq!(child, parent);
    }

    #[test]
    fn zero_request_timeout_is_ignored() {
        let mut settings = Settings::default();
        apply_file(&mut settings, "request_timeout_secs = 0").expect("apply file");
        assert_eq!(settings.request_timeout_secs, 120);

        apply_env(&mut settings, lookup_from(&[(ENV_REQUEST_TIMEOUT_SECS, "0")]));
        assert_eq!(settings.request_timeout_secs, 120);

        apply_env(&mut settings, lookup_from(&[(ENV_REQUEST_TIMEOUT_SECS, "30")]));
        assert_eq!(settings.request_timeout_secs, 30);
    }

    #[test]
    fn explicit_config_file_is_loaded_and_must_exist() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("llm_chat_config_test_{suffix}.toml"));
        fs::write(&path, "system_prompt = \"answer in haiku\"\n").expect("write config");

        let settings = load_settings(Some(path.as_path())).expect("load");
        if env::var(ENV_SYSTEM_PROMPT).is_err() {
            assert_eq!(settings.system_prompt, "answer in haiku");
        }

        fs::remove_file(&path).expect("cleanup");
        assert!(load_settings(Some(path.as_path())).is_err());
    }

    #[test]
    fn missing_engine_url_selects_stand_in_factory() {
        assert!(Settings::default().engine_factory().is_ok());

        let bad = Settings {
            engine_url: Some("not a url".into()),
            ..Settings::default()
        };
        assert!(bad.engine_factory().is_err());
    }
}
